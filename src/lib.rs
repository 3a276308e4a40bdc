//! # Shredder - streaming JSON to relational CSV
//!
//! A library for converting a single, arbitrarily large, nested JSON
//! document into a set of flat CSV tables, one per entity collection,
//! linked by synthetic foreign-key columns. The document is consumed as an
//! incremental byte stream and each table is produced as an ordered byte
//! stream; memory use is bounded regardless of document size.
//!
//! ## Quick start
//!
//! ```rust
//! use shredder::{to_csvs, MemorySinkFactory, ShredConfig};
//! use bytes::Bytes;
//! use futures::stream;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), shredder::ShredError> {
//! let doc = br#"{"songs": [{"id": "1", "title": "Walk through the fire"}]}"#;
//! let source = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(doc))]);
//!
//! let sinks = MemorySinkFactory::new();
//! to_csvs(source, sinks.clone(), ShredConfig::default()).await?;
//!
//! let tables = sinks.tables();
//! assert!(tables.contains_key("songs[*]"));
//! # Ok(())
//! # }
//! ```
//!
//! The output convention follows the quote-non-numeric CSV rule: strings,
//! booleans and the null sentinel are quoted, numbers keep their raw JSON
//! spelling unquoted, rows end with `\r\n`, and each table stream starts
//! with a UTF-8 BOM.

use bytes::Bytes;
use futures::{Stream, StreamExt};

pub mod shred;

// Re-export commonly used types for convenience
pub use shred::{
    ByteSink, DirectorySinkFactory, MemorySinkFactory, Row, Scalar, ShredConfig, ShredError,
    SinkFactory,
};

use shred::{Flattener, JsonParser, TableSet};

/// Main entry point: shred a JSON byte stream into per-table CSV streams.
///
/// Consumes `source` to completion, classifying every object it closes and
/// routing rows to lazily opened sinks, one concurrent writer per table.
/// On success every opened sink has been finished; on error the conversion
/// is aborted as a whole and no output should be treated as complete.
pub async fn to_csvs<S, F>(source: S, factory: F, config: ShredConfig) -> Result<(), ShredError>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    F: SinkFactory,
{
    let mut tables = TableSet::new(factory, config);
    let result = pump(source, &mut tables).await;
    tables.shutdown(result).await
}

async fn pump<S, F>(mut source: S, tables: &mut TableSet<F>) -> Result<(), ShredError>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    F: SinkFactory,
{
    let mut parser = JsonParser::new();
    let mut engine = Flattener::new();
    while let Some(chunk) = source.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk)? {
            for emission in engine.handle(event)? {
                tables.save(&emission.table, emission.row).await?;
            }
        }
    }
    for event in parser.finish()? {
        for emission in engine.handle(event)? {
            tables.save(&emission.table, emission.row).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::collections::HashMap;

    /// The reference document: songs with shared categories and anonymous
    /// comments
    const SONGS: &[u8] = br#"{
  "songs": [
    {
      "id": "1",
      "title": "Walk through the fire",
      "categories": [
        {"id": "1", "name": "musicals"},
        {"id": "2", "name": "television-shows"}
      ],
      "comments": [
        {"content": "I love it"},
        {"content": "I've heard better"}
      ]
    },
    {
      "id": "2",
      "title": "I could have danced all night",
      "categories": [
        {"id": "1", "name": "musicals"},
        {"id": "3", "name": "films"}
      ],
      "comments": [
        {"content": "I also could have danced all night"}
      ]
    }
  ]
}"#;

    fn expected_tables() -> HashMap<String, Vec<u8>> {
        let mut expected: HashMap<String, Vec<u8>> = HashMap::new();
        expected.insert(
            "songs[*].categories[*].id".to_string(),
            b"\xef\xbb\xbf\"songs__id\",\"categories__id\"\r\n\"1\",\"1\"\r\n\"1\",\"2\"\r\n\"2\",\"1\"\r\n\"2\",\"3\"\r\n".to_vec(),
        );
        expected.insert(
            "songs[*].comments[*]".to_string(),
            b"\xef\xbb\xbf\"songs__id\",\"content\"\r\n\"1\",\"I love it\"\r\n\"1\",\"I've heard better\"\r\n\"2\",\"I also could have danced all night\"\r\n".to_vec(),
        );
        expected.insert(
            "songs[*]".to_string(),
            b"\xef\xbb\xbf\"id\",\"title\"\r\n\"1\",\"Walk through the fire\"\r\n\"2\",\"I could have danced all night\"\r\n".to_vec(),
        );
        expected.insert(
            "categories[*]".to_string(),
            b"\xef\xbb\xbf\"id\",\"name\"\r\n\"1\",\"musicals\"\r\n\"2\",\"television-shows\"\r\n\"3\",\"films\"\r\n".to_vec(),
        );
        expected
    }

    async fn convert(
        doc: &[u8],
        input_chunk: usize,
        config: ShredConfig,
    ) -> HashMap<String, Vec<u8>> {
        let chunks: Vec<Result<Bytes, std::io::Error>> = doc
            .chunks(input_chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let sinks = MemorySinkFactory::new();
        to_csvs(stream::iter(chunks), sinks.clone(), config)
            .await
            .unwrap();
        sinks.tables()
    }

    #[tokio::test]
    async fn test_songs_document_golden_output() {
        let tables = convert(SONGS, SONGS.len(), ShredConfig::default()).await;
        assert_eq!(tables, expected_tables());
    }

    #[tokio::test]
    async fn test_input_chunking_never_changes_output() {
        let expected = expected_tables();
        for input_chunk in [1usize, 2, 7, 64] {
            let tables = convert(SONGS, input_chunk, ShredConfig::default()).await;
            assert_eq!(tables, expected, "input chunk size {input_chunk}");
        }
    }

    #[tokio::test]
    async fn test_output_chunk_size_never_changes_output() {
        let expected = expected_tables();
        for output_chunk in [1usize, 10, 65536] {
            let config = ShredConfig {
                output_chunk_size: output_chunk,
                ..ShredConfig::default()
            };
            let tables = convert(SONGS, 16, config).await;
            assert_eq!(tables, expected, "output chunk size {output_chunk}");
        }
    }

    #[tokio::test]
    async fn test_numbers_and_embedded_objects() {
        let doc = serde_json::json!({
            "songs": [{
                "id": "1",
                "title": "Walk through the fire",
                "plays": 1042,
                "artist": {"name": "Nichole"},
                "categories": [{"id": 7, "name": "musicals"}]
            }]
        });
        let bytes = serde_json::to_vec(&doc).unwrap();
        let tables = convert(&bytes, bytes.len(), ShredConfig::default()).await;

        let songs = String::from_utf8(tables["songs[*]"].clone()).unwrap();
        assert!(songs.contains("\"artist__name\""));
        // Numeric values stay unquoted
        assert!(songs.contains(",1042,"));
        let categories = String::from_utf8(tables["categories[*]"].clone()).unwrap();
        assert!(categories.contains("7,\"musicals\""));
    }

    #[tokio::test]
    async fn test_null_written_as_sentinel() {
        let doc = br#"{"songs": [{"id": "1", "title": null}]}"#;
        let config = ShredConfig {
            null_sentinel: String::from("<missing>"),
            ..ShredConfig::default()
        };
        let tables = convert(doc, doc.len(), config).await;
        let songs = String::from_utf8(tables["songs[*]"].clone()).unwrap();
        assert!(songs.contains("\"1\",\"<missing>\""));
    }

    #[tokio::test]
    async fn test_malformed_input_aborts() {
        let sinks = MemorySinkFactory::new();
        let source = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            br#"{"songs": [{"id": }"#,
        ))]);
        let err = to_csvs(source, sinks, ShredConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ShredError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_schema_drift_aborts() {
        let doc = br#"{"songs": [
            {"id": "1", "comments": [{"content": "a"}, {"author": "b"}]}
        ]}"#;
        let sinks = MemorySinkFactory::new();
        let source = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::copy_from_slice(doc))]);
        let err = to_csvs(source, sinks, ShredConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ShredError::SchemaDrift { .. }));
    }
}
