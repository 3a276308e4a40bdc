//! Table sink manager: one writer task per open table, bounded hand-off.
//!
//! The producer and each writer communicate over a channel of capacity 1,
//! so at most one encoded row per table is in flight at any instant and
//! memory stays bounded no matter how large the document is. Writers
//! rebuffer row-sized fragments into chunks of exactly the configured size
//! before handing them to the external sink.

use std::collections::HashMap;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::shred::encode;
use crate::shred::error::ShredError;
use crate::shred::sink::{ByteSink, SinkFactory};
use crate::shred::types::{Row, ShredConfig};

struct TableHandle {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<Result<(), ShredError>>,
    /// Column header fixed by the first row
    columns: Vec<String>,
}

/// The set of open output tables; `save` is the sole write primitive
pub struct TableSet<F: SinkFactory> {
    factory: F,
    config: ShredConfig,
    open: HashMap<String, TableHandle>,
}

impl<F: SinkFactory> TableSet<F> {
    pub fn new(factory: F, config: ShredConfig) -> Self {
        TableSet {
            factory,
            config,
            open: HashMap::new(),
        }
    }

    /// Route one row to its table, lazily opening the table on first use
    /// (which writes the header derived from this row's columns)
    pub async fn save(&mut self, table: &str, row: Row) -> Result<(), ShredError> {
        if !self.open.contains_key(table) {
            self.open_table(table, &row).await?;
        } else if let Some(handle) = self.open.get(table) {
            let matches = handle.columns.len() == row.len()
                && handle
                    .columns
                    .iter()
                    .zip(row.iter())
                    .all(|(column, (key, _))| column == key);
            if !matches {
                return Err(ShredError::SchemaDrift {
                    table: table.to_string(),
                    expected: handle.columns.clone(),
                    found: row.into_iter().map(|(key, _)| key).collect(),
                });
            }
        }
        let bytes = encode::value_row(&row, &self.config.null_sentinel);
        self.send(table, Bytes::from(bytes)).await
    }

    async fn open_table(&mut self, table: &str, first_row: &Row) -> Result<(), ShredError> {
        if self.open.len() >= self.config.max_tables {
            return Err(ShredError::TooManyTables {
                limit: self.config.max_tables,
            });
        }
        let sink = self
            .factory
            .open(table)
            .await
            .map_err(|source| ShredError::Sink {
                table: table.to_string(),
                source,
            })?;
        tracing::debug!(table = %table, "opening table");

        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(write_table(
            table.to_string(),
            rx,
            sink,
            self.config.output_chunk_size.max(1),
        ));
        let columns: Vec<String> = first_row.iter().map(|(key, _)| key.clone()).collect();

        let mut header = Vec::with_capacity(encode::BOM.len() + 16 * columns.len());
        header.extend_from_slice(encode::BOM);
        header.extend_from_slice(&encode::header_row(&columns));

        self.open
            .insert(table.to_string(), TableHandle { tx, task, columns });
        self.send(table, Bytes::from(header)).await
    }

    /// Bounded hand-off of one fragment to a table's writer
    async fn send(&mut self, table: &str, bytes: Bytes) -> Result<(), ShredError> {
        let tx = match self.open.get(table) {
            Some(handle) => handle.tx.clone(),
            None => return Ok(()),
        };
        match timeout(self.config.handoff_timeout, tx.send(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Err(_) => Err(ShredError::HandoffTimeout {
                table: table.to_string(),
                timeout: self.config.handoff_timeout,
            }),
            Ok(Err(_)) => {
                // The writer is gone; its own failure beats "channel closed"
                match self.open.remove(table) {
                    Some(handle) => {
                        drop(handle.tx);
                        match handle.task.await {
                            Ok(Err(error)) => Err(error),
                            Ok(Ok(())) => Err(writer_gone(table)),
                            Err(join_error) => Err(ShredError::Sink {
                                table: table.to_string(),
                                source: io::Error::new(
                                    io::ErrorKind::Other,
                                    join_error.to_string(),
                                ),
                            }),
                        }
                    }
                    None => Err(writer_gone(table)),
                }
            }
        }
    }

    /// Close every table and wait for its writer, then surface the first
    /// writer failure, or else the producer's own result.
    pub async fn shutdown(mut self, result: Result<(), ShredError>) -> Result<(), ShredError> {
        let producer_error = result.err();
        let mut writer_error: Option<ShredError> = None;
        for (table, handle) in self.open.drain() {
            let TableHandle { tx, mut task, .. } = handle;
            // Dropping the sender is the close signal: the writer drains,
            // flushes its remainder and finishes
            drop(tx);
            match timeout(self.config.handoff_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(error))) => {
                    tracing::warn!(table = %table, error = %error, "table writer failed");
                    writer_error.get_or_insert(error);
                }
                Ok(Err(join_error)) => {
                    writer_error.get_or_insert(ShredError::Sink {
                        table: table.clone(),
                        source: io::Error::new(io::ErrorKind::Other, join_error.to_string()),
                    });
                }
                Err(_) => {
                    tracing::warn!(table = %table, "table writer stalled during shutdown");
                    task.abort();
                    writer_error.get_or_insert(ShredError::HandoffTimeout {
                        table: table.clone(),
                        timeout: self.config.handoff_timeout,
                    });
                }
            }
        }
        match writer_error.or(producer_error) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn writer_gone(table: &str) -> ShredError {
    ShredError::Sink {
        table: table.to_string(),
        source: io::Error::new(io::ErrorKind::BrokenPipe, "table writer exited early"),
    }
}

/// One writer task: rebuffer row fragments into fixed-size chunks and feed
/// them to the sink, flushing the remainder when the channel closes
async fn write_table(
    table: String,
    mut rx: mpsc::Receiver<Bytes>,
    mut sink: Box<dyn ByteSink>,
    chunk_size: usize,
) -> Result<(), ShredError> {
    tracing::debug!(table = %table, "table writer started");
    let mut pending = BytesMut::new();
    while let Some(fragment) = rx.recv().await {
        pending.extend_from_slice(&fragment);
        while pending.len() >= chunk_size {
            let chunk = pending.split_to(chunk_size).freeze();
            sink.write_chunk(chunk)
                .await
                .map_err(|source| ShredError::Sink {
                    table: table.clone(),
                    source,
                })?;
        }
    }
    if !pending.is_empty() {
        sink.write_chunk(pending.split().freeze())
            .await
            .map_err(|source| ShredError::Sink {
                table: table.clone(),
                source,
            })?;
    }
    sink.finish().await.map_err(|source| ShredError::Sink {
        table: table.clone(),
        source,
    })?;
    tracing::debug!(table = %table, "table writer finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shred::sink::MemorySinkFactory;
    use crate::shred::types::Scalar;
    use async_trait::async_trait;
    use std::time::Duration;

    fn row(cells: &[(&str, &str)]) -> Row {
        cells
            .iter()
            .map(|(key, value)| (key.to_string(), Scalar::String(value.to_string())))
            .collect()
    }

    fn config() -> ShredConfig {
        ShredConfig {
            handoff_timeout: Duration::from_millis(200),
            ..ShredConfig::default()
        }
    }

    #[tokio::test]
    async fn test_header_written_once_then_rows() {
        let sinks = MemorySinkFactory::new();
        let mut tables = TableSet::new(sinks.clone(), config());
        tables.save("t", row(&[("a", "1"), ("b", "x")])).await.unwrap();
        tables.save("t", row(&[("a", "2"), ("b", "y")])).await.unwrap();
        tables.shutdown(Ok(())).await.unwrap();

        let bytes = sinks.tables().remove("t").unwrap();
        assert_eq!(
            bytes,
            b"\xef\xbb\xbf\"a\",\"b\"\r\n\"1\",\"x\"\r\n\"2\",\"y\"\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_output_chunk_size_does_not_change_bytes() {
        let mut reference = None;
        for chunk_size in [1usize, 3, 64, 65536] {
            let sinks = MemorySinkFactory::new();
            let mut tables = TableSet::new(
                sinks.clone(),
                ShredConfig {
                    output_chunk_size: chunk_size,
                    ..config()
                },
            );
            for i in 0..10 {
                let value = format!("value-{i}");
                tables
                    .save("t", row(&[("a", value.as_str())]))
                    .await
                    .unwrap();
            }
            tables.shutdown(Ok(())).await.unwrap();
            let bytes = sinks.tables().remove("t").unwrap();
            match &reference {
                None => reference = Some(bytes),
                Some(expected) => assert_eq!(&bytes, expected),
            }
        }
    }

    #[tokio::test]
    async fn test_schema_drift_fails_fast() {
        let sinks = MemorySinkFactory::new();
        let mut tables = TableSet::new(sinks, config());
        tables.save("t", row(&[("a", "1")])).await.unwrap();
        let err = tables
            .save("t", row(&[("b", "2")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ShredError::SchemaDrift { .. }));
    }

    #[tokio::test]
    async fn test_max_tables_enforced() {
        let sinks = MemorySinkFactory::new();
        let mut tables = TableSet::new(
            sinks,
            ShredConfig {
                max_tables: 2,
                ..config()
            },
        );
        tables.save("t1", row(&[("a", "1")])).await.unwrap();
        tables.save("t2", row(&[("a", "1")])).await.unwrap();
        let err = tables.save("t3", row(&[("a", "1")])).await.unwrap_err();
        assert!(matches!(err, ShredError::TooManyTables { limit: 2 }));
    }

    /// A sink whose writes never complete, to simulate a stalled consumer
    struct StallingFactory;
    struct StallingSink;

    #[async_trait]
    impl SinkFactory for StallingFactory {
        async fn open(&self, _table: &str) -> io::Result<Box<dyn ByteSink>> {
            Ok(Box::new(StallingSink))
        }
    }

    #[async_trait]
    impl ByteSink for StallingSink {
        async fn write_chunk(&mut self, _chunk: Bytes) -> io::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn finish(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_writer_times_out_the_handoff() {
        let mut tables = TableSet::new(
            StallingFactory,
            ShredConfig {
                output_chunk_size: 1,
                handoff_timeout: Duration::from_millis(50),
                ..ShredConfig::default()
            },
        );
        // First save: header + row are accepted into the channel while the
        // writer blocks inside its first chunk write
        tables.save("t", row(&[("a", "1")])).await.unwrap();
        let mut timed_out = false;
        for _ in 0..3 {
            if let Err(err) = tables.save("t", row(&[("a", "2")])).await {
                assert!(matches!(err, ShredError::HandoffTimeout { .. }));
                timed_out = true;
                break;
            }
        }
        assert!(timed_out, "expected a hand-off timeout");
        let err = tables.shutdown(Ok(())).await.unwrap_err();
        assert!(matches!(err, ShredError::HandoffTimeout { .. }));
    }

    /// A sink that fails on the first write
    struct FailingFactory;
    struct FailingSink;

    #[async_trait]
    impl SinkFactory for FailingFactory {
        async fn open(&self, _table: &str) -> io::Result<Box<dyn ByteSink>> {
            Ok(Box::new(FailingSink))
        }
    }

    #[async_trait]
    impl ByteSink for FailingSink {
        async fn write_chunk(&mut self, _chunk: Bytes) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }

        async fn finish(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writer_failure_surfaces_at_shutdown() {
        let mut tables = TableSet::new(
            FailingFactory,
            ShredConfig {
                output_chunk_size: 1,
                ..config()
            },
        );
        tables.save("t", row(&[("a", "1")])).await.unwrap();
        let err = tables.shutdown(Ok(())).await.unwrap_err();
        assert!(matches!(err, ShredError::Sink { .. }));
    }
}
