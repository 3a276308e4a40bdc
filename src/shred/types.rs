use std::time::Duration;

/// A scalar cell value as it appears in an output row.
///
/// Numbers keep the raw JSON lexeme instead of a parsed binary form so that
/// the output reproduces the input spelling exactly (`1.50` stays `1.50`),
/// independent of how the byte stream was chunked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scalar {
    String(String),
    Number(String),
    Bool(bool),
    Null,
}

/// One output row: ordered (column, value) pairs.
///
/// Column order is insertion order as fields were encountered in the
/// document; the first row written to a table fixes that table's header.
pub type Row = Vec<(String, Scalar)>;

/// Configuration for one conversion
#[derive(Debug, Clone)]
pub struct ShredConfig {
    /// Token written in place of JSON null values (quoted in the output,
    /// so it stays distinguishable from an empty string)
    pub null_sentinel: String,

    /// Size in bytes of the chunks handed to each table sink; row-sized
    /// fragments are rebuffered into chunks of exactly this size, with the
    /// remainder flushed at end of stream
    pub output_chunk_size: usize,

    /// How long the producer waits when handing a row to a table writer
    /// before the conversion is aborted
    pub handoff_timeout: Duration,

    /// Maximum number of concurrently open output tables
    pub max_tables: usize,
}

impl Default for ShredConfig {
    fn default() -> Self {
        ShredConfig {
            null_sentinel: String::from("#NA"),
            output_chunk_size: 65536,
            handoff_timeout: Duration::from_secs(5),
            max_tables: 1024,
        }
    }
}
