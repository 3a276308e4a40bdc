use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by a conversion.
///
/// Every variant is fatal: there is no partial-success mode. Either every
/// table that received a row was written completely, or the caller gets one
/// of these and must not treat any output as complete.
#[derive(Debug, Error)]
pub enum ShredError {
    /// The input is not well-formed JSON
    #[error("malformed JSON at byte {offset}: {message}")]
    Parse { offset: u64, message: String },

    /// Well-formed JSON outside the relational data model, e.g. an array
    /// of scalar values
    #[error("unsupported JSON shape: {0}")]
    Unsupported(String),

    /// The document fans out into more distinct tables than allowed
    #[error("too many output tables (limit {limit})")]
    TooManyTables { limit: usize },

    /// A later row's columns do not match the table's established header
    #[error("schema drift in table {table}: header is {expected:?}, row has {found:?}")]
    SchemaDrift {
        table: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A table writer did not accept a row within the configured timeout
    #[error("handing a row to table {table} timed out after {timeout:?}")]
    HandoffTimeout { table: String, timeout: Duration },

    /// A table sink failed to open, write, or finish
    #[error("sink for table {table} failed")]
    Sink {
        table: String,
        #[source]
        source: io::Error,
    },

    /// The JSON byte source failed
    #[error("failed to read JSON input")]
    Io(#[from] io::Error),
}
