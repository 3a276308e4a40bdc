//! JSON shredding - stream a nested document into relational CSV tables
//!
//! This module turns one incrementally parsed JSON document into flat,
//! relational tables suitable for SQL loading, without ever holding the
//! whole document in memory.
//!
//! Classification happens when an object closes:
//!
//! - An **embedded sub-object** (a plain field value) merges into its
//!   parent's row under `<field>__<subfield>` columns and gets no table.
//! - A **top-level entity** (an array element with an `id` field) is
//!   written once per unique identifier to its type's own `<type>[*]`
//!   table; each occurrence nested below another identified entity also
//!   produces a link row of ancestor ids in the `<path>.id` table.
//! - A **link record** (an array element without an `id`) becomes a child
//!   row in the path-named table, keyed by its ancestors' identifiers.

pub mod encode;
pub mod engine;
pub mod error;
pub mod parser;
pub mod path;
pub mod sink;
pub mod table;
pub mod types;

pub use engine::{Emission, Flattener};
pub use error::ShredError;
pub use parser::{Event, JsonParser};
pub use sink::{ByteSink, DirectorySinkFactory, MemorySinkFactory, SinkFactory};
pub use table::TableSet;
pub use types::{Row, Scalar, ShredConfig};
