//! Table sink collaborator contracts.
//!
//! A sink receives one table's finished byte stream in order and owns the
//! destination (file, socket, buffer). Sinks must process chunks as they
//! arrive and report success on `finish`; durability and retries are their
//! business, not the core's.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

/// Ordered consumer of one table's bytes
#[async_trait]
pub trait ByteSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Called exactly once after the last chunk
    async fn finish(&mut self) -> io::Result<()>;
}

/// Opens one [`ByteSink`] per table name, on first row
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self, table: &str) -> io::Result<Box<dyn ByteSink>>;
}

/// Writes each table to `<dir>/<table>.csv`
pub struct DirectorySinkFactory {
    dir: PathBuf,
}

impl DirectorySinkFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySinkFactory { dir: dir.into() }
    }
}

#[async_trait]
impl SinkFactory for DirectorySinkFactory {
    async fn open(&self, table: &str) -> io::Result<Box<dyn ByteSink>> {
        let path = self.dir.join(format!("{table}.csv"));
        let file = tokio::fs::File::create(&path).await?;
        Ok(Box::new(FileSink { file }))
    }
}

struct FileSink {
    file: tokio::fs::File,
}

#[async_trait]
impl ByteSink for FileSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.file.write_all(&chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.file.flush().await
    }
}

/// Collects every table into memory; for tests and embedders
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    tables: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the bytes received so far, per table
    pub fn tables(&self) -> HashMap<String, Vec<u8>> {
        self.tables
            .lock()
            .map(|tables| tables.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn open(&self, table: &str) -> io::Result<Box<dyn ByteSink>> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink poisoned"))?;
        tables.entry(table.to_string()).or_default();
        Ok(Box::new(MemorySink {
            table: table.to_string(),
            tables: Arc::clone(&self.tables),
        }))
    }
}

struct MemorySink {
    table: String,
    tables: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink poisoned"))?;
        tables
            .entry(self.table.clone())
            .or_default()
            .extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}
