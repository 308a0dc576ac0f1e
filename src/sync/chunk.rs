// ABOUTME: Primary key chunker - splits a table's key space into bounded ranges
// ABOUTME: Each range keeps the exact key set observed while streaming the keys

use anyhow::{bail, Context, Result};

use crate::schema::Table;

/// An inclusive primary key range with the exact ordered keys it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub from: i64,
    pub to: i64,
    pub members: Vec<i64>,
}

impl KeyRange {
    /// Range holding one key, as produced by change events.
    pub fn single(key: i64) -> Self {
        Self {
            from: key,
            to: key,
            members: vec![key],
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Largest key of the range.
    pub fn last(&self) -> i64 {
        self.to
    }
}

/// Accumulates ascending keys into ranges of at most `chunk_size` members.
pub struct Chunker {
    chunk_size: usize,
    current: Vec<i64>,
    ranges: Vec<KeyRange>,
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            current: Vec::with_capacity(chunk_size),
            ranges: Vec::new(),
        }
    }

    pub fn push(&mut self, key: i64) {
        self.current.push(key);
        if self.current.len() >= self.chunk_size {
            self.close();
        }
    }

    fn close(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let members = std::mem::replace(&mut self.current, Vec::with_capacity(self.chunk_size));
        self.ranges.push(KeyRange {
            from: members[0],
            to: members[members.len() - 1],
            members,
        });
    }

    /// Flush the partial range and return all ranges in ascending order.
    pub fn finish(mut self) -> Vec<KeyRange> {
        self.close();
        self.ranges
    }
}

/// Split every key ascending into ranges of `chunk_size` keys.
///
/// Yields `ceil(N / chunk_size)` ranges without gaps or overlaps, in
/// ascending key order. Only tables with a single integer primary key can
/// be chunked.
pub async fn chunk_primary_keys(table: &Table, chunk_size: usize) -> Result<Vec<KeyRange>> {
    if !table.has_integer_primary_key() {
        bail!(
            "Table {} has no single integer primary key and cannot be chunked",
            table.name
        );
    }

    let pk = table.quoted_primary_key();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        table.dialect().cast_bigint(&pk),
        table.qualified_name(),
        pk
    );

    let mut chunker = Chunker::new(chunk_size);
    table
        .connector()
        .for_each_key(&sql, &mut |key| chunker.push(key))
        .await
        .with_context(|| format!("Failed to read primary keys of {}", table.name))?;

    let ranges = chunker.finish();
    tracing::debug!("(chunk) {} split into {} ranges", table.name, ranges.len());
    Ok(ranges)
}
