//! Chunked arena for immutable per-part fix records.
//!
//! Body records are ingested into small POD *fix records* that stay
//! untouched for the lifetime of the trace data. They back the lazy
//! materialization of per-position entities: instruction and line maps are
//! only built from the fix lists when a view first asks for them.

use calltrace_events::{CostVec, SubCost};

use crate::ids::{CallId, PartId, SourceId};

/// Records per allocation chunk.
const CHUNK: usize = 1024;

/// Index of a record in a [`FixPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FixIdx(u32);

impl FixIdx {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bump-allocating arena of fix records.
///
/// Records are appended in chunks and never individually freed; indices
/// stay valid for the pool's lifetime.
#[derive(Debug)]
pub struct FixPool<T> {
    chunks: Vec<Vec<T>>,
    len: usize,
}

impl<T> Default for FixPool<T> {
    fn default() -> Self {
        FixPool {
            chunks: Vec::new(),
            len: 0,
        }
    }
}

impl<T> FixPool<T> {
    /// Creates an empty pool.
    pub fn new() -> Self {
        FixPool::default()
    }

    /// Appends a record, returning its stable index.
    pub fn push(&mut self, record: T) -> FixIdx {
        let index = self.len;
        match self.chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK => chunk.push(record),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK);
                chunk.push(record);
                self.chunks.push(chunk);
            }
        }
        self.len += 1;
        FixIdx(index as u32)
    }

    /// The record behind an index.
    pub fn get(&self, idx: FixIdx) -> &T {
        &self.chunks[idx.index() / CHUNK][idx.index() % CHUNK]
    }

    /// Number of records in the pool.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the pool holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over all records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flatten()
    }
}

/// Self cost attributed to one position in one part.
#[derive(Clone, Copy, Debug)]
pub struct FixCost {
    pub part: PartId,
    pub source: SourceId,
    pub addr: Option<u64>,
    pub line: Option<u32>,
    pub cost: CostVec,
}

/// Cost and count of one call site row in one part.
#[derive(Clone, Copy, Debug)]
pub struct FixCallCost {
    pub part: PartId,
    pub call: CallId,
    pub source: SourceId,
    pub addr: Option<u64>,
    pub line: Option<u32>,
    pub count: SubCost,
    pub cost: CostVec,
}

/// One jump row in one part.
#[derive(Clone, Copy, Debug)]
pub struct FixJump {
    pub part: PartId,
    pub source: SourceId,
    pub addr: Option<u64>,
    pub line: Option<u32>,
    pub to_source: SourceId,
    pub to_addr: Option<u64>,
    pub to_line: Option<u32>,
    pub executed: SubCost,
    pub followed: SubCost,
    pub conditional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_stay_valid_across_chunks() {
        let mut pool = FixPool::new();
        let indices: Vec<FixIdx> =
            (0..3 * CHUNK + 7).map(|i| pool.push(i)).collect();
        assert_eq!(pool.len(), 3 * CHUNK + 7);
        for (expected, idx) in indices.iter().enumerate() {
            assert_eq!(*pool.get(*idx), expected);
        }
    }

    #[test]
    fn test_iter_preserves_insertion_order() {
        let mut pool = FixPool::new();
        for i in 0..CHUNK + 2 {
            pool.push(i);
        }
        let collected: Vec<usize> = pool.iter().copied().collect();
        assert_eq!(collected, (0..CHUNK + 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_pool() {
        let pool: FixPool<u32> = FixPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.iter().count(), 0);
    }
}
