//! Fixed-width cost vectors.

use crate::mapping::{EventTypeSet, SubMapping};
use crate::subcost::SubCost;

/// The maximal number of real event types a cost vector can hold.
///
/// Derived event types are numbered starting at this index.
pub const MAX_REAL: usize = 10;

/// A dense array of up to [`MAX_REAL`] cost counters.
///
/// Only the first `used` slots are populated; indices at or beyond the
/// used count read as zero, and writing beyond it grows it. The meaning of
/// a slot index is defined by the [`EventTypeSet`] of the trace data
/// holding this vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CostVec {
    slots: [SubCost; MAX_REAL],
    used: usize,
}

impl CostVec {
    /// Creates an empty vector with no populated slots.
    pub fn new() -> Self {
        CostVec::default()
    }

    /// Resets all counters to zero and the used count to zero.
    pub fn clear(&mut self) {
        *self = CostVec::default();
    }

    /// Number of leading slots that are populated.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns true if every populated slot is zero.
    pub fn is_zero(&self) -> bool {
        self.slots[..self.used].iter().all(|c| c.value() == 0)
    }

    /// Reads the counter at `index`; unpopulated slots read as zero.
    pub fn subcost(&self, index: usize) -> SubCost {
        if index < self.used {
            self.slots[index]
        } else {
            SubCost::ZERO
        }
    }

    /// Adds `value` to the counter at `index`, growing the used count.
    ///
    /// Indices at or beyond [`MAX_REAL`] are ignored.
    pub fn add_at(&mut self, index: usize, value: SubCost) {
        if index >= MAX_REAL {
            return;
        }
        self.slots[index] += value;
        if index >= self.used {
            self.used = index + 1;
        }
    }

    /// Adds every populated slot of `other` to this vector.
    pub fn add_vec(&mut self, other: &CostVec) {
        for i in 0..other.used {
            self.slots[i] += other.slots[i];
        }
        if other.used > self.used {
            self.used = other.used;
        }
    }

    /// Adds a row of ASCII decimal values under a sub-mapping.
    ///
    /// Reads up to `mapping.count()` whitespace-separated decimal integers
    /// from `row`; each value lands in the catalogue index named by its
    /// column. A partial row terminates cleanly, leaving the remaining
    /// slots untouched. Identity mappings skip the permutation lookup.
    pub fn add_row(&mut self, mapping: &SubMapping, row: &str) {
        let mut rest = row;
        if mapping.is_identity() {
            for index in 0..mapping.count() {
                let Some((value, tail)) = SubCost::parse_ascii(rest) else {
                    return;
                };
                self.add_at(index, value);
                rest = tail;
            }
        } else {
            for column in 0..mapping.count() {
                let Some((value, tail)) = SubCost::parse_ascii(rest) else {
                    return;
                };
                if let Some(index) = mapping.real_index(column) {
                    self.add_at(index, value);
                }
                rest = tail;
            }
        }
    }

    /// Zeroes the vector, then adds a row under a sub-mapping.
    pub fn set_row(&mut self, mapping: &SubMapping, row: &str) {
        self.clear();
        self.add_row(mapping, row);
    }

    /// Per-slot absolute difference between two vectors.
    pub fn diff(&self, other: &CostVec) -> CostVec {
        let used = self.used.max(other.used);
        let mut out = CostVec::new();
        for i in 0..used {
            let a = self.subcost(i).value();
            let b = other.subcost(i).value();
            out.add_at(i, SubCost::new(a.abs_diff(b)));
        }
        out
    }

    /// Renders the populated slots as `name: value` pairs.
    ///
    /// Slots without a registered real event type are skipped.
    pub fn pretty(&self, set: &EventTypeSet) -> String {
        let mut out = String::new();
        for i in 0..self.used {
            let Some(name) = set.real_name(i) else { continue };
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(&self.slots[i].pretty());
        }
        out
    }
}
