//! The basic cost event counter.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// A single cost event counter.
///
/// Wraps a 64-bit count. Addition saturates; counts never wrap.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct SubCost(u64);

impl SubCost {
    /// The zero counter.
    pub const ZERO: SubCost = SubCost(0);

    /// Creates a counter holding `value`.
    pub fn new(value: u64) -> Self {
        SubCost(value)
    }

    /// Returns the raw count.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Parses a leading ASCII decimal run from `input`.
    ///
    /// Leading ASCII whitespace is skipped. Returns the parsed counter and
    /// the unconsumed rest of the input, or `None` if no digit follows the
    /// whitespace. Digit accumulation saturates at `u64::MAX`.
    pub fn parse_ascii(input: &str) -> Option<(SubCost, &str)> {
        let rest = input.trim_start_matches(|c: char| c.is_ascii_whitespace());
        let digits = rest
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let (number, tail) = rest.split_at(digits);
        let mut value: u64 = 0;
        for b in number.bytes() {
            value = value
                .saturating_mul(10)
                .saturating_add(u64::from(b - b'0'));
        }
        Some((SubCost(value), tail))
    }

    /// Formats the count with a space every three digits, e.g. `1 234 567`.
    pub fn pretty(self) -> String {
        let digits = self.0.to_string();
        let bytes = digits.as_bytes();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 && (bytes.len() - i) % 3 == 0 {
                out.push(' ');
            }
            out.push(char::from(*b));
        }
        out
    }
}

impl From<u64> for SubCost {
    fn from(value: u64) -> Self {
        SubCost(value)
    }
}

impl Add for SubCost {
    type Output = SubCost;

    fn add(self, rhs: SubCost) -> SubCost {
        SubCost(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for SubCost {
    fn add_assign(&mut self, rhs: SubCost) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for SubCost {
    fn sum<I: Iterator<Item = SubCost>>(iter: I) -> SubCost {
        iter.fold(SubCost::ZERO, |acc, c| acc + c)
    }
}

impl fmt::Display for SubCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
