//! Event types, derived-metric formulae, and the known-types registry.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::costvec::{CostVec, MAX_REAL};
use crate::error::EventError;
use crate::mapping::EventTypeSet;
use crate::subcost::SubCost;

/// A cost event type, e.g. "L1 Read Miss", short "l1rm".
///
/// *Real* event types name a column read directly from a part file and
/// carry its catalogue index. *Derived* event types carry a formula over
/// real (and other derived) short names, e.g. `"l1rm + l2rm"`; the formula
/// is parsed lazily into a dense coefficient vector plus a constant slot,
/// and the value is the dot product with a cost vector.
#[derive(Clone, Debug)]
pub struct EventType {
    name: String,
    long_name: String,
    formula: Option<String>,
    real_index: Option<usize>,
    pub(crate) parse: ParseState,
    pub(crate) coefficients: [i64; MAX_REAL],
    pub(crate) constant: i64,
}

/// Parse progress of a derived event type's formula.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ParseState {
    /// Not parsed yet; real types are born in this state too but never
    /// consult it.
    Pending,
    /// Coefficients and constant are valid.
    Parsed,
    /// The formula failed to resolve; the type reads as zero.
    Failed,
}

impl EventType {
    pub(crate) fn new_real(
        name: impl Into<String>,
        long_name: impl Into<String>,
        real_index: usize,
    ) -> Self {
        EventType {
            name: name.into(),
            long_name: long_name.into(),
            formula: None,
            real_index: Some(real_index),
            parse: ParseState::Pending,
            coefficients: [0; MAX_REAL],
            constant: 0,
        }
    }

    pub(crate) fn new_derived(
        name: impl Into<String>,
        long_name: impl Into<String>,
        formula: impl Into<String>,
    ) -> Self {
        EventType {
            name: name.into(),
            long_name: long_name.into(),
            formula: Some(formula.into()),
            real_index: None,
            parse: ParseState::Pending,
            coefficients: [0; MAX_REAL],
            constant: 0,
        }
    }

    /// Short identifier, e.g. "l1rm".
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Long human-readable name, e.g. "L1 Read Miss".
    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    /// The formula of a derived type; `None` for real types.
    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    /// The catalogue index of a real type; `None` for derived types.
    pub fn real_index(&self) -> Option<usize> {
        self.real_index
    }

    /// Returns true if this type's value is read directly from part files.
    pub fn is_real(&self) -> bool {
        self.real_index.is_some()
    }

    /// Renders the parsed formula from its coefficients.
    ///
    /// Returns `None` for real types and for formulae that failed to
    /// parse. The rendering is normalized: terms appear in catalogue
    /// order with explicit coefficients.
    pub fn parsed_formula(&self, set: &EventTypeSet) -> Option<String> {
        if self.is_real() || self.parse != ParseState::Parsed {
            return None;
        }
        let mut out = String::new();
        for (i, &coeff) in self.coefficients.iter().enumerate() {
            if coeff == 0 {
                continue;
            }
            let Some(name) = set.real_name(i) else { continue };
            if out.is_empty() {
                if coeff < 0 {
                    out.push_str("- ");
                }
            } else if coeff < 0 {
                out.push_str(" - ");
            } else {
                out.push_str(" + ");
            }
            let magnitude = coeff.unsigned_abs();
            if magnitude != 1 {
                out.push_str(&magnitude.to_string());
                out.push_str(" * ");
            }
            out.push_str(name);
        }
        if self.constant != 0 || out.is_empty() {
            if out.is_empty() {
                out.push_str(&self.constant.to_string());
            } else if self.constant < 0 {
                out.push_str(" - ");
                out.push_str(&self.constant.unsigned_abs().to_string());
            } else {
                out.push_str(" + ");
                out.push_str(&self.constant.to_string());
            }
        }
        Some(out)
    }
}

/// Per-real-index contribution fractions of a derived event type.
///
/// Suitable for a partitioned colour display: each fraction is
/// `coeff[i] * vector[i] / total` for the vector it was computed from.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Histogram {
    fractions: [f64; MAX_REAL],
}

impl Histogram {
    pub(crate) fn new(fractions: [f64; MAX_REAL]) -> Self {
        Histogram { fractions }
    }

    /// The contribution fraction of real index `index`.
    pub fn fraction(&self, index: usize) -> f64 {
        if index < MAX_REAL {
            self.fractions[index]
        } else {
            0.0
        }
    }
}

/// Evaluates a parsed coefficient vector against a cost vector.
///
/// Accumulates in 128 bits and clamps the result into the `u64` range:
/// costs are non-negative by policy, so a formula like `a - b` floors at
/// zero instead of wrapping.
pub(crate) fn evaluate(
    coefficients: &[i64; MAX_REAL],
    constant: i64,
    vector: &CostVec,
) -> SubCost {
    let mut acc = i128::from(constant);
    for (i, &coeff) in coefficients.iter().enumerate() {
        acc += i128::from(coeff) * i128::from(vector.subcost(i).value());
    }
    if acc <= 0 {
        SubCost::ZERO
    } else if acc >= i128::from(u64::MAX) {
        SubCost::new(u64::MAX)
    } else {
        SubCost::new(acc as u64)
    }
}

/// Parses a derived-metric formula into dense coefficients plus constant.
///
/// Grammar: `term (('+'|'-') term)*` with
/// `term := [coefficient '*'] short-name | coefficient`. Bare integer
/// terms land in the constant slot. Names resolve against the real scope
/// first, then the derived scope; derived references expand transitively.
/// `visiting` carries the names currently being expanded so that a
/// transitive self-reference fails instead of recursing forever.
pub(crate) fn parse_formula(
    set: &EventTypeSet,
    formula: &str,
    visiting: &mut Vec<String>,
) -> Result<([i64; MAX_REAL], i64), EventError> {
    let mut coefficients = [0i64; MAX_REAL];
    let mut constant = 0i64;
    let mut rest = formula.trim();
    let mut first = true;

    while !rest.is_empty() {
        // Sign between terms; a leading sign is allowed on the first term.
        let mut sign = 1i64;
        if first {
            if let Some(tail) = rest.strip_prefix('-') {
                sign = -1;
                rest = tail.trim_start();
            } else if let Some(tail) = rest.strip_prefix('+') {
                rest = tail.trim_start();
            }
            first = false;
        } else if let Some(tail) = rest.strip_prefix('+') {
            rest = tail.trim_start();
        } else if let Some(tail) = rest.strip_prefix('-') {
            sign = -1;
            rest = tail.trim_start();
        } else {
            return Err(EventError::malformed_formula(format!(
                "expected '+' or '-' before '{rest}'"
            )));
        }

        // Optional integer coefficient.
        let mut coefficient = 1i64;
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 {
            let (number, tail) = rest.split_at(digits);
            coefficient = number.parse::<i64>().map_err(|_| {
                EventError::malformed_formula(format!(
                    "coefficient '{number}' out of range"
                ))
            })?;
            rest = tail.trim_start();
            if let Some(tail) = rest.strip_prefix('*') {
                rest = tail.trim_start();
            } else {
                // Bare integer term: constant contribution.
                constant = constant.saturating_add(sign.saturating_mul(coefficient));
                continue;
            }
        }

        // Short name.
        let name_len = rest
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        if name_len == 0 {
            return Err(EventError::malformed_formula(format!(
                "expected event name at '{rest}'"
            )));
        }
        let (name, tail) = rest.split_at(name_len);
        rest = tail.trim_start();

        let scale = sign.saturating_mul(coefficient);
        if let Some(index) = set.real_index_of(name) {
            coefficients[index] = coefficients[index].saturating_add(scale);
        } else if let Some(derived) = set.derived_by_name(name) {
            if visiting.iter().any(|v| v == name) {
                return Err(EventError::cyclic_formula(name));
            }
            let Some(sub_formula) = derived.formula().map(str::to_owned)
            else {
                return Err(EventError::unknown_event_type(name));
            };
            visiting.push(name.to_string());
            let (sub_coefficients, sub_constant) =
                parse_formula(set, &sub_formula, visiting)?;
            visiting.pop();
            for i in 0..MAX_REAL {
                coefficients[i] = coefficients[i]
                    .saturating_add(scale.saturating_mul(sub_coefficients[i]));
            }
            constant =
                constant.saturating_add(scale.saturating_mul(sub_constant));
        } else {
            return Err(EventError::unknown_event_type(name));
        }
    }

    Ok((coefficients, constant))
}

/// A well-known event type in the process-wide registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnownType {
    /// Short identifier, e.g. "l1m".
    pub name: String,
    /// Long human-readable name.
    pub long_name: String,
    /// Formula over other short names; `None` for a real type whose long
    /// name should be adopted when the type appears in a part file.
    pub formula: Option<String>,
}

static KNOWN_TYPES: RwLock<Vec<KnownType>> = RwLock::new(Vec::new());

/// Registers a well-known event type.
///
/// The registry is process-wide and append-only; registrations must
/// happen at startup, before any trace data is constructed.
pub fn register_known_type(known: KnownType) {
    debug!(name = %known.name, "registering known event type");
    KNOWN_TYPES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(known);
}

/// Returns a snapshot of the known-types registry.
pub fn known_types() -> Vec<KnownType> {
    KNOWN_TYPES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> EventTypeSet {
        let mut set = EventTypeSet::new();
        set.sub_mapping("Ir Dr Dw").unwrap();
        set
    }

    #[test]
    fn test_parse_simple_sum() {
        let set = catalogue();
        let (coefficients, constant) =
            parse_formula(&set, "Dr + Dw", &mut Vec::new()).unwrap();
        assert_eq!(coefficients[..3], [0, 1, 1]);
        assert_eq!(constant, 0);
    }

    #[test]
    fn test_parse_coefficients_and_constant() {
        let set = catalogue();
        let (coefficients, constant) =
            parse_formula(&set, "10 * Ir - Dr + 5", &mut Vec::new()).unwrap();
        assert_eq!(coefficients[..3], [10, -1, 0]);
        assert_eq!(constant, 5);
    }

    #[test]
    fn test_parse_unknown_name() {
        let set = catalogue();
        let err =
            parse_formula(&set, "Ir + Bogus", &mut Vec::new()).unwrap_err();
        assert!(err.is_unknown_event_type());
    }

    #[test]
    fn test_parse_missing_operator() {
        let set = catalogue();
        let err = parse_formula(&set, "Ir Dr", &mut Vec::new()).unwrap_err();
        assert!(err.is_malformed_formula());
    }

    #[test]
    fn test_derived_reference_expands() {
        let mut set = catalogue();
        set.add_derived("RW", "Reads and writes", "Dr + Dw").unwrap();
        let (coefficients, constant) =
            parse_formula(&set, "Ir + 2 * RW", &mut Vec::new()).unwrap();
        assert_eq!(coefficients[..3], [1, 2, 2]);
        assert_eq!(constant, 0);
    }

    #[test]
    fn test_self_reference_fails() {
        let mut set = catalogue();
        set.add_derived("Bad", "Self-referential", "Ir + Bad").unwrap();
        let mut visiting = vec!["Bad".to_string()];
        let err =
            parse_formula(&set, "Ir + Bad", &mut visiting).unwrap_err();
        assert!(err.is_cyclic_formula());
    }

    #[test]
    fn test_known_types_instantiation() {
        // Names are namespaced to keep this test independent of others
        // sharing the process-wide registry.
        register_known_type(KnownType {
            name: "ktestIr".to_string(),
            long_name: "Instruction Fetch".to_string(),
            formula: None,
        });
        register_known_type(KnownType {
            name: "ktestSum".to_string(),
            long_name: "Fetch plus one".to_string(),
            formula: Some("ktestIr + 1".to_string()),
        });
        register_known_type(KnownType {
            name: "ktestBroken".to_string(),
            long_name: "Unresolvable".to_string(),
            formula: Some("ktestMissing".to_string()),
        });

        let mut set = EventTypeSet::new();
        let id = set.add_real("ktestIr").unwrap();
        // Real types adopt the registered long name.
        assert_eq!(
            set.event_type(id).unwrap().long_name(),
            "Instruction Fetch"
        );

        let added = set.add_known_derived_types();
        assert_eq!(added, 1);
        assert!(set.type_by_name("ktestSum").is_some());
        // The unresolvable formula was dropped again.
        assert!(set.type_by_name("ktestBroken").is_none());
    }

    /// Hosts persist derived-metric definitions as JSON; the registry
    /// entry must survive the round trip.
    #[test]
    fn test_known_type_json_round_trip() {
        let known = KnownType {
            name: "l1m".to_string(),
            long_name: "L1 Miss Sum".to_string(),
            formula: Some("l1mr + l1mw".to_string()),
        };
        let json = serde_json::to_string(&known).unwrap();
        let parsed: KnownType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, known.name);
        assert_eq!(parsed.long_name, known.long_name);
        assert_eq!(parsed.formula, known.formula);

        let real: KnownType =
            serde_json::from_str(r#"{"name":"Ir","long_name":"Instruction Fetch","formula":null}"#)
                .unwrap();
        assert!(real.formula.is_none());
    }

    #[test]
    fn test_evaluate_clamps_at_zero() {
        let mut coefficients = [0i64; MAX_REAL];
        coefficients[0] = -1;
        let mut v = CostVec::new();
        v.add_at(0, SubCost::new(100));
        assert_eq!(evaluate(&coefficients, 0, &v), SubCost::ZERO);
        assert_eq!(evaluate(&coefficients, 150, &v), SubCost::new(50));
    }
}
