//! The event type catalogue and part-file column sub-mappings.

use tracing::debug;

use crate::costvec::{CostVec, MAX_REAL};
use crate::error::EventError;
use crate::event::{
    self, EventType, Histogram, ParseState, known_types,
};
use crate::subcost::SubCost;

/// Identifier of an event type within an [`EventTypeSet`].
///
/// Real types occupy `[0, MAX_REAL)` and derived types
/// `[MAX_REAL, 2 * MAX_REAL)`; both scopes share this numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTypeId(usize);

impl EventTypeId {
    /// Returns true if this id names a real (file-backed) event type.
    pub fn is_real(self) -> bool {
        self.0 < MAX_REAL
    }

    /// The raw catalogue index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// The catalogue of event types for one trace data set.
///
/// Holds up to [`MAX_REAL`] real and [`MAX_REAL`] derived types. Short
/// names are unique within each scope; lookups consult the real scope
/// first.
#[derive(Clone, Debug, Default)]
pub struct EventTypeSet {
    real: Vec<EventType>,
    derived: Vec<EventType>,
}

impl EventTypeSet {
    /// Creates an empty catalogue.
    pub fn new() -> Self {
        EventTypeSet::default()
    }

    /// Number of real event types.
    pub fn real_count(&self) -> usize {
        self.real.len()
    }

    /// Number of derived event types.
    pub fn derived_count(&self) -> usize {
        self.derived.len()
    }

    /// Returns the id of the first real event type, the primary metric.
    pub fn primary(&self) -> Option<EventTypeId> {
        if self.real.is_empty() {
            None
        } else {
            Some(EventTypeId(0))
        }
    }

    /// Adds a real event type, or returns the existing one by that name.
    ///
    /// New types adopt the long name registered for them in the
    /// known-types registry, if any.
    pub fn add_real(
        &mut self,
        name: &str,
    ) -> Result<EventTypeId, EventError> {
        if let Some(index) = self.real_index_of(name) {
            return Ok(EventTypeId(index));
        }
        if self.real.len() == MAX_REAL {
            return Err(EventError::catalogue_full("real"));
        }
        let long_name = known_types()
            .iter()
            .find(|k| k.formula.is_none() && k.name == name)
            .map_or_else(|| name.to_string(), |k| k.long_name.clone());
        let index = self.real.len();
        self.real.push(EventType::new_real(name, long_name, index));
        Ok(EventTypeId(index))
    }

    /// Adds a derived event type with the given formula.
    ///
    /// The formula is parsed lazily on first evaluation; a formula that
    /// fails to resolve makes the type read as zero.
    pub fn add_derived(
        &mut self,
        name: &str,
        long_name: &str,
        formula: &str,
    ) -> Result<EventTypeId, EventError> {
        if self.type_by_name(name).is_some() {
            return Err(EventError::duplicate_event_type(name));
        }
        if self.derived.len() == MAX_REAL {
            return Err(EventError::catalogue_full("derived"));
        }
        let index = self.derived.len();
        self.derived
            .push(EventType::new_derived(name, long_name, formula));
        Ok(EventTypeId(MAX_REAL + index))
    }

    /// Instantiates every known derived type whose formula parses against
    /// the current catalogue. Returns the number of types added.
    pub fn add_known_derived_types(&mut self) -> usize {
        let mut added = 0;
        for known in known_types() {
            let Some(formula) = &known.formula else { continue };
            if self.type_by_name(&known.name).is_some() {
                continue;
            }
            let Ok(id) =
                self.add_derived(&known.name, &known.long_name, formula)
            else {
                break; // derived scope full
            };
            self.ensure_parsed(id);
            if self.derived[id.index() - MAX_REAL].parse
                == ParseState::Parsed
            {
                added += 1;
            } else {
                self.derived.pop();
            }
        }
        debug!(added, "instantiated known derived event types");
        added
    }

    /// Looks up an event type id by short name, real scope first.
    pub fn type_by_name(&self, name: &str) -> Option<EventTypeId> {
        if let Some(index) = self.real_index_of(name) {
            return Some(EventTypeId(index));
        }
        self.derived
            .iter()
            .position(|t| t.name() == name)
            .map(|index| EventTypeId(MAX_REAL + index))
    }

    /// The event type behind an id, if it exists in this catalogue.
    pub fn event_type(&self, id: EventTypeId) -> Option<&EventType> {
        if id.is_real() {
            self.real.get(id.0)
        } else {
            self.derived.get(id.0 - MAX_REAL)
        }
    }

    /// The short name of the real type at a catalogue index.
    pub fn real_name(&self, index: usize) -> Option<&str> {
        self.real.get(index).map(EventType::name)
    }

    pub(crate) fn real_index_of(&self, name: &str) -> Option<usize> {
        self.real.iter().position(|t| t.name() == name)
    }

    pub(crate) fn derived_by_name(&self, name: &str) -> Option<&EventType> {
        self.derived.iter().find(|t| t.name() == name)
    }

    /// Evaluates an event type against a cost vector.
    ///
    /// Real types read their slot directly; derived types evaluate their
    /// parsed formula. A derived type whose formula failed to resolve
    /// reads as zero, as does an id unknown to this catalogue.
    pub fn value(&mut self, id: EventTypeId, vector: &CostVec) -> SubCost {
        if id.is_real() {
            return vector.subcost(id.0);
        }
        self.ensure_parsed(id);
        match self.derived.get(id.0 - MAX_REAL) {
            Some(t) if t.parse == ParseState::Parsed => {
                event::evaluate(&t.coefficients, t.constant, vector)
            }
            _ => SubCost::ZERO,
        }
    }

    /// Per-real-index contribution fractions of a derived type's value.
    ///
    /// Returns `None` for real types, unparseable formulae, and vectors
    /// with a zero total.
    pub fn histogram(
        &mut self,
        id: EventTypeId,
        vector: &CostVec,
    ) -> Option<Histogram> {
        if id.is_real() {
            return None;
        }
        self.ensure_parsed(id);
        let t = self.derived.get(id.0 - MAX_REAL)?;
        if t.parse != ParseState::Parsed {
            return None;
        }
        let total =
            event::evaluate(&t.coefficients, t.constant, vector).value();
        if total == 0 {
            return None;
        }
        let total = total as f64;
        let mut fractions = [0.0; MAX_REAL];
        for (i, fraction) in fractions.iter_mut().enumerate() {
            let contribution = t.coefficients[i] as f64
                * vector.subcost(i).value() as f64;
            *fraction = contribution / total;
        }
        Some(Histogram::new(fractions))
    }

    fn ensure_parsed(&mut self, id: EventTypeId) {
        let Some(index) = id.0.checked_sub(MAX_REAL) else { return };
        let Some(t) = self.derived.get(index) else { return };
        if t.parse != ParseState::Pending {
            return;
        }
        let name = t.name().to_string();
        let formula = t.formula().map_or_else(String::new, str::to_owned);
        let mut visiting = vec![name.clone()];
        match event::parse_formula(self, &formula, &mut visiting) {
            Ok((coefficients, constant)) => {
                let t = &mut self.derived[index];
                t.coefficients = coefficients;
                t.constant = constant;
                t.parse = ParseState::Parsed;
            }
            Err(err) => {
                debug!(name = %name, %err, "derived event type reads as zero");
                self.derived[index].parse = ParseState::Failed;
            }
        }
    }

    /// Defines a sub-mapping from a whitespace-separated list of short
    /// names, the part file's column order. Unknown names are added to
    /// the real scope.
    pub fn sub_mapping(
        &mut self,
        names: &str,
    ) -> Result<SubMapping, EventError> {
        let mut indices = Vec::new();
        for name in names.split_ascii_whitespace() {
            indices.push(self.add_real(name)?.index());
        }
        Ok(SubMapping::new(indices))
    }
}

/// A fixed-order list mapping a part's column positions to catalogue
/// indices.
///
/// Knows whether it is the identity permutation, the common case that
/// allows skipping the per-column lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubMapping {
    indices: Vec<usize>,
    is_identity: bool,
}

impl SubMapping {
    fn new(indices: Vec<usize>) -> Self {
        let is_identity =
            indices.iter().enumerate().all(|(column, &index)| column == index);
        SubMapping {
            indices,
            is_identity,
        }
    }

    /// Number of columns in this mapping.
    pub fn count(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if column `i` maps to catalogue index `i` throughout.
    pub fn is_identity(&self) -> bool {
        self.is_identity
    }

    /// The catalogue index a column maps to.
    pub fn real_index(&self, column: usize) -> Option<usize> {
        self.indices.get(column).copied()
    }

    /// Iterates over the real catalogue indices in `[0, real_count)` that
    /// this mapping does not populate.
    pub fn unused_real_indices(
        &self,
        real_count: usize,
    ) -> impl Iterator<Item = usize> + '_ {
        (0..real_count.min(MAX_REAL))
            .filter(move |index| !self.indices.contains(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_real_interns() {
        let mut set = EventTypeSet::new();
        let a = set.add_real("Ir").unwrap();
        let b = set.add_real("Ir").unwrap();
        assert_eq!(a, b);
        assert_eq!(set.real_count(), 1);
    }

    #[test]
    fn test_real_scope_full() {
        let mut set = EventTypeSet::new();
        for i in 0..MAX_REAL {
            set.add_real(&format!("e{i}")).unwrap();
        }
        let err = set.add_real("overflow").unwrap_err();
        assert!(err.is_catalogue_full());
    }

    #[test]
    fn test_scopes_share_numbering() {
        let mut set = EventTypeSet::new();
        set.add_real("Ir").unwrap();
        let id = set.add_derived("D", "Derived", "Ir").unwrap();
        assert!(!id.is_real());
        assert_eq!(id.index(), MAX_REAL);
        assert_eq!(set.type_by_name("D"), Some(id));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut set = EventTypeSet::new();
        set.add_real("Ir").unwrap();
        let err = set.add_derived("Ir", "Shadow", "Ir").unwrap_err();
        assert!(err.is_duplicate_event_type());
    }

    #[test]
    fn test_sub_mapping_creates_and_permutes() {
        let mut set = EventTypeSet::new();
        let first = set.sub_mapping("Event1 Cost1 Cost2").unwrap();
        assert!(first.is_identity());
        assert_eq!(first.count(), 3);

        let second = set.sub_mapping("Event2 Cost3 Event1").unwrap();
        assert!(!second.is_identity());
        assert_eq!(second.real_index(0), Some(3));
        assert_eq!(second.real_index(1), Some(4));
        assert_eq!(second.real_index(2), Some(0));
        assert_eq!(set.real_count(), 5);
    }

    #[test]
    fn test_unused_real_indices() {
        let mut set = EventTypeSet::new();
        set.sub_mapping("a b c d").unwrap();
        let partial = set.sub_mapping("d b").unwrap();
        let unused: Vec<usize> =
            partial.unused_real_indices(set.real_count()).collect();
        assert_eq!(unused, vec![0, 2]);
    }

    #[test]
    fn test_failed_formula_reads_zero() {
        let mut set = EventTypeSet::new();
        set.sub_mapping("Ir").unwrap();
        let id = set.add_derived("Bad", "Bad", "Ir + Nope").unwrap();
        let mut v = CostVec::new();
        v.add_at(0, SubCost::new(100));
        assert_eq!(set.value(id, &v), SubCost::ZERO);
        assert!(set.histogram(id, &v).is_none());
    }

    #[test]
    fn test_cyclic_formula_reads_zero() {
        let mut set = EventTypeSet::new();
        set.sub_mapping("Ir").unwrap();
        let a = set.add_derived("A", "A", "B + Ir").unwrap();
        set.add_derived("B", "B", "A").unwrap();
        let mut v = CostVec::new();
        v.add_at(0, SubCost::new(3));
        assert_eq!(set.value(a, &v), SubCost::ZERO);
    }

    /// Scenario: catalogue {Ir, Dr, Dw}, derived RW = Dr + Dw. The vector
    /// [100, 20, 5] has RW = 25 and histogram (0.0, 0.8, 0.2).
    #[test]
    fn test_derived_value_and_histogram() {
        let mut set = EventTypeSet::new();
        let mapping = set.sub_mapping("Ir Dr Dw").unwrap();
        let rw = set.add_derived("RW", "Reads and writes", "Dr + Dw").unwrap();

        let mut v = CostVec::new();
        v.add_row(&mapping, "100 20 5");

        assert_eq!(set.value(rw, &v), SubCost::new(25));
        let histogram = set.histogram(rw, &v).unwrap();
        assert!((histogram.fraction(0) - 0.0).abs() < f64::EPSILON);
        assert!((histogram.fraction(1) - 0.8).abs() < f64::EPSILON);
        assert!((histogram.fraction(2) - 0.2).abs() < f64::EPSILON);
    }

    proptest::proptest! {
        /// Derived values are linear: for coefficients c,
        /// value(v) == sum of c[i] * v[i] plus the constant.
        #[test]
        fn test_derived_linearity(
            values in proptest::collection::vec(0u64..1_000_000, 3),
            ca in 0i64..100,
            cb in 0i64..100,
            constant in 0i64..1000,
        ) {
            let mut set = EventTypeSet::new();
            let mapping = set.sub_mapping("a b c").unwrap();
            let formula = format!("{ca} * a + {cb} * b + {constant}");
            let id = set.add_derived("lin", "Linear", &formula).unwrap();

            let mut v = CostVec::new();
            let row = format!("{} {} {}", values[0], values[1], values[2]);
            v.add_row(&mapping, &row);

            let expected = ca as u64 * values[0]
                + cb as u64 * values[1]
                + constant as u64;
            proptest::prop_assert_eq!(set.value(id, &v).value(), expected);
        }
    }

    #[test]
    fn test_parsed_formula_rendering() {
        let mut set = EventTypeSet::new();
        set.sub_mapping("Ir Dr").unwrap();
        let id = set.add_derived("W", "Weighted", "2 * Ir + Dr").unwrap();
        let mut v = CostVec::new();
        v.add_at(0, SubCost::new(1));
        // Force the lazy parse.
        set.value(id, &v);
        let set_view = set.clone();
        let t = set_view.event_type(id).unwrap();
        assert_eq!(
            t.parsed_formula(&set_view).as_deref(),
            Some("2 * Ir + Dr")
        );
    }
}
