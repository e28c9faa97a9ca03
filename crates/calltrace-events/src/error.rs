//! Error types for the calltrace-events crate.

use std::backtrace::Backtrace;
use std::fmt;

/// Error type for the metric catalogue and formula parsing.
///
/// Captures a backtrace on construction and exposes `is_xxx()`
/// classification helpers instead of the internal kind enum.
#[derive(Debug)]
pub struct EventError {
    kind: EventErrorKind,
    backtrace: Backtrace,
}

/// Internal error variants. Not exposed publicly; use `is_xxx()` methods.
#[derive(Debug)]
enum EventErrorKind {
    /// A formula names an event type not present in the catalogue.
    UnknownEventType(String),
    /// A derived event type's formula refers (transitively) to itself.
    CyclicFormula(String),
    /// A formula is not valid under the `term (('+'|'-') term)*` grammar.
    MalformedFormula(String),
    /// The catalogue already holds the maximal number of types of a scope.
    CatalogueFull(&'static str),
    /// An event type with this short name already exists.
    DuplicateEventType(String),
}

impl EventError {
    /// Creates an error for a formula naming an unknown event type.
    pub(crate) fn unknown_event_type(name: impl Into<String>) -> Self {
        Self::new(EventErrorKind::UnknownEventType(name.into()))
    }

    /// Creates an error for a formula referring back to itself.
    pub(crate) fn cyclic_formula(name: impl Into<String>) -> Self {
        Self::new(EventErrorKind::CyclicFormula(name.into()))
    }

    /// Creates an error for a syntactically invalid formula.
    pub(crate) fn malformed_formula(detail: impl Into<String>) -> Self {
        Self::new(EventErrorKind::MalformedFormula(detail.into()))
    }

    /// Creates an error for a full real or derived catalogue scope.
    pub(crate) fn catalogue_full(scope: &'static str) -> Self {
        Self::new(EventErrorKind::CatalogueFull(scope))
    }

    /// Creates an error for a duplicated short name.
    pub(crate) fn duplicate_event_type(name: impl Into<String>) -> Self {
        Self::new(EventErrorKind::DuplicateEventType(name.into()))
    }

    fn new(kind: EventErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Returns true if a formula named an unknown event type.
    pub fn is_unknown_event_type(&self) -> bool {
        matches!(self.kind, EventErrorKind::UnknownEventType(_))
    }

    /// Returns true if a formula referred (transitively) to itself.
    pub fn is_cyclic_formula(&self) -> bool {
        matches!(self.kind, EventErrorKind::CyclicFormula(_))
    }

    /// Returns true if a formula failed to parse.
    pub fn is_malformed_formula(&self) -> bool {
        matches!(self.kind, EventErrorKind::MalformedFormula(_))
    }

    /// Returns true if a catalogue scope is full.
    pub fn is_catalogue_full(&self) -> bool {
        matches!(self.kind, EventErrorKind::CatalogueFull(_))
    }

    /// Returns true if a short name was already taken.
    pub fn is_duplicate_event_type(&self) -> bool {
        matches!(self.kind, EventErrorKind::DuplicateEventType(_))
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventErrorKind::UnknownEventType(name) => {
                write!(f, "unknown event type '{name}' in formula")
            }
            EventErrorKind::CyclicFormula(name) => {
                write!(f, "formula for '{name}' refers to itself")
            }
            EventErrorKind::MalformedFormula(detail) => {
                write!(f, "malformed formula: {detail}")
            }
            EventErrorKind::CatalogueFull(scope) => {
                write!(f, "catalogue holds the maximal number of {scope} event types")
            }
            EventErrorKind::DuplicateEventType(name) => {
                write!(f, "event type '{name}' already exists")
            }
        }
    }
}

impl std::error::Error for EventError {}
