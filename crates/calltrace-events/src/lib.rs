//! Cost metric model for profiling trace data.
//!
//! This crate defines the metric layer shared by all trace entities:
//!
//! - [`SubCost`]: a single 64-bit event counter with saturating arithmetic
//! - [`CostVec`]: a fixed-width tuple of up to [`MAX_REAL`] counters, the
//!   arithmetic primitive every higher-level trace entity is built on
//! - [`EventType`] / [`EventTypeSet`]: the catalogue of *real* event types
//!   (columns read directly from part files) and *derived* event types
//!   (linear combinations of real ones, given as a formula string)
//! - [`SubMapping`]: the translation from a part file's column order into
//!   catalogue indices
//! - [`JumpCost`], [`CallCost`], [`InclusiveCost`]: the small cost tuples
//!   carried by jumps, calls, and aggregating entities
//!
//! Real and derived event types live in disjoint short-name scopes but
//! share one numbering convention: real indices occupy `[0, MAX_REAL)` and
//! derived indices `[MAX_REAL, 2 * MAX_REAL)`. Derived formulae are parsed
//! lazily on first evaluation; a formula that names an unknown event or
//! refers back to itself is marked unparseable and evaluates to zero from
//! then on.
//!
//! A process-wide [registry](known_types) of well-known derived types can
//! be populated once at startup and instantiated into any catalogue via
//! [`EventTypeSet::add_known_derived_types`].

mod costvec;
mod error;
mod event;
mod items;
mod mapping;
mod subcost;

pub use crate::costvec::{CostVec, MAX_REAL};
pub use crate::error::EventError;
pub use crate::event::{
    EventType, Histogram, KnownType, known_types, register_known_type,
};
pub use crate::items::{CallCost, InclusiveCost, JumpCost};
pub use crate::mapping::{EventTypeId, EventTypeSet, SubMapping};
pub use crate::subcost::SubCost;
