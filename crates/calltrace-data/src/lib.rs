//! In-memory relational graph of profiling entities.
//!
//! This crate ingests profiling event streams produced by an
//! instruction-level emulator (one or more *part* files per profiled
//! command) and assembles them into a queryable graph of instructions,
//! source lines, calls, jumps, functions, classes, files, and binary
//! objects, with an aggregation engine driving arbitrary cost metrics
//! over it.
//!
//! ## Cost summation
//!
//! The smallest cost-bearing records are per-part and fixed: they are
//! read from a part file once and never change. Everything above them is
//! a sum, computed lazily on demand and cached until invalidated:
//!
//! | Entity                  | Kind    | Summation of |
//! |-------------------------|---------|--------------|
//! | part line/instr/call    | fixed   | fix records of one part |
//! | part function           | fixed   | its part's cost rows |
//! | line, instr             | dynamic | part leaves (active parts) |
//! | line/instr call site    | dynamic | part call costs (active parts) |
//! | call                    | dynamic | part calls (active parts) |
//! | function                | dynamic | part functions and outgoing calls |
//! | class, file, object     | dynamic | their functions |
//! | trace totals (active)   | dynamic | part totals (active parts) |
//!
//! *Dynamic* sums depend on which parts are in the active set: toggling
//! activation marks them dirty via [`TraceData::invalidate_dynamic_cost`]
//! and they recompute on the next read.
//!
//! ## Ownership
//!
//! [`TraceData`] owns every entity through per-kind arenas; references
//! between entities are stable copyable ids, so the mutual links of the
//! graph (function ↔ call, function ↔ cycle, position ↔ jump) never form
//! ownership cycles. Entities are interned on first use: objects, files,
//! and classes by name, functions by `(name, file, object)`, calls by
//! their endpoint pair, positions within their owning function. Interned
//! entities live exactly as long as the `TraceData`.
//!
//! ## Ingestion
//!
//! The textual part file parser is an external collaborator; it feeds
//! pre-parsed records into a [`PartBuilder`]. Per-position entities are
//! not built eagerly: cost rows land in an arena of immutable fix
//! records, and instruction and line maps materialize from them when a
//! view first asks.
//!
//! ## Cycles
//!
//! [`TraceData::update_function_cycles`] runs a strongly-connected-
//! component analysis over the call graph and exposes each component as
//! a synthetic [`FunctionCycle`]; cycle-internal call edges are withheld
//! from inclusive sums to avoid double counting. The engine is
//! single-threaded; long operations poll a [`ProgressSink`] between
//! parts and between cycles.

mod call;
mod cycle;
mod data;
mod entity;
mod error;
mod function;
mod ids;
mod ingest;
mod jump;
mod part;
mod pool;
mod position;
mod progress;
mod search;

pub use crate::call::{Call, InstrCall, LineCall, PartCall, PartCallCost};
pub use crate::cycle::{CallEndpoint, ContainerCycle, FunctionCycle};
pub use crate::data::{TraceData, split_class_prefix};
pub use crate::entity::{Class, File, Object};
pub use crate::error::TraceError;
pub use crate::function::{
    Function, FunctionCounts, FunctionSource, PartFunction,
};
pub use crate::ids::{
    CallId, ClassId, CycleId, FileId, FunctionId, InstrCallId, InstrId,
    InstrJumpId, LineCallId, LineId, LineJumpId, ObjectId, PartId, SourceId,
};
pub use crate::ingest::PartBuilder;
pub use crate::jump::{InstrJump, LineJump, PartJump};
pub use crate::part::Part;
pub use crate::pool::{FixCallCost, FixCost, FixIdx, FixJump, FixPool};
pub use crate::position::{Instr, Line, PartInstr, PartLine};
pub use crate::progress::{NoProgress, Progress, ProgressSink};
pub use crate::search::{EntityKind, EntityRef};
