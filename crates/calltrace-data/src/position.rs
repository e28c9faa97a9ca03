//! Per-position entities: instruction addresses and source lines.
//!
//! Both kinds hold their per-part leaves plus outgoing jump and call
//! lists, and aggregate lazily over the active part set. They are only
//! materialized when a view first asks for a function's address map or a
//! source's line map.

use calltrace_events::CostVec;

use crate::ids::{
    FunctionId, InstrCallId, InstrJumpId, LineCallId, LineJumpId, LineId,
    PartId, SourceId,
};

/// Cost of one instruction address from one part. Immutable once built.
#[derive(Clone, Copy, Debug)]
pub struct PartInstr {
    pub(crate) part: PartId,
    pub(crate) cost: CostVec,
}

impl PartInstr {
    /// The part this cost was read from.
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Self cost at this address within the part.
    pub fn cost(&self) -> &CostVec {
        &self.cost
    }
}

/// Cost of one source line from one part. Immutable once built.
#[derive(Clone, Copy, Debug)]
pub struct PartLine {
    pub(crate) part: PartId,
    pub(crate) cost: CostVec,
}

impl PartLine {
    /// The part this cost was read from.
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Self cost at this line within the part.
    pub fn cost(&self) -> &CostVec {
        &self.cost
    }
}

/// A code instruction address of the traced program.
#[derive(Debug)]
pub struct Instr {
    pub(crate) addr: u64,
    pub(crate) function: FunctionId,
    pub(crate) line: Option<LineId>,
    pub(crate) items: Vec<PartInstr>,
    pub(crate) jumps: Vec<InstrJumpId>,
    pub(crate) calls: Vec<InstrCallId>,
    pub(crate) dirty: bool,
    pub(crate) cost: CostVec,
}

impl Instr {
    pub(crate) fn new(addr: u64, function: FunctionId) -> Self {
        Instr {
            addr,
            function,
            line: None,
            items: Vec::new(),
            jumps: Vec::new(),
            calls: Vec::new(),
            dirty: true,
            cost: CostVec::new(),
        }
    }

    /// The memory address.
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// The function owning this address.
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// The source line this address maps to, when known.
    pub fn line(&self) -> Option<LineId> {
        self.line
    }

    /// Per-part cost leaves.
    pub fn items(&self) -> &[PartInstr] {
        &self.items
    }

    /// Jumps touching this address.
    pub fn jumps(&self) -> &[InstrJumpId] {
        &self.jumps
    }

    /// Call sites at this address.
    pub fn calls(&self) -> &[InstrCallId] {
        &self.calls
    }
}

/// A source line of the traced program.
#[derive(Debug)]
pub struct Line {
    pub(crate) lineno: u32,
    pub(crate) source: SourceId,
    pub(crate) items: Vec<PartLine>,
    pub(crate) jumps: Vec<LineJumpId>,
    pub(crate) calls: Vec<LineCallId>,
    pub(crate) dirty: bool,
    pub(crate) cost: CostVec,
}

impl Line {
    pub(crate) fn new(lineno: u32, source: SourceId) -> Self {
        Line {
            lineno,
            source,
            items: Vec::new(),
            jumps: Vec::new(),
            calls: Vec::new(),
            dirty: true,
            cost: CostVec::new(),
        }
    }

    /// The line number.
    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    /// The per-function source file holder this line belongs to.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Per-part cost leaves.
    pub fn items(&self) -> &[PartLine] {
        &self.items
    }

    /// Jumps touching this line.
    pub fn jumps(&self) -> &[LineJumpId] {
        &self.jumps
    }

    /// Call sites at this line.
    pub fn calls(&self) -> &[LineCallId] {
        &self.calls
    }
}
