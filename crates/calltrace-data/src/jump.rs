//! Jumps between instruction addresses or source lines.

use calltrace_events::JumpCost;

use crate::ids::{InstrId, LineId, PartId};

/// Jump counts from one part. Immutable once materialized.
#[derive(Clone, Copy, Debug)]
pub struct PartJump {
    pub(crate) part: PartId,
    pub(crate) cost: JumpCost,
}

impl PartJump {
    /// The part these counts were read from.
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Executed/followed counts within the part.
    pub fn cost(&self) -> &JumpCost {
        &self.cost
    }
}

/// A jump from one instruction address to another inside a function.
#[derive(Debug)]
pub struct InstrJump {
    pub(crate) from: InstrId,
    pub(crate) to: InstrId,
    pub(crate) conditional: bool,
    pub(crate) items: Vec<PartJump>,
    pub(crate) dirty: bool,
    pub(crate) cost: JumpCost,
}

impl InstrJump {
    pub(crate) fn new(from: InstrId, to: InstrId, conditional: bool) -> Self {
        InstrJump {
            from,
            to,
            conditional,
            items: Vec::new(),
            dirty: true,
            cost: JumpCost::new(),
        }
    }

    /// The jump source address.
    pub fn from(&self) -> InstrId {
        self.from
    }

    /// The jump target address.
    pub fn to(&self) -> InstrId {
        self.to
    }

    /// Whether this is a conditional jump; for unconditional jumps the
    /// followed count equals the executed count.
    pub fn is_conditional(&self) -> bool {
        self.conditional
    }

    /// Per-part count leaves.
    pub fn items(&self) -> &[PartJump] {
        &self.items
    }
}

/// A jump from one source line to another inside a function.
#[derive(Debug)]
pub struct LineJump {
    pub(crate) from: LineId,
    pub(crate) to: LineId,
    pub(crate) conditional: bool,
    pub(crate) items: Vec<PartJump>,
    pub(crate) dirty: bool,
    pub(crate) cost: JumpCost,
}

impl LineJump {
    pub(crate) fn new(from: LineId, to: LineId, conditional: bool) -> Self {
        LineJump {
            from,
            to,
            conditional,
            items: Vec::new(),
            dirty: true,
            cost: JumpCost::new(),
        }
    }

    /// The jump source line.
    pub fn from(&self) -> LineId {
        self.from
    }

    /// The jump target line.
    pub fn to(&self) -> LineId {
        self.to
    }

    /// Whether this is a conditional jump.
    pub fn is_conditional(&self) -> bool {
        self.conditional
    }

    /// Per-part count leaves.
    pub fn items(&self) -> &[PartJump] {
        &self.items
    }
}
