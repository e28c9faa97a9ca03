//! Calls between functions and their per-position refinements.

use calltrace_events::CallCost;

use crate::ids::{
    CallId, FunctionId, InstrCallId, InstrId, LineCallId, LineId, PartId,
};
use crate::pool::FixIdx;

/// Cost of a call between two functions within one part.
#[derive(Debug)]
pub struct PartCall {
    pub(crate) part: PartId,
    pub(crate) cost: CallCost,
    pub(crate) fix_call_costs: Vec<FixIdx>,
}

impl PartCall {
    pub(crate) fn new(part: PartId) -> Self {
        PartCall {
            part,
            cost: CallCost::new(),
            fix_call_costs: Vec::new(),
        }
    }

    /// The part this cost was read from.
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Call cost and count within the part.
    pub fn cost(&self) -> &CallCost {
        &self.cost
    }
}

/// Cost of a call site at one position within one part. Immutable once
/// materialized.
#[derive(Clone, Copy, Debug)]
pub struct PartCallCost {
    pub(crate) part: PartId,
    pub(crate) cost: CallCost,
}

impl PartCallCost {
    /// The part this cost was read from.
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Call cost and count at this position within the part.
    pub fn cost(&self) -> &CallCost {
        &self.cost
    }
}

/// A call from one function to another, aggregated over all call sites.
///
/// A call whose caller and called function coincide is recursive; it is
/// marked and retained, but its cost is never promoted into inclusive
/// sums.
#[derive(Debug)]
pub struct Call {
    pub(crate) caller: FunctionId,
    pub(crate) called: FunctionId,
    pub(crate) recursive: bool,
    pub(crate) part_calls: Vec<PartCall>,
    pub(crate) line_calls: Vec<LineCallId>,
    pub(crate) instr_calls: Vec<InstrCallId>,
    pub(crate) dirty: bool,
    pub(crate) cost: CallCost,
}

impl Call {
    pub(crate) fn new(caller: FunctionId, called: FunctionId) -> Self {
        Call {
            caller,
            called,
            recursive: caller == called,
            part_calls: Vec::new(),
            line_calls: Vec::new(),
            instr_calls: Vec::new(),
            dirty: true,
            cost: CallCost::new(),
        }
    }

    /// The calling function.
    pub fn caller(&self) -> FunctionId {
        self.caller
    }

    /// The called function.
    pub fn called(&self) -> FunctionId {
        self.called
    }

    /// Returns true if the function calls itself.
    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Per-part costs of this call.
    pub fn part_calls(&self) -> &[PartCall] {
        &self.part_calls
    }

    /// Line-level call sites, materialized lazily.
    pub fn line_calls(&self) -> &[LineCallId] {
        &self.line_calls
    }

    /// Instruction-level call sites, materialized lazily.
    pub fn instr_calls(&self) -> &[InstrCallId] {
        &self.instr_calls
    }

    /// Finds or creates the per-part cost record for a part.
    pub(crate) fn part_call_mut(&mut self, part: PartId) -> &mut PartCall {
        let position = match self.part_calls.last() {
            Some(last) if last.part == part => {
                Some(self.part_calls.len() - 1)
            }
            _ => self.part_calls.iter().position(|pc| pc.part == part),
        };
        let index = match position {
            Some(index) => index,
            None => {
                self.part_calls.push(PartCall::new(part));
                self.part_calls.len() - 1
            }
        };
        &mut self.part_calls[index]
    }
}

/// A call aggregated at a specific source line.
#[derive(Debug)]
pub struct LineCall {
    pub(crate) call: CallId,
    pub(crate) line: LineId,
    pub(crate) items: Vec<PartCallCost>,
    pub(crate) dirty: bool,
    pub(crate) cost: CallCost,
}

impl LineCall {
    pub(crate) fn new(call: CallId, line: LineId) -> Self {
        LineCall {
            call,
            line,
            items: Vec::new(),
            dirty: true,
            cost: CallCost::new(),
        }
    }

    /// The function-level call this site belongs to.
    pub fn call(&self) -> CallId {
        self.call
    }

    /// The source line of the call site.
    pub fn line(&self) -> LineId {
        self.line
    }

    /// Per-part cost leaves.
    pub fn items(&self) -> &[PartCallCost] {
        &self.items
    }
}

/// A call aggregated at a specific instruction address.
#[derive(Debug)]
pub struct InstrCall {
    pub(crate) call: CallId,
    pub(crate) instr: InstrId,
    pub(crate) items: Vec<PartCallCost>,
    pub(crate) dirty: bool,
    pub(crate) cost: CallCost,
}

impl InstrCall {
    pub(crate) fn new(call: CallId, instr: InstrId) -> Self {
        InstrCall {
            call,
            instr,
            items: Vec::new(),
            dirty: true,
            cost: CallCost::new(),
        }
    }

    /// The function-level call this site belongs to.
    pub fn call(&self) -> CallId {
        self.call
    }

    /// The instruction address of the call site.
    pub fn instr(&self) -> InstrId {
        self.instr
    }

    /// Per-part cost leaves.
    pub fn items(&self) -> &[PartCallCost] {
        &self.items
    }
}
