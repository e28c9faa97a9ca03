//! Functions, their per-part costs, and per-source-file line holders.

use std::collections::BTreeMap;

use calltrace_events::{CostVec, InclusiveCost, SubCost};

use crate::ids::{
    CallId, ClassId, CycleId, FileId, FunctionId, InstrId, LineId, ObjectId,
    PartId, SourceId,
};
use crate::pool::FixIdx;

/// Cost of a function from a single part.
///
/// The self cost accumulates as cost rows arrive; the fix lists keep the
/// raw records for the lazy materialization of instruction and line maps.
/// Part functions never recompute.
#[derive(Debug)]
pub struct PartFunction {
    pub(crate) part: PartId,
    pub(crate) self_cost: CostVec,
    pub(crate) fix_costs: Vec<FixIdx>,
    pub(crate) fix_jumps: Vec<FixIdx>,
}

impl PartFunction {
    pub(crate) fn new(part: PartId) -> Self {
        PartFunction {
            part,
            self_cost: CostVec::new(),
            fix_costs: Vec::new(),
            fix_jumps: Vec::new(),
        }
    }

    /// The part this cost was read from.
    pub fn part(&self) -> PartId {
        self.part
    }

    /// Self cost of the function within this part.
    pub fn self_cost(&self) -> &CostVec {
        &self.self_cost
    }
}

/// A traced function.
///
/// Owns its outgoing calls, its per-source-file line holders, and its
/// address map, which is lazily filled from the part functions' fix
/// lists. References exactly one declaration file and one object, but may
/// own multiple sources when code was inlined from other files.
#[derive(Debug)]
pub struct Function {
    pub(crate) name: String,
    pub(crate) class: ClassId,
    pub(crate) file: FileId,
    pub(crate) object: ObjectId,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) callings: Vec<CallId>,
    pub(crate) callers: Vec<CallId>,
    pub(crate) part_functions: Vec<PartFunction>,
    pub(crate) instrs: BTreeMap<u64, InstrId>,
    pub(crate) instrs_filled: bool,
    pub(crate) lines_filled: bool,
    pub(crate) cycle: Option<CycleId>,
    pub(crate) dirty: bool,
    pub(crate) cost: InclusiveCost,
    pub(crate) called_count: SubCost,
    pub(crate) calling_count: SubCost,
    pub(crate) called_contexts: u32,
    pub(crate) calling_contexts: u32,
}

impl Function {
    pub(crate) fn new(
        name: impl Into<String>,
        class: ClassId,
        file: FileId,
        object: ObjectId,
    ) -> Self {
        Function {
            name: name.into(),
            class,
            file,
            object,
            sources: Vec::new(),
            callings: Vec::new(),
            callers: Vec::new(),
            part_functions: Vec::new(),
            instrs: BTreeMap::new(),
            instrs_filled: false,
            lines_filled: false,
            cycle: None,
            dirty: true,
            cost: InclusiveCost::new(),
            called_count: SubCost::ZERO,
            calling_count: SubCost::ZERO,
            called_contexts: 0,
            calling_contexts: 0,
        }
    }

    /// The full function name, including any class prefix and signature.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The class this function belongs to.
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// The declaration file.
    pub fn file(&self) -> FileId {
        self.file
    }

    /// The object the function's code lives in.
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Per-source-file line holders, declaration file first.
    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    /// Outgoing calls, owned by this function.
    pub fn callings(&self) -> &[CallId] {
        &self.callings
    }

    /// Incoming calls (back-references).
    pub fn callers(&self) -> &[CallId] {
        &self.callers
    }

    /// Per-part costs of this function.
    pub fn part_functions(&self) -> &[PartFunction] {
        &self.part_functions
    }

    /// The cycle this function is a member of, if any.
    pub fn cycle(&self) -> Option<CycleId> {
        self.cycle
    }

    /// Lowest instruction address with attributed cost.
    ///
    /// `None` until the address map has been filled via
    /// `TraceData::ensure_instrs`, or when no costs were attributed by
    /// address.
    pub fn first_address(&self) -> Option<u64> {
        self.instrs.keys().next().copied()
    }

    /// Highest instruction address with attributed cost. Same fill
    /// caveat as [`Self::first_address`].
    pub fn last_address(&self) -> Option<u64> {
        self.instrs.keys().next_back().copied()
    }

    /// Finds the per-part cost record for a part, if the part touched
    /// this function.
    pub fn find_part_function(&self, part: PartId) -> Option<&PartFunction> {
        // Ingest appends to the same part repeatedly, so the record
        // looked for is almost always the last one.
        match self.part_functions.last() {
            Some(last) if last.part == part => self.part_functions.last(),
            _ => self.part_functions.iter().find(|pf| pf.part == part),
        }
    }

    /// Mutable variant of [`Self::find_part_function`], creating the
    /// record on first touch.
    pub(crate) fn part_function_mut(
        &mut self,
        part: PartId,
    ) -> &mut PartFunction {
        let position = match self.part_functions.last() {
            Some(last) if last.part == part => {
                Some(self.part_functions.len() - 1)
            }
            _ => self.part_functions.iter().position(|pf| pf.part == part),
        };
        let index = match position {
            Some(index) => index,
            None => {
                self.part_functions.push(PartFunction::new(part));
                self.part_functions.len() - 1
            }
        };
        &mut self.part_functions[index]
    }
}

/// Call-count metrics of a function over the active parts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FunctionCounts {
    /// How often the function was called.
    pub called_count: SubCost,
    /// How often the function called others.
    pub calling_count: SubCost,
    /// Number of distinct functions calling this one.
    pub called_contexts: u32,
    /// Number of distinct functions called from this one.
    pub calling_contexts: u32,
}

/// The lines of one function within one source file.
///
/// With inlining, lines of the same function can come from different
/// source files; each source file used gets one holder. The line map is
/// filled lazily together with the owning function's.
#[derive(Debug)]
pub struct FunctionSource {
    pub(crate) function: FunctionId,
    pub(crate) file: FileId,
    pub(crate) lines: BTreeMap<u32, LineId>,
}

impl FunctionSource {
    pub(crate) fn new(function: FunctionId, file: FileId) -> Self {
        FunctionSource {
            function,
            file,
            lines: BTreeMap::new(),
        }
    }

    /// The owning function.
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// The file these lines live in.
    pub fn file(&self) -> FileId {
        self.file
    }

    /// The lineno-ordered line map. Empty until the owning function's
    /// lines are materialized.
    pub fn lines(&self) -> &BTreeMap<u32, LineId> {
        &self.lines
    }

    /// Lowest line number with attributed cost in this source file.
    ///
    /// `None` until the line map has been filled via
    /// `TraceData::ensure_lines`, or when no costs were attributed by
    /// line.
    pub fn first_lineno(&self) -> Option<u32> {
        self.lines.keys().next().copied()
    }

    /// Highest line number with attributed cost in this source file.
    /// Same fill caveat as [`Self::first_lineno`].
    pub fn last_lineno(&self) -> Option<u32> {
        self.lines.keys().next_back().copied()
    }
}
