//! The trace database: arenas, interning, and lazy aggregation.

use std::collections::HashMap;

use calltrace_events::{
    CallCost, CostVec, EventTypeId, EventTypeSet, InclusiveCost, JumpCost,
    SubCost,
};
use indexmap::IndexMap;
use tracing::debug;

use crate::call::{Call, InstrCall, LineCall, PartCallCost};
use crate::cycle::{ContainerCycle, FunctionCycle};
use crate::entity::{Class, File, Object};
use crate::error::TraceError;
use crate::function::{Function, FunctionCounts, FunctionSource};
use crate::ids::{
    CallId, ClassId, FileId, FunctionId, InstrCallId, InstrId, InstrJumpId,
    LineCallId, LineId, LineJumpId, ObjectId, PartId, SourceId,
};
use crate::jump::{InstrJump, LineJump, PartJump};
use crate::part::Part;
use crate::pool::{FixCallCost, FixCost, FixJump, FixPool};
use crate::position::{Instr, Line, PartInstr, PartLine};

/// Profiling data of one traced command, assembled from one or more part
/// files.
///
/// Owns every entity through per-kind arenas and interns them by their
/// identity keys: objects, files, and classes by full name, functions by
/// `(name, file, object)`, calls by `(caller, called)`, positions within
/// their owner. Aggregate costs recompute lazily: reads go through
/// `&mut self` accessors that clean dirty entities on demand, filtered to
/// the active part set.
#[derive(Debug, Default)]
pub struct TraceData {
    pub(crate) mapping: EventTypeSet,
    pub(crate) command: String,
    pub(crate) trace_name: String,
    pub(crate) totals: CostVec,
    pub(crate) active_totals: CostVec,
    pub(crate) dirty: bool,
    pub(crate) max_thread_id: u32,
    pub(crate) max_part_number: u32,

    pub(crate) parts: Vec<Part>,
    pub(crate) objects: Vec<Object>,
    pub(crate) object_map: IndexMap<String, ObjectId>,
    pub(crate) files: Vec<File>,
    pub(crate) file_map: IndexMap<String, FileId>,
    pub(crate) classes: Vec<Class>,
    pub(crate) class_map: IndexMap<String, ClassId>,
    pub(crate) functions: Vec<Function>,
    pub(crate) function_keys: HashMap<(String, FileId, ObjectId), FunctionId>,
    pub(crate) sources: Vec<FunctionSource>,
    pub(crate) source_keys: HashMap<(FunctionId, FileId), SourceId>,
    pub(crate) instrs: Vec<Instr>,
    pub(crate) lines: Vec<Line>,
    pub(crate) calls: Vec<Call>,
    pub(crate) call_keys: HashMap<(FunctionId, FunctionId), CallId>,
    pub(crate) instr_jumps: Vec<InstrJump>,
    pub(crate) line_jumps: Vec<LineJump>,
    pub(crate) instr_calls: Vec<InstrCall>,
    pub(crate) line_calls: Vec<LineCall>,

    pub(crate) fix_costs: FixPool<FixCost>,
    pub(crate) fix_jumps: FixPool<FixJump>,
    pub(crate) fix_call_costs: FixPool<FixCallCost>,

    pub(crate) object_bindings: Vec<Option<ObjectId>>,
    pub(crate) file_bindings: Vec<Option<FileId>>,
    pub(crate) function_bindings: Vec<Option<FunctionId>>,

    pub(crate) cycles: Vec<FunctionCycle>,
    pub(crate) class_cycles: Vec<ContainerCycle<ClassId>>,
    pub(crate) file_cycles: Vec<ContainerCycle<FileId>>,
    pub(crate) object_cycles: Vec<ContainerCycle<ObjectId>>,
    pub(crate) in_cycle_update: bool,
    pub(crate) activation_changed: bool,
}

/// Splits a function symbol into its class prefix and short name.
///
/// The class is the prefix before the last `"::"` preceding the signature,
/// so `"kio::Slave::send(int)"` splits into `("kio::Slave", "send(int)")`.
/// Symbols without a prefix get the empty class name, the global
/// pseudo-class.
pub fn split_class_prefix(name: &str) -> (&str, &str) {
    let signature = name.find('(').unwrap_or(name.len());
    match name[..signature].rfind("::") {
        Some(position) => (&name[..position], &name[position + 2..]),
        None => ("", name),
    }
}

impl TraceData {
    /// Creates an empty trace database.
    pub fn new() -> Self {
        TraceData::default()
    }

    // ---------------------------------------------------------------
    // Header-level state and plain accessors
    // ---------------------------------------------------------------

    /// The event type catalogue of this trace.
    pub fn mapping(&self) -> &EventTypeSet {
        &self.mapping
    }

    /// Mutable catalogue access, e.g. for adding derived event types.
    pub fn mapping_mut(&mut self) -> &mut EventTypeSet {
        &mut self.mapping
    }

    /// The traced command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub(crate) fn set_command(&mut self, command: &str) {
        if self.command.is_empty() {
            self.command = command.to_string();
        }
    }

    /// Name of the trace, taken from the first part loaded.
    pub fn trace_name(&self) -> &str {
        &self.trace_name
    }

    /// The trace totals over all accepted parts, independent of the
    /// active set.
    pub fn totals(&self) -> &CostVec {
        &self.totals
    }

    /// The greatest thread id seen in any part header.
    pub fn max_thread_id(&self) -> u32 {
        self.max_thread_id
    }

    /// The greatest part number seen in any part header.
    pub fn max_part_number(&self) -> u32 {
        self.max_part_number
    }

    /// All loaded parts, in load order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Ids of all loaded parts, in load order.
    pub fn part_ids(&self) -> impl Iterator<Item = PartId> {
        (0..self.parts.len()).map(PartId::new)
    }

    /// One part by id.
    pub fn part(&self, id: PartId) -> &Part {
        &self.parts[id.index()]
    }

    /// Ordered view of objects by full name, in first-seen order.
    pub fn object_map(&self) -> &IndexMap<String, ObjectId> {
        &self.object_map
    }

    /// Ordered view of files by full name, in first-seen order.
    pub fn file_map(&self) -> &IndexMap<String, FileId> {
        &self.file_map
    }

    /// Ordered view of classes by full name, in first-seen order.
    pub fn class_map(&self) -> &IndexMap<String, ClassId> {
        &self.class_map
    }

    /// One object by id.
    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()]
    }

    /// One file by id.
    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.index()]
    }

    /// One class by id.
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    /// One function by id.
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    /// Iterates over all functions with their ids, in creation order.
    pub fn functions(
        &self,
    ) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(index, f)| (FunctionId::new(index), f))
    }

    /// One per-function source file holder by id.
    pub fn source(&self, id: SourceId) -> &FunctionSource {
        &self.sources[id.index()]
    }

    /// One instruction by id.
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    /// One line by id.
    pub fn line(&self, id: LineId) -> &Line {
        &self.lines[id.index()]
    }

    /// One call by id.
    pub fn call(&self, id: CallId) -> &Call {
        &self.calls[id.index()]
    }

    /// One line-level call site by id.
    pub fn line_call(&self, id: LineCallId) -> &LineCall {
        &self.line_calls[id.index()]
    }

    /// One instruction-level call site by id.
    pub fn instr_call(&self, id: InstrCallId) -> &InstrCall {
        &self.instr_calls[id.index()]
    }

    /// One line jump by id.
    pub fn line_jump(&self, id: LineJumpId) -> &LineJump {
        &self.line_jumps[id.index()]
    }

    /// One instruction jump by id.
    pub fn instr_jump(&self, id: InstrJumpId) -> &InstrJump {
        &self.instr_jumps[id.index()]
    }

    /// Evaluates an event type against a cost vector.
    pub fn event_value(
        &mut self,
        event: EventTypeId,
        vector: &CostVec,
    ) -> SubCost {
        self.mapping.value(event, vector)
    }

    // ---------------------------------------------------------------
    // Interning factories
    // ---------------------------------------------------------------

    /// Creates a part for one part file and returns its id.
    pub fn add_part(&mut self, dir: &str, file: &str) -> PartId {
        let name = if dir.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", dir.trim_end_matches('/'), file)
        };
        if self.trace_name.is_empty() {
            self.trace_name = name.clone();
        }
        let id = PartId::new(self.parts.len());
        debug!(part = %name, "adding part");
        self.parts.push(Part::new(name));
        id
    }

    /// Interns a binary object by full name.
    pub fn intern_object(&mut self, name: &str) -> ObjectId {
        if let Some(&id) = self.object_map.get(name) {
            return id;
        }
        let id = ObjectId::new(self.objects.len());
        self.objects.push(Object::new(name));
        self.object_map.insert(name.to_string(), id);
        id
    }

    /// Interns a source file by full name.
    pub fn intern_file(&mut self, name: &str) -> FileId {
        if let Some(&id) = self.file_map.get(name) {
            return id;
        }
        let id = FileId::new(self.files.len());
        self.files.push(File::new(name));
        self.file_map.insert(name.to_string(), id);
        id
    }

    /// Interns a class by name; the empty name is the global pseudo-class.
    pub fn intern_class(&mut self, name: &str) -> ClassId {
        if let Some(&id) = self.class_map.get(name) {
            return id;
        }
        let id = ClassId::new(self.classes.len());
        self.classes.push(Class::new(name));
        self.class_map.insert(name.to_string(), id);
        id
    }

    /// Interns the class derived from a function symbol and returns it
    /// together with the symbol's short name.
    pub fn cls<'n>(&mut self, function_name: &'n str) -> (ClassId, &'n str) {
        let (class_name, short_name) = split_class_prefix(function_name);
        (self.intern_class(class_name), short_name)
    }

    /// Interns a function by its `(name, file, object)` identity.
    ///
    /// Creation derives the class from the symbol prefix, registers the
    /// function with its containers, and creates the declaration-file
    /// line holder.
    pub fn intern_function(
        &mut self,
        name: &str,
        file: FileId,
        object: ObjectId,
    ) -> FunctionId {
        let key = (name.to_string(), file, object);
        if let Some(&id) = self.function_keys.get(&key) {
            return id;
        }
        let (class, _) = self.cls(name);
        let id = FunctionId::new(self.functions.len());
        self.functions.push(Function::new(name, class, file, object));
        self.function_keys.insert(key, id);
        self.classes[class.index()].functions.push(id);
        self.files[file.index()].functions.push(id);
        self.objects[object.index()].functions.push(id);
        self.intern_source(id, file);
        debug!(function = name, "interned function");
        id
    }

    /// Interns the line holder of a function for one source file.
    pub fn intern_source(
        &mut self,
        function: FunctionId,
        file: FileId,
    ) -> SourceId {
        if let Some(&id) = self.source_keys.get(&(function, file)) {
            return id;
        }
        let id = SourceId::new(self.sources.len());
        self.sources.push(FunctionSource::new(function, file));
        self.source_keys.insert((function, file), id);
        self.functions[function.index()].sources.push(id);
        self.files[file.index()].sources.push(id);
        id
    }

    /// Interns the call between two functions, wiring the caller's
    /// callings list and the callee's callers list on creation.
    pub fn intern_call(
        &mut self,
        caller: FunctionId,
        called: FunctionId,
    ) -> CallId {
        if let Some(&id) = self.call_keys.get(&(caller, called)) {
            return id;
        }
        let id = CallId::new(self.calls.len());
        self.calls.push(Call::new(caller, called));
        self.call_keys.insert((caller, called), id);
        self.functions[caller.index()].callings.push(id);
        self.functions[called.index()].callers.push(id);
        id
    }

    pub(crate) fn intern_line(
        &mut self,
        source: SourceId,
        lineno: u32,
    ) -> LineId {
        if let Some(&id) = self.sources[source.index()].lines.get(&lineno) {
            return id;
        }
        let id = LineId::new(self.lines.len());
        self.lines.push(Line::new(lineno, source));
        self.sources[source.index()].lines.insert(lineno, id);
        id
    }

    pub(crate) fn intern_instr(
        &mut self,
        function: FunctionId,
        addr: u64,
    ) -> InstrId {
        if let Some(&id) = self.functions[function.index()].instrs.get(&addr)
        {
            return id;
        }
        let id = InstrId::new(self.instrs.len());
        self.instrs.push(Instr::new(addr, function));
        self.functions[function.index()].instrs.insert(addr, id);
        id
    }

    pub(crate) fn intern_line_call(
        &mut self,
        call: CallId,
        line: LineId,
    ) -> LineCallId {
        let existing = self.calls[call.index()]
            .line_calls
            .iter()
            .copied()
            .find(|&id| self.line_calls[id.index()].line == line);
        if let Some(id) = existing {
            return id;
        }
        let id = LineCallId::new(self.line_calls.len());
        self.line_calls.push(LineCall::new(call, line));
        self.calls[call.index()].line_calls.push(id);
        self.lines[line.index()].calls.push(id);
        id
    }

    pub(crate) fn intern_instr_call(
        &mut self,
        call: CallId,
        instr: InstrId,
    ) -> InstrCallId {
        let existing = self.calls[call.index()]
            .instr_calls
            .iter()
            .copied()
            .find(|&id| self.instr_calls[id.index()].instr == instr);
        if let Some(id) = existing {
            return id;
        }
        let id = InstrCallId::new(self.instr_calls.len());
        self.instr_calls.push(InstrCall::new(call, instr));
        self.calls[call.index()].instr_calls.push(id);
        self.instrs[instr.index()].calls.push(id);
        id
    }

    pub(crate) fn intern_line_jump(
        &mut self,
        from: LineId,
        to: LineId,
        conditional: bool,
    ) -> LineJumpId {
        let existing = self.lines[from.index()]
            .jumps
            .iter()
            .copied()
            .find(|&id| {
                let jump = &self.line_jumps[id.index()];
                jump.from == from
                    && jump.to == to
                    && jump.conditional == conditional
            });
        if let Some(id) = existing {
            return id;
        }
        let id = LineJumpId::new(self.line_jumps.len());
        self.line_jumps.push(LineJump::new(from, to, conditional));
        self.lines[from.index()].jumps.push(id);
        if from != to {
            self.lines[to.index()].jumps.push(id);
        }
        id
    }

    pub(crate) fn intern_instr_jump(
        &mut self,
        from: InstrId,
        to: InstrId,
        conditional: bool,
    ) -> InstrJumpId {
        let existing = self.instrs[from.index()]
            .jumps
            .iter()
            .copied()
            .find(|&id| {
                let jump = &self.instr_jumps[id.index()];
                jump.from == from
                    && jump.to == to
                    && jump.conditional == conditional
            });
        if let Some(id) = existing {
            return id;
        }
        let id = InstrJumpId::new(self.instr_jumps.len());
        self.instr_jumps.push(InstrJump::new(from, to, conditional));
        self.instrs[from.index()].jumps.push(id);
        if from != to {
            self.instrs[to.index()].jumps.push(id);
        }
        id
    }

    // ---------------------------------------------------------------
    // Compressed-token factories
    // ---------------------------------------------------------------

    /// Interns an object given in the compressed on-disk form.
    ///
    /// Tokens are `(N)` to reference a bound id, `(N) name` to bind id
    /// `N`, or a plain name. Rebinding an id to a different name fails;
    /// rebinding to the same name is tolerated.
    pub fn compressed_object(
        &mut self,
        token: &str,
    ) -> Result<ObjectId, TraceError> {
        match parse_compressed(token)? {
            None => Ok(self.intern_object(token.trim())),
            Some((index, Some(name))) => {
                if let Some(existing) = binding(&self.object_bindings, index)
                {
                    let bound = self.objects[existing.index()].name();
                    if bound == name {
                        return Ok(existing);
                    }
                    return Err(TraceError::inconsistent_compressed_id(
                        index,
                        format!("object bound to '{bound}', rebound as '{name}'"),
                    ));
                }
                let id = self.intern_object(name);
                bind(&mut self.object_bindings, index, id);
                Ok(id)
            }
            Some((index, None)) => binding(&self.object_bindings, index)
                .ok_or_else(|| {
                    TraceError::inconsistent_compressed_id(
                        index,
                        "reference to unbound object id",
                    )
                }),
        }
    }

    /// Interns a file given in the compressed on-disk form.
    pub fn compressed_file(
        &mut self,
        token: &str,
    ) -> Result<FileId, TraceError> {
        match parse_compressed(token)? {
            None => Ok(self.intern_file(token.trim())),
            Some((index, Some(name))) => {
                if let Some(existing) = binding(&self.file_bindings, index) {
                    let bound = self.files[existing.index()].name();
                    if bound == name {
                        return Ok(existing);
                    }
                    return Err(TraceError::inconsistent_compressed_id(
                        index,
                        format!("file bound to '{bound}', rebound as '{name}'"),
                    ));
                }
                let id = self.intern_file(name);
                bind(&mut self.file_bindings, index, id);
                Ok(id)
            }
            Some((index, None)) => binding(&self.file_bindings, index)
                .ok_or_else(|| {
                    TraceError::inconsistent_compressed_id(
                        index,
                        "reference to unbound file id",
                    )
                }),
        }
    }

    /// Interns a function given in the compressed on-disk form, in the
    /// context of the current file and object.
    ///
    /// Binding `(N) name` when `N` is already bound fails with an
    /// inconsistency error if the names differ, and with an identity
    /// conflict if the name matches but the file or object context does
    /// not.
    pub fn compressed_function(
        &mut self,
        token: &str,
        file: FileId,
        object: ObjectId,
    ) -> Result<FunctionId, TraceError> {
        match parse_compressed(token)? {
            None => Ok(self.intern_function(token.trim(), file, object)),
            Some((index, Some(name))) => {
                if let Some(existing) =
                    binding(&self.function_bindings, index)
                {
                    let bound = &self.functions[existing.index()];
                    if bound.name() != name {
                        return Err(TraceError::inconsistent_compressed_id(
                            index,
                            format!(
                                "function bound to '{}', rebound as '{name}'",
                                bound.name()
                            ),
                        ));
                    }
                    if bound.file() != file || bound.object() != object {
                        return Err(TraceError::identity_conflict(format!(
                            "function '{name}' rebound with a different \
                             file or object"
                        )));
                    }
                    return Ok(existing);
                }
                let id = self.intern_function(name, file, object);
                bind(&mut self.function_bindings, index, id);
                Ok(id)
            }
            Some((index, None)) => binding(&self.function_bindings, index)
                .ok_or_else(|| {
                    TraceError::inconsistent_compressed_id(
                        index,
                        "reference to unbound function id",
                    )
                }),
        }
    }

    // ---------------------------------------------------------------
    // Activation and invalidation
    // ---------------------------------------------------------------

    /// Sets one part's active flag. Returns true if the state changed.
    ///
    /// Callers that care about dynamic aggregates must follow up with
    /// [`Self::invalidate_dynamic_cost`]; coalescing the invalidation
    /// lets bulk toggles pay for one walk.
    pub fn activate_part(&mut self, part: PartId, active: bool) -> bool {
        let changed = self.parts[part.index()].activate(active);
        if changed {
            self.activation_changed = true;
        }
        changed
    }

    /// Sets the active flag on a list of parts. Returns true if any
    /// part's state changed.
    pub fn activate_parts(&mut self, parts: &[PartId], active: bool) -> bool {
        let mut changed = false;
        for &part in parts {
            changed |= self.activate_part(part, active);
        }
        changed
    }

    /// Sets the active flag on all parts. Returns true if any changed.
    pub fn activate_all(&mut self, active: bool) -> bool {
        let ids: Vec<PartId> = self.part_ids().collect();
        self.activate_parts(&ids, active)
    }

    /// Marks every dynamic aggregate dirty after activation changes.
    ///
    /// A no-op when no activation state actually changed since the last
    /// invalidation, so redundant toggles leave clean aggregates alone.
    pub fn invalidate_dynamic_cost(&mut self) {
        if !self.activation_changed {
            return;
        }
        self.activation_changed = false;
        self.invalidate_all();
    }

    pub(crate) fn invalidate_all(&mut self) {
        debug!(
            functions = self.functions.len(),
            "invalidating dynamic aggregates"
        );
        for f in &mut self.functions {
            f.dirty = true;
        }
        for c in &mut self.classes {
            c.dirty = true;
        }
        for f in &mut self.files {
            f.dirty = true;
        }
        for o in &mut self.objects {
            o.dirty = true;
        }
        for c in &mut self.calls {
            c.dirty = true;
        }
        for i in &mut self.instrs {
            i.dirty = true;
        }
        for l in &mut self.lines {
            l.dirty = true;
        }
        for c in &mut self.instr_calls {
            c.dirty = true;
        }
        for c in &mut self.line_calls {
            c.dirty = true;
        }
        for j in &mut self.instr_jumps {
            j.dirty = true;
        }
        for j in &mut self.line_jumps {
            j.dirty = true;
        }
        for c in &mut self.cycles {
            c.dirty = true;
        }
        self.dirty = true;
    }

    // ---------------------------------------------------------------
    // Lazy aggregate reads
    // ---------------------------------------------------------------

    /// The totals over the currently active parts.
    pub fn active_totals(&mut self) -> CostVec {
        if self.dirty && !self.in_cycle_update {
            let mut totals = CostVec::new();
            for part in &self.parts {
                if part.active {
                    totals.add_vec(&part.totals);
                }
            }
            self.active_totals = totals;
            self.dirty = false;
        }
        self.active_totals
    }

    /// Self and inclusive cost of a function over the active parts.
    pub fn function_cost(&mut self, id: FunctionId) -> InclusiveCost {
        self.ensure_function_clean(id);
        self.functions[id.index()].cost
    }

    /// Call-count metrics of a function over the active parts.
    pub fn function_counts(&mut self, id: FunctionId) -> FunctionCounts {
        self.ensure_function_clean(id);
        let f = &self.functions[id.index()];
        FunctionCounts {
            called_count: f.called_count,
            calling_count: f.calling_count,
            called_contexts: f.called_contexts,
            calling_contexts: f.calling_contexts,
        }
    }

    /// Aggregated cost of a class over the active parts.
    pub fn class_cost(&mut self, id: ClassId) -> InclusiveCost {
        if !self.in_cycle_update && self.classes[id.index()].dirty {
            let functions = self.classes[id.index()].functions.clone();
            let cost = self.sum_function_costs(&functions);
            let class = &mut self.classes[id.index()];
            class.cost = cost;
            class.dirty = false;
        }
        self.classes[id.index()].cost
    }

    /// Aggregated cost of a file over the active parts.
    pub fn file_cost(&mut self, id: FileId) -> InclusiveCost {
        if !self.in_cycle_update && self.files[id.index()].dirty {
            let functions = self.files[id.index()].functions.clone();
            let cost = self.sum_function_costs(&functions);
            let file = &mut self.files[id.index()];
            file.cost = cost;
            file.dirty = false;
        }
        self.files[id.index()].cost
    }

    /// Aggregated cost of an object over the active parts.
    pub fn object_cost(&mut self, id: ObjectId) -> InclusiveCost {
        if !self.in_cycle_update && self.objects[id.index()].dirty {
            let functions = self.objects[id.index()].functions.clone();
            let cost = self.sum_function_costs(&functions);
            let object = &mut self.objects[id.index()];
            object.cost = cost;
            object.dirty = false;
        }
        self.objects[id.index()].cost
    }

    /// Aggregated cost and count of a call over the active parts.
    pub fn call_cost(&mut self, id: CallId) -> CallCost {
        if !self.in_cycle_update && self.calls[id.index()].dirty {
            let mut cost = CallCost::new();
            {
                let call = &self.calls[id.index()];
                for pc in &call.part_calls {
                    if self.parts[pc.part.index()].active {
                        cost.add(&pc.cost);
                    }
                }
            }
            let call = &mut self.calls[id.index()];
            call.cost = cost;
            call.dirty = false;
        }
        self.calls[id.index()].cost
    }

    /// Aggregated cost of a line over the active parts.
    pub fn line_cost(&mut self, id: LineId) -> CostVec {
        if !self.in_cycle_update && self.lines[id.index()].dirty {
            let mut cost = CostVec::new();
            {
                let line = &self.lines[id.index()];
                for item in &line.items {
                    if self.parts[item.part.index()].active {
                        cost.add_vec(&item.cost);
                    }
                }
            }
            let line = &mut self.lines[id.index()];
            line.cost = cost;
            line.dirty = false;
        }
        self.lines[id.index()].cost
    }

    /// Aggregated cost of an instruction over the active parts.
    pub fn instr_cost(&mut self, id: InstrId) -> CostVec {
        if !self.in_cycle_update && self.instrs[id.index()].dirty {
            let mut cost = CostVec::new();
            {
                let instr = &self.instrs[id.index()];
                for item in &instr.items {
                    if self.parts[item.part.index()].active {
                        cost.add_vec(&item.cost);
                    }
                }
            }
            let instr = &mut self.instrs[id.index()];
            instr.cost = cost;
            instr.dirty = false;
        }
        self.instrs[id.index()].cost
    }

    /// Aggregated cost of a line-level call site over the active parts.
    pub fn line_call_cost(&mut self, id: LineCallId) -> CallCost {
        if !self.in_cycle_update && self.line_calls[id.index()].dirty {
            let mut cost = CallCost::new();
            {
                let site = &self.line_calls[id.index()];
                for item in &site.items {
                    if self.parts[item.part.index()].active {
                        cost.add(&item.cost);
                    }
                }
            }
            let site = &mut self.line_calls[id.index()];
            site.cost = cost;
            site.dirty = false;
        }
        self.line_calls[id.index()].cost
    }

    /// Aggregated cost of an instruction-level call site over the active
    /// parts.
    pub fn instr_call_cost(&mut self, id: InstrCallId) -> CallCost {
        if !self.in_cycle_update && self.instr_calls[id.index()].dirty {
            let mut cost = CallCost::new();
            {
                let site = &self.instr_calls[id.index()];
                for item in &site.items {
                    if self.parts[item.part.index()].active {
                        cost.add(&item.cost);
                    }
                }
            }
            let site = &mut self.instr_calls[id.index()];
            site.cost = cost;
            site.dirty = false;
        }
        self.instr_calls[id.index()].cost
    }

    /// Aggregated counts of a line jump over the active parts.
    pub fn line_jump_cost(&mut self, id: LineJumpId) -> JumpCost {
        if !self.in_cycle_update && self.line_jumps[id.index()].dirty {
            let mut cost = JumpCost::new();
            {
                let jump = &self.line_jumps[id.index()];
                for item in &jump.items {
                    if self.parts[item.part.index()].active {
                        cost.add(&item.cost);
                    }
                }
            }
            let jump = &mut self.line_jumps[id.index()];
            jump.cost = cost;
            jump.dirty = false;
        }
        self.line_jumps[id.index()].cost
    }

    /// Aggregated counts of an instruction jump over the active parts.
    pub fn instr_jump_cost(&mut self, id: InstrJumpId) -> JumpCost {
        if !self.in_cycle_update && self.instr_jumps[id.index()].dirty {
            let mut cost = JumpCost::new();
            {
                let jump = &self.instr_jumps[id.index()];
                for item in &jump.items {
                    if self.parts[item.part.index()].active {
                        cost.add(&item.cost);
                    }
                }
            }
            let jump = &mut self.instr_jumps[id.index()];
            jump.cost = cost;
            jump.dirty = false;
        }
        self.instr_jumps[id.index()].cost
    }

    fn sum_function_costs(&mut self, functions: &[FunctionId]) -> InclusiveCost {
        let mut cost = InclusiveCost::new();
        for &fid in functions {
            self.ensure_function_clean(fid);
            cost.add(&self.functions[fid.index()].cost);
        }
        cost
    }

    pub(crate) fn ensure_function_clean(&mut self, id: FunctionId) {
        if self.in_cycle_update || !self.functions[id.index()].dirty {
            return;
        }
        let mut cost = InclusiveCost::new();
        {
            let f = &self.functions[id.index()];
            for pf in &f.part_functions {
                if self.parts[pf.part.index()].active {
                    cost.self_cost.add_vec(&pf.self_cost);
                }
            }
        }
        cost.inclusive.add_vec(&cost.self_cost);

        let callings = self.functions[id.index()].callings.clone();
        let mut calling_count = SubCost::ZERO;
        let mut calling_contexts = 0u32;
        for cid in callings {
            let excluded = self.calls[cid.index()].recursive
                || self.call_in_cycle(cid) != 0;
            let call = &self.calls[cid.index()];
            let mut touched = false;
            for pc in &call.part_calls {
                if !self.parts[pc.part.index()].active {
                    continue;
                }
                calling_count += pc.cost.count;
                if pc.cost.count.value() > 0 || !pc.cost.cost.is_zero() {
                    touched = true;
                }
                if !excluded {
                    cost.inclusive.add_vec(&pc.cost.cost);
                }
            }
            if touched {
                calling_contexts += 1;
            }
        }

        let callers = self.functions[id.index()].callers.clone();
        let mut called_count = SubCost::ZERO;
        let mut called_contexts = 0u32;
        for cid in callers {
            let call = &self.calls[cid.index()];
            let mut touched = false;
            for pc in &call.part_calls {
                if !self.parts[pc.part.index()].active {
                    continue;
                }
                called_count += pc.cost.count;
                if pc.cost.count.value() > 0 {
                    touched = true;
                }
            }
            if touched {
                called_contexts += 1;
            }
        }

        let f = &mut self.functions[id.index()];
        f.cost = cost;
        f.calling_count = calling_count;
        f.calling_contexts = calling_contexts;
        f.called_count = called_count;
        f.called_contexts = called_contexts;
        f.dirty = false;
    }

    // ---------------------------------------------------------------
    // Fixed per-part views
    // ---------------------------------------------------------------

    /// Self and inclusive cost of one function within one part.
    ///
    /// Part-scoped costs are fixed: they ignore the active flag and never
    /// cache.
    pub fn part_function_cost(
        &self,
        id: FunctionId,
        part: PartId,
    ) -> InclusiveCost {
        let mut cost = InclusiveCost::new();
        let f = &self.functions[id.index()];
        if let Some(pf) = f.find_part_function(part) {
            cost.self_cost.add_vec(&pf.self_cost);
        }
        cost.inclusive.add_vec(&cost.self_cost);
        for &cid in &f.callings {
            let call = &self.calls[cid.index()];
            if call.recursive || self.call_in_cycle(cid) != 0 {
                continue;
            }
            for pc in &call.part_calls {
                if pc.part == part {
                    cost.inclusive.add_vec(&pc.cost.cost);
                }
            }
        }
        cost
    }

    /// Cost of one class within one part.
    pub fn part_class_cost(&self, id: ClassId, part: PartId) -> InclusiveCost {
        self.sum_part_costs(&self.classes[id.index()].functions, part)
    }

    /// Cost of one file within one part.
    pub fn part_file_cost(&self, id: FileId, part: PartId) -> InclusiveCost {
        self.sum_part_costs(&self.files[id.index()].functions, part)
    }

    /// Cost of one object within one part.
    pub fn part_object_cost(
        &self,
        id: ObjectId,
        part: PartId,
    ) -> InclusiveCost {
        self.sum_part_costs(&self.objects[id.index()].functions, part)
    }

    fn sum_part_costs(
        &self,
        functions: &[FunctionId],
        part: PartId,
    ) -> InclusiveCost {
        let mut cost = InclusiveCost::new();
        for &fid in functions {
            cost.add(&self.part_function_cost(fid, part));
        }
        cost
    }

    // ---------------------------------------------------------------
    // Lazy materialization of per-position entities
    // ---------------------------------------------------------------

    /// Fills the line maps of all of a function's sources from the fix
    /// records, materializing lines, line-level call sites, and line
    /// jumps.
    ///
    /// Ingesting another part drops the fill mark again; the next call
    /// here rebuilds the per-part leaves from the full fix lists, so the
    /// walk starts by clearing what an earlier fill left behind.
    pub fn ensure_lines(&mut self, id: FunctionId) {
        if self.functions[id.index()].lines_filled {
            return;
        }
        self.functions[id.index()].lines_filled = true;

        let sources = self.functions[id.index()].sources.clone();
        let callings = self.functions[id.index()].callings.clone();
        for &sid in &sources {
            let line_ids: Vec<LineId> =
                self.sources[sid.index()].lines.values().copied().collect();
            for lid in line_ids {
                let jump_ids = self.lines[lid.index()].jumps.clone();
                for jid in jump_ids {
                    let jump = &mut self.line_jumps[jid.index()];
                    jump.items.clear();
                    jump.dirty = true;
                }
                let line = &mut self.lines[lid.index()];
                line.items.clear();
                line.dirty = true;
            }
        }
        for &cid in &callings {
            let site_ids = self.calls[cid.index()].line_calls.clone();
            for lcid in site_ids {
                let site = &mut self.line_calls[lcid.index()];
                site.items.clear();
                site.dirty = true;
            }
        }

        let fix_indices: Vec<_> = self.functions[id.index()]
            .part_functions
            .iter()
            .flat_map(|pf| pf.fix_costs.iter().copied())
            .collect();
        for idx in fix_indices {
            let fix = *self.fix_costs.get(idx);
            let Some(lineno) = fix.line else { continue };
            let lid = self.intern_line(fix.source, lineno);
            let line = &mut self.lines[lid.index()];
            match line.items.iter_mut().find(|item| item.part == fix.part) {
                Some(item) => item.cost.add_vec(&fix.cost),
                None => line.items.push(PartLine {
                    part: fix.part,
                    cost: fix.cost,
                }),
            }
            line.dirty = true;
        }

        for cid in callings {
            let fix_indices: Vec<_> = self.calls[cid.index()]
                .part_calls
                .iter()
                .flat_map(|pc| pc.fix_call_costs.iter().copied())
                .collect();
            for idx in fix_indices {
                let fix = *self.fix_call_costs.get(idx);
                let Some(lineno) = fix.line else { continue };
                let lid = self.intern_line(fix.source, lineno);
                let site = self.intern_line_call(cid, lid);
                let site = &mut self.line_calls[site.index()];
                match site.items.iter_mut().find(|item| item.part == fix.part)
                {
                    Some(item) => {
                        item.cost.cost.add_vec(&fix.cost);
                        item.cost.count += fix.count;
                    }
                    None => site.items.push(PartCallCost {
                        part: fix.part,
                        cost: CallCost {
                            cost: fix.cost,
                            count: fix.count,
                        },
                    }),
                }
                site.dirty = true;
            }
        }

        let fix_indices: Vec<_> = self.functions[id.index()]
            .part_functions
            .iter()
            .flat_map(|pf| pf.fix_jumps.iter().copied())
            .collect();
        for idx in fix_indices {
            let fix = *self.fix_jumps.get(idx);
            let (Some(from_lineno), Some(to_lineno)) = (fix.line, fix.to_line)
            else {
                continue;
            };
            let from = self.intern_line(fix.source, from_lineno);
            let to = self.intern_line(fix.to_source, to_lineno);
            let jump = self.intern_line_jump(from, to, fix.conditional);
            let jump = &mut self.line_jumps[jump.index()];
            match jump.items.iter_mut().find(|item| item.part == fix.part) {
                Some(item) => item.cost.add(&JumpCost {
                    executed: fix.executed,
                    followed: fix.followed,
                }),
                None => jump.items.push(PartJump {
                    part: fix.part,
                    cost: JumpCost {
                        executed: fix.executed,
                        followed: fix.followed,
                    },
                }),
            }
            jump.dirty = true;
        }
    }

    /// Fills a function's address map from the fix records, materializing
    /// instructions, instruction-level call sites, and instruction jumps.
    ///
    /// Rebuilds like [`Self::ensure_lines`] when the fill mark was
    /// dropped by the ingest of another part.
    pub fn ensure_instrs(&mut self, id: FunctionId) {
        if self.functions[id.index()].instrs_filled {
            return;
        }
        self.functions[id.index()].instrs_filled = true;

        let instr_ids: Vec<InstrId> = self.functions[id.index()]
            .instrs
            .values()
            .copied()
            .collect();
        let callings = self.functions[id.index()].callings.clone();
        for &iid in &instr_ids {
            let jump_ids = self.instrs[iid.index()].jumps.clone();
            for jid in jump_ids {
                let jump = &mut self.instr_jumps[jid.index()];
                jump.items.clear();
                jump.dirty = true;
            }
            let instr = &mut self.instrs[iid.index()];
            instr.items.clear();
            instr.dirty = true;
        }
        for &cid in &callings {
            let site_ids = self.calls[cid.index()].instr_calls.clone();
            for icid in site_ids {
                let site = &mut self.instr_calls[icid.index()];
                site.items.clear();
                site.dirty = true;
            }
        }

        let fix_indices: Vec<_> = self.functions[id.index()]
            .part_functions
            .iter()
            .flat_map(|pf| pf.fix_costs.iter().copied())
            .collect();
        for idx in fix_indices {
            let fix = *self.fix_costs.get(idx);
            let Some(addr) = fix.addr else { continue };
            let iid = self.intern_instr(id, addr);
            if let Some(lineno) = fix.line {
                let lid = self.intern_line(fix.source, lineno);
                self.instrs[iid.index()].line = Some(lid);
            }
            let instr = &mut self.instrs[iid.index()];
            match instr.items.iter_mut().find(|item| item.part == fix.part) {
                Some(item) => item.cost.add_vec(&fix.cost),
                None => instr.items.push(PartInstr {
                    part: fix.part,
                    cost: fix.cost,
                }),
            }
            instr.dirty = true;
        }

        for cid in callings {
            let fix_indices: Vec<_> = self.calls[cid.index()]
                .part_calls
                .iter()
                .flat_map(|pc| pc.fix_call_costs.iter().copied())
                .collect();
            for idx in fix_indices {
                let fix = *self.fix_call_costs.get(idx);
                let Some(addr) = fix.addr else { continue };
                let iid = self.intern_instr(id, addr);
                let site = self.intern_instr_call(cid, iid);
                let site = &mut self.instr_calls[site.index()];
                match site.items.iter_mut().find(|item| item.part == fix.part)
                {
                    Some(item) => {
                        item.cost.cost.add_vec(&fix.cost);
                        item.cost.count += fix.count;
                    }
                    None => site.items.push(PartCallCost {
                        part: fix.part,
                        cost: CallCost {
                            cost: fix.cost,
                            count: fix.count,
                        },
                    }),
                }
                site.dirty = true;
            }
        }

        let fix_indices: Vec<_> = self.functions[id.index()]
            .part_functions
            .iter()
            .flat_map(|pf| pf.fix_jumps.iter().copied())
            .collect();
        for idx in fix_indices {
            let fix = *self.fix_jumps.get(idx);
            let (Some(from_addr), Some(to_addr)) = (fix.addr, fix.to_addr)
            else {
                continue;
            };
            let from = self.intern_instr(id, from_addr);
            let to = self.intern_instr(id, to_addr);
            let jump = self.intern_instr_jump(from, to, fix.conditional);
            let jump = &mut self.instr_jumps[jump.index()];
            match jump.items.iter_mut().find(|item| item.part == fix.part) {
                Some(item) => item.cost.add(&JumpCost {
                    executed: fix.executed,
                    followed: fix.followed,
                }),
                None => jump.items.push(PartJump {
                    part: fix.part,
                    cost: JumpCost {
                        executed: fix.executed,
                        followed: fix.followed,
                    },
                }),
            }
            jump.dirty = true;
        }
    }

    /// First and last instruction address of a function, if any costs
    /// were attributed by address. Materializes the address map.
    pub fn function_address_range(
        &mut self,
        id: FunctionId,
    ) -> Option<(u64, u64)> {
        self.ensure_instrs(id);
        let function = &self.functions[id.index()];
        Some((function.first_address()?, function.last_address()?))
    }

    /// First and last line number of a function within one source file,
    /// if any costs were attributed by line. Materializes the line map.
    pub fn source_line_range(
        &mut self,
        id: SourceId,
    ) -> Option<(u32, u32)> {
        let function = self.sources[id.index()].function;
        self.ensure_lines(function);
        let source = &self.sources[id.index()];
        Some((source.first_lineno()?, source.last_lineno()?))
    }
}

/// Parses a compressed token into `(index, bound name)`.
///
/// Returns `None` for plain (uncompressed) names.
fn parse_compressed(
    token: &str,
) -> Result<Option<(u32, Option<&str>)>, TraceError> {
    let trimmed = token.trim_start();
    let Some(rest) = trimmed.strip_prefix('(') else {
        return Ok(None);
    };
    let Some(close) = rest.find(')') else {
        return Err(TraceError::malformed_record(format!(
            "unterminated compressed id in '{token}'"
        )));
    };
    let index: u32 = rest[..close].trim().parse().map_err(|_| {
        TraceError::malformed_record(format!(
            "invalid compressed id in '{token}'"
        ))
    })?;
    let name = rest[close + 1..].trim();
    Ok(Some((index, if name.is_empty() { None } else { Some(name) })))
}

fn binding<I: Copy>(bindings: &[Option<I>], index: u32) -> Option<I> {
    bindings.get(index as usize).copied().flatten()
}

fn bind<I>(bindings: &mut Vec<Option<I>>, index: u32, id: I) {
    let index = index as usize;
    if bindings.len() <= index {
        bindings.resize_with(index + 1, || None);
    }
    bindings[index] = Some(id);
}
