//! Ingestion of pre-parsed part file records.
//!
//! The textual parser is an external collaborator: it tokenizes a part
//! file and drives a [`PartBuilder`] with header values, context
//! directives, and body records. The builder interns entities through
//! `TraceData`, accumulates part-scoped costs, and appends the immutable
//! fix records that later back the per-position views.
//!
//! Error policy: structurally invalid body records are skipped and
//! counted on the part; compressed-id and identity conflicts reject the
//! whole part, which is left inactive and excluded from the trace
//! totals.

use calltrace_events::{CostVec, SubCost, SubMapping};
use tracing::warn;

use crate::data::TraceData;
use crate::error::TraceError;
use crate::ids::{FileId, FunctionId, ObjectId, PartId, SourceId};
use crate::pool::{FixCallCost, FixCost, FixJump};
use crate::progress::{NoProgress, Progress, ProgressSink};

/// Ingest session for one part file.
///
/// Created with [`PartBuilder::new`], driven with header setters,
/// context directives, and body records, and closed with
/// [`PartBuilder::finish`], which seals the part's totals and notifies
/// the progress sink.
pub struct PartBuilder<'d> {
    data: &'d mut TraceData,
    part: PartId,
    mapping: Option<SubMapping>,
    has_instr: bool,
    has_line: bool,
    object: Option<ObjectId>,
    file: Option<FileId>,
    function: Option<FunctionId>,
    source: Option<SourceId>,
    to_object: Option<ObjectId>,
    to_file: Option<FileId>,
    pending_called: Option<FunctionId>,
    last_addr: u64,
    last_line: u32,
    last_to_addr: u64,
    last_to_line: u32,
    computed_totals: CostVec,
    header_totals: Option<CostVec>,
    failed: bool,
}

impl<'d> PartBuilder<'d> {
    /// Starts ingesting one part file into `data`.
    pub fn new(data: &'d mut TraceData, dir: &str, file: &str) -> Self {
        let part = data.add_part(dir, file);
        PartBuilder {
            data,
            part,
            mapping: None,
            has_instr: false,
            has_line: true,
            object: None,
            file: None,
            function: None,
            source: None,
            to_object: None,
            to_file: None,
            pending_called: None,
            last_addr: 0,
            last_line: 0,
            last_to_addr: 0,
            last_to_line: 0,
            computed_totals: CostVec::new(),
            header_totals: None,
            failed: false,
        }
    }

    /// The id of the part being built.
    pub fn part_id(&self) -> PartId {
        self.part
    }

    /// Returns true if a part-fatal error rejected this part.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    // ---------------------------------------------------------------
    // Header records
    // ---------------------------------------------------------------

    /// The traced command line (`cmd:`). Only the first part's value is
    /// kept for the whole trace.
    pub fn set_command(&mut self, command: &str) {
        self.data.set_command(command);
    }

    /// Free-form part description (`desc:`).
    pub fn set_description(&mut self, description: &str) {
        let part = &mut self.data.parts[self.part.index()];
        if !part.description.is_empty() {
            part.description.push('\n');
        }
        part.description.push_str(description);
    }

    /// Dump trigger (`trigger:`).
    pub fn set_trigger(&mut self, trigger: &str) {
        self.data.parts[self.part.index()].trigger = trigger.to_string();
    }

    /// Covered timeframe (`timeframe:`).
    pub fn set_timeframe(&mut self, timeframe: &str) {
        self.data.parts[self.part.index()].timeframe =
            timeframe.to_string();
    }

    /// Format version (`version:`).
    pub fn set_version(&mut self, version: &str) {
        self.data.parts[self.part.index()].version = version.to_string();
    }

    /// Part sequence number (`part:`).
    pub fn set_part_number(&mut self, number: u32) {
        self.data.parts[self.part.index()].number = number;
    }

    /// Thread id (`thread:`).
    pub fn set_thread_id(&mut self, thread_id: u32) {
        self.data.parts[self.part.index()].thread_id = thread_id;
    }

    /// Process id (`pid:`).
    pub fn set_process_id(&mut self, process_id: u32) {
        self.data.parts[self.part.index()].process_id = process_id;
    }

    /// Position specification (`positions:`), tokens `instr` and `line`.
    pub fn set_positions(&mut self, spec: &str) -> Result<(), TraceError> {
        let mut has_instr = false;
        let mut has_line = false;
        for token in spec.split_ascii_whitespace() {
            match token {
                "instr" => has_instr = true,
                "line" => has_line = true,
                _ => {
                    return Err(self.record_error(format!(
                        "unknown position kind '{token}'"
                    )));
                }
            }
        }
        if !has_instr && !has_line {
            return Err(
                self.record_error("empty position specification")
            );
        }
        self.has_instr = has_instr;
        self.has_line = has_line;
        Ok(())
    }

    /// Event name list (`events:`), the part's cost row column order.
    pub fn set_events(&mut self, names: &str) -> Result<(), TraceError> {
        match self.data.mapping.sub_mapping(names) {
            Ok(mapping) => {
                self.data.parts[self.part.index()].mapping =
                    Some(mapping.clone());
                self.mapping = Some(mapping);
                Ok(())
            }
            Err(err) => Err(self.record_error(format!(
                "unusable events header: {err}"
            ))),
        }
    }

    /// Pre-computed totals row (`totals:` or `summary:`).
    pub fn set_totals(&mut self, values: &str) -> Result<(), TraceError> {
        let Some(mapping) = self.mapping.as_ref() else {
            return Err(
                self.record_error("totals row before events header")
            );
        };
        let mut totals = CostVec::new();
        totals.set_row(mapping, values);
        self.header_totals = Some(totals);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Context directives
    // ---------------------------------------------------------------

    /// Switches the current object (`ob=`), compressed tokens allowed.
    pub fn set_object(&mut self, token: &str) -> Result<(), TraceError> {
        match self.data.compressed_object(token) {
            Ok(id) => {
                self.object = Some(id);
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Switches the current file (`fl=`), compressed tokens allowed.
    ///
    /// Takes effect for the next function; it does not move already
    /// ingested costs.
    pub fn set_file(&mut self, token: &str) -> Result<(), TraceError> {
        match self.data.compressed_file(token) {
            Ok(id) => {
                self.file = Some(id);
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Switches the current function (`fn=`), compressed tokens allowed.
    ///
    /// The function is interned against the current file and object;
    /// missing context defaults to the `???` placeholders. Position
    /// state resets, so the next row's relative positions start from
    /// zero.
    pub fn set_function(&mut self, token: &str) -> Result<(), TraceError> {
        let file = self.current_file();
        let object = self.current_object();
        match self.data.compressed_function(token, file, object) {
            Ok(id) => {
                self.function = Some(id);
                self.source = Some(self.data.intern_source(id, file));
                self.last_addr = 0;
                self.last_line = 0;
                self.last_to_addr = 0;
                self.last_to_line = 0;
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Switches the source file for following cost rows (`fi=`/`fe=`),
    /// used when the current function has inlined code from another
    /// file.
    pub fn set_inline_file(&mut self, token: &str) -> Result<(), TraceError> {
        let Some(function) = self.function else {
            return Err(self.record_error(
                "inline file directive outside function context",
            ));
        };
        match self.data.compressed_file(token) {
            Ok(file) => {
                self.source = Some(self.data.intern_source(function, file));
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Sets the object of the next call target (`cob=`).
    pub fn set_call_object(&mut self, token: &str) -> Result<(), TraceError> {
        match self.data.compressed_object(token) {
            Ok(id) => {
                self.to_object = Some(id);
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Sets the file of the next call target (`cfl=`).
    pub fn set_call_file(&mut self, token: &str) -> Result<(), TraceError> {
        match self.data.compressed_file(token) {
            Ok(id) => {
                self.to_file = Some(id);
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    /// Sets the function of the next call target (`cfn=`).
    ///
    /// Resolves against the call-target file and object if set, else the
    /// current context.
    pub fn set_call_function(
        &mut self,
        token: &str,
    ) -> Result<(), TraceError> {
        let file = match self.to_file {
            Some(file) => file,
            None => self.current_file(),
        };
        let object = match self.to_object {
            Some(object) => object,
            None => self.current_object(),
        };
        match self.data.compressed_function(token, file, object) {
            Ok(id) => {
                self.pending_called = Some(id);
                Ok(())
            }
            Err(err) => Err(self.classify(err)),
        }
    }

    // ---------------------------------------------------------------
    // Body records
    // ---------------------------------------------------------------

    /// A cost row: position fields followed by event values in the
    /// part's column order.
    ///
    /// Position tokens follow the compressed position format: absolute
    /// (hex for addresses, decimal for lines), `+N`/`-N` relative to the
    /// previous row, or `*` for unchanged.
    pub fn cost_row(
        &mut self,
        positions: &[&str],
        values: &str,
    ) -> Result<(), TraceError> {
        let (addr, line) = self.parse_positions(positions, false)?;
        let Some(function) = self.function else {
            return Err(
                self.record_error("cost row outside function context")
            );
        };
        let Some(source) = self.source else {
            return Err(self.record_error("cost row without source file"));
        };
        let mut cost = CostVec::new();
        {
            let Some(mapping) = self.mapping.as_ref() else {
                return Err(
                    self.record_error("cost row before events header")
                );
            };
            cost.add_row(mapping, values);
        }

        let idx = self.data.fix_costs.push(FixCost {
            part: self.part,
            source,
            addr,
            line,
            cost,
        });
        let f = &mut self.data.functions[function.index()];
        let pf = f.part_function_mut(self.part);
        pf.self_cost.add_vec(&cost);
        pf.fix_costs.push(idx);
        self.computed_totals.add_vec(&cost);
        self.mark_function_touched(function);
        Ok(())
    }

    /// A call row: the call count (`calls=N`), the source position of
    /// the call site, and the inclusive cost of the calls, bound to the
    /// previously set call target.
    pub fn call_row(
        &mut self,
        count: u64,
        positions: &[&str],
        values: &str,
    ) -> Result<(), TraceError> {
        let (addr, line) = self.parse_positions(positions, false)?;
        let Some(called) = self.pending_called.take() else {
            return Err(self.record_error("call row without target"));
        };
        let Some(caller) = self.function else {
            return Err(
                self.record_error("call row outside function context")
            );
        };
        let Some(source) = self.source else {
            return Err(self.record_error("call row without source file"));
        };
        let mut cost = CostVec::new();
        {
            let Some(mapping) = self.mapping.as_ref() else {
                return Err(
                    self.record_error("call row before events header")
                );
            };
            cost.add_row(mapping, values);
        }

        let call = self.data.intern_call(caller, called);
        let idx = self.data.fix_call_costs.push(FixCallCost {
            part: self.part,
            call,
            source,
            addr,
            line,
            count: SubCost::new(count),
            cost,
        });
        let pc = self.data.calls[call.index()].part_call_mut(self.part);
        pc.cost.count += SubCost::new(count);
        pc.cost.cost.add_vec(&cost);
        pc.fix_call_costs.push(idx);
        self.data.calls[call.index()].dirty = true;
        self.mark_function_touched(caller);
        self.mark_function_touched(called);

        // The target context applies to one call only.
        self.to_object = None;
        self.to_file = None;
        Ok(())
    }

    /// A jump row.
    ///
    /// Unconditional jumps (`jump=N`) pass `followed = None`; conditional
    /// jumps (`jcnd=followed/executed`) pass both counts. A conditional
    /// jump claiming more followed than executed edges is malformed.
    pub fn jump_row(
        &mut self,
        executed: u64,
        followed: Option<u64>,
        positions: &[&str],
        to_positions: &[&str],
    ) -> Result<(), TraceError> {
        if let Some(followed) = followed {
            if followed > executed {
                return Err(self.record_error(format!(
                    "jump followed count {followed} exceeds executed \
                     count {executed}"
                )));
            }
        }
        let (addr, line) = self.parse_positions(positions, false)?;
        let (to_addr, to_line) = self.parse_positions(to_positions, true)?;
        let Some(function) = self.function else {
            return Err(
                self.record_error("jump row outside function context")
            );
        };
        let Some(source) = self.source else {
            return Err(self.record_error("jump row without source file"));
        };

        let conditional = followed.is_some();
        let idx = self.data.fix_jumps.push(FixJump {
            part: self.part,
            source,
            addr,
            line,
            to_source: source,
            to_addr,
            to_line,
            executed: SubCost::new(executed),
            followed: SubCost::new(followed.unwrap_or(executed)),
            conditional,
        });
        let f = &mut self.data.functions[function.index()];
        let pf = f.part_function_mut(self.part);
        pf.fix_jumps.push(idx);
        self.mark_function_touched(function);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Completion
    // ---------------------------------------------------------------

    /// Seals the part and returns its id.
    pub fn finish(self) -> PartId {
        self.finish_with(&mut NoProgress).0
    }

    /// Seals the part, notifies the sink, and returns the sink's
    /// continuation decision for the caller's load loop.
    ///
    /// A part hit by a part-fatal error is rejected here: it stays
    /// inactive forever and contributes nothing to the trace totals.
    pub fn finish_with(
        self,
        sink: &mut dyn ProgressSink,
    ) -> (PartId, Progress) {
        let PartBuilder {
            data,
            part,
            computed_totals,
            header_totals,
            failed,
            ..
        } = self;
        let index = part.index();
        if failed {
            let p = &mut data.parts[index];
            p.rejected = true;
            p.active = false;
            warn!(part = %p.name, "part rejected, not activated");
            return (part, Progress::Continue);
        }
        let totals = header_totals.unwrap_or(computed_totals);
        data.parts[index].totals = totals;
        data.totals.add_vec(&totals);
        data.max_part_number =
            data.max_part_number.max(data.parts[index].number);
        data.max_thread_id =
            data.max_thread_id.max(data.parts[index].thread_id);
        data.dirty = true;
        let progress = sink.on_part_loaded(&data.parts[index]);
        (part, progress)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn current_file(&mut self) -> FileId {
        match self.file {
            Some(file) => file,
            None => {
                let file = self.data.intern_file("???");
                self.file = Some(file);
                file
            }
        }
    }

    fn current_object(&mut self) -> ObjectId {
        match self.object {
            Some(object) => object,
            None => {
                let object = self.data.intern_object("???");
                self.object = Some(object);
                object
            }
        }
    }

    fn parse_positions(
        &mut self,
        positions: &[&str],
        target: bool,
    ) -> Result<(Option<u64>, Option<u32>), TraceError> {
        let expected = usize::from(self.has_instr) + usize::from(self.has_line);
        if positions.len() != expected {
            return Err(self.record_error(format!(
                "expected {expected} position fields, got {}",
                positions.len()
            )));
        }
        let mut fields = positions.iter();
        let mut addr = None;
        let mut line = None;
        if self.has_instr {
            let token = fields.next().map_or("", |t| *t);
            let last = if target { self.last_to_addr } else { self.last_addr };
            let Some(value) = parse_addr(token, last) else {
                return Err(self.record_error(format!(
                    "unparseable address '{token}'"
                )));
            };
            if target {
                self.last_to_addr = value;
            } else {
                self.last_addr = value;
            }
            addr = Some(value);
        }
        if self.has_line {
            let token = fields.next().map_or("", |t| *t);
            let last = if target { self.last_to_line } else { self.last_line };
            let Some(value) = parse_line(token, last) else {
                return Err(self.record_error(format!(
                    "unparseable line number '{token}'"
                )));
            };
            if target {
                self.last_to_line = value;
            } else {
                self.last_line = value;
            }
            line = Some(value);
        }
        Ok((addr, line))
    }

    fn mark_function_touched(&mut self, function: FunctionId) {
        let f = &self.data.functions[function.index()];
        let (class, file, object) = (f.class(), f.file(), f.object());
        let f = &mut self.data.functions[function.index()];
        f.dirty = true;
        // New fix records are not in the materialized position maps;
        // drop the fill marks so the next map request rebuilds them.
        f.lines_filled = false;
        f.instrs_filled = false;
        self.data.classes[class.index()].dirty = true;
        self.data.files[file.index()].dirty = true;
        self.data.objects[object.index()].dirty = true;
        self.data.dirty = true;
    }

    fn record_error(&mut self, detail: impl Into<String>) -> TraceError {
        let part = &mut self.data.parts[self.part.index()];
        part.skipped_records += 1;
        let err = TraceError::malformed_record(detail);
        warn!(part = %part.name, %err, "skipping record");
        err
    }

    fn classify(&mut self, err: TraceError) -> TraceError {
        if err.is_part_fatal() {
            self.failed = true;
            warn!(%err, "part-fatal ingest error");
        } else {
            self.data.parts[self.part.index()].skipped_records += 1;
            warn!(%err, "skipping record");
        }
        err
    }
}

/// Parses an address token: hex absolute, `+`/`-` hex relative, or `*`.
fn parse_addr(token: &str, last: u64) -> Option<u64> {
    if token == "*" {
        return Some(last);
    }
    if let Some(offset) = token.strip_prefix('+') {
        return u64::from_str_radix(offset, 16)
            .ok()
            .map(|delta| last.saturating_add(delta));
    }
    if let Some(offset) = token.strip_prefix('-') {
        return u64::from_str_radix(offset, 16)
            .ok()
            .map(|delta| last.saturating_sub(delta));
    }
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}

/// Parses a line token: decimal absolute, `+`/`-` relative, or `*`.
pub(crate) fn parse_line(token: &str, last: u32) -> Option<u32> {
    if token == "*" {
        return Some(last);
    }
    if let Some(offset) = token.strip_prefix('+') {
        return offset
            .parse::<u32>()
            .ok()
            .map(|delta| last.saturating_add(delta));
    }
    if let Some(offset) = token.strip_prefix('-') {
        return offset
            .parse::<u32>()
            .ok()
            .map(|delta| last.saturating_sub(delta));
    }
    token.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(data: &mut TraceData) -> PartBuilder<'_> {
        let mut b = PartBuilder::new(data, "/tmp", "callgrind.out.1");
        b.set_events("Ir Dr Dw").unwrap();
        b.set_object("a.out").unwrap();
        b.set_file("main.c").unwrap();
        b
    }

    #[test]
    fn test_cost_rows_accumulate_self_cost() {
        let mut data = TraceData::new();
        let mut b = builder(&mut data);
        b.set_function("main").unwrap();
        b.cost_row(&["10"], "50 0 0").unwrap();
        b.cost_row(&["+1"], "30 2 1").unwrap();
        let part = b.finish();

        let f = data
            .functions()
            .find(|(_, f)| f.name() == "main")
            .map(|(id, _)| id)
            .unwrap();
        let cost = data.function_cost(f);
        assert_eq!(cost.self_cost.subcost(0), SubCost::new(80));
        assert_eq!(cost.self_cost.subcost(1), SubCost::new(2));
        assert_eq!(cost.self_cost.subcost(2), SubCost::new(1));
        // No totals header: totals are the computed sums.
        assert_eq!(data.part(part).totals().subcost(0), SubCost::new(80));
        assert_eq!(data.totals().subcost(0), SubCost::new(80));
    }

    #[test]
    fn test_relative_positions() {
        let mut data = TraceData::new();
        let mut b = builder(&mut data);
        b.set_positions("instr line").unwrap();
        b.set_function("main").unwrap();
        b.cost_row(&["4000", "10"], "1 0 0").unwrap();
        b.cost_row(&["+4", "+2"], "1 0 0").unwrap();
        b.cost_row(&["*", "-1"], "1 0 0").unwrap();
        b.finish();

        let f = data
            .functions()
            .find(|(_, f)| f.name() == "main")
            .map(|(id, _)| id)
            .unwrap();
        // Range accessors on the entities are empty before any map is
        // materialized and agree with the range reads afterwards.
        let source = data.function(f).sources()[0];
        assert_eq!(data.function(f).first_address(), None);
        assert_eq!(data.source(source).first_lineno(), None);

        assert_eq!(
            data.function_address_range(f),
            Some((0x4000, 0x4004))
        );
        assert_eq!(data.function(f).first_address(), Some(0x4000));
        assert_eq!(data.function(f).last_address(), Some(0x4004));

        assert_eq!(data.source_line_range(source), Some((10, 12)));
        assert_eq!(data.source(source).first_lineno(), Some(10));
        assert_eq!(data.source(source).last_lineno(), Some(12));
    }

    #[test]
    fn test_malformed_rows_are_skipped_and_counted() {
        let mut data = TraceData::new();
        let mut b = builder(&mut data);
        b.set_function("main").unwrap();
        // Cost row with a bad line position.
        assert!(b.cost_row(&["abc"], "1 0 0").is_err());
        // Conditional jump with followed > executed.
        assert!(b
            .jump_row(10, Some(11), &["5"], &["8"])
            .is_err());
        // Valid row still lands.
        b.cost_row(&["5"], "1 0 0").unwrap();
        let part = b.finish();

        assert!(!data.part(part).is_rejected());
        assert_eq!(data.part(part).skipped_records(), 2);
        assert_eq!(data.part(part).totals().subcost(0), SubCost::new(1));
    }

    #[test]
    fn test_compressed_conflict_rejects_part() {
        let mut data = TraceData::new();
        let mut b = builder(&mut data);
        b.set_function("(1) main").unwrap();
        b.cost_row(&["5"], "9 0 0").unwrap();
        let err = b.set_function("(1) other").unwrap_err();
        assert!(err.is_inconsistent_compressed_id());
        assert!(b.is_failed());
        let part = b.finish();

        let part = data.part(part);
        assert!(part.is_rejected());
        assert!(!part.is_active());
        // Rejected parts contribute nothing to the trace totals.
        assert!(data.totals().is_zero());
    }

    #[test]
    fn test_call_row_requires_target() {
        let mut data = TraceData::new();
        let mut b = builder(&mut data);
        b.set_function("main").unwrap();
        assert!(b.call_row(1, &["5"], "10 0 0").is_err());

        b.set_call_function("helper").unwrap();
        b.call_row(2, &["5"], "10 0 0").unwrap();
        b.finish();

        let caller = data
            .functions()
            .find(|(_, f)| f.name() == "main")
            .map(|(id, _)| id)
            .unwrap();
        let counts = data.function_counts(caller);
        assert_eq!(counts.calling_count, SubCost::new(2));
        assert_eq!(counts.calling_contexts, 1);
    }

    #[test]
    fn test_header_totals_take_precedence() {
        let mut data = TraceData::new();
        let mut b = builder(&mut data);
        b.set_totals("100 10 5").unwrap();
        b.set_function("main").unwrap();
        b.cost_row(&["1"], "90 10 5").unwrap();
        let part = b.finish();
        assert_eq!(
            data.part(part).totals().subcost(0),
            SubCost::new(100)
        );
    }

    #[test]
    fn test_parse_addr_forms() {
        assert_eq!(parse_addr("3a", 0), Some(0x3a));
        assert_eq!(parse_addr("0x3a", 0), Some(0x3a));
        assert_eq!(parse_addr("+10", 0x20), Some(0x30));
        assert_eq!(parse_addr("-8", 0x20), Some(0x18));
        assert_eq!(parse_addr("*", 0x99), Some(0x99));
        assert_eq!(parse_addr("zz", 0), None);
    }

    #[test]
    fn test_parse_line_forms() {
        assert_eq!(parse_line("12", 0), Some(12));
        assert_eq!(parse_line("+3", 10), Some(13));
        assert_eq!(parse_line("-3", 10), Some(7));
        assert_eq!(parse_line("*", 42), Some(42));
        assert_eq!(parse_line("1x", 0), None);
    }
}
