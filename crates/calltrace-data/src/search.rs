//! Best-match search by name and metric.

use calltrace_events::{EventTypeId, SubCost};

use crate::data::TraceData;
use crate::ids::{
    CallId, ClassId, FileId, FunctionId, InstrId, LineId, ObjectId,
};

/// The entity kinds the search surface can look for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Object,
    File,
    Class,
    Function,
    Instr,
    Line,
    Call,
}

/// A typed reference to a found entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRef {
    Object(ObjectId),
    File(FileId),
    Class(ClassId),
    Function(FunctionId),
    Instr(InstrId),
    Line(LineId),
    Call(CallId),
}

impl TraceData {
    /// Finds the entity of `kind` whose name matches `query` and has the
    /// greatest value of `event`.
    ///
    /// Name matching is by substring. Instructions match against their
    /// hex address, lines against their decimal line number, calls
    /// against the called function's name. Instructions, lines, and
    /// calls are only identified within a function, so those kinds
    /// require `parent`; functions and containers ignore it. Functions
    /// and containers rank by inclusive cost, positions by self cost,
    /// calls by call cost.
    pub fn search(
        &mut self,
        kind: EntityKind,
        query: &str,
        event: EventTypeId,
        parent: Option<FunctionId>,
    ) -> Option<EntityRef> {
        match kind {
            EntityKind::Object => {
                let candidates: Vec<ObjectId> = self
                    .object_map()
                    .iter()
                    .filter(|(name, _)| name.contains(query))
                    .map(|(_, &id)| id)
                    .collect();
                self.best_by(candidates, event, EntityRef::Object, |data, id| {
                    data.object_cost(id).inclusive
                })
            }
            EntityKind::File => {
                let candidates: Vec<FileId> = self
                    .file_map()
                    .iter()
                    .filter(|(name, _)| name.contains(query))
                    .map(|(_, &id)| id)
                    .collect();
                self.best_by(candidates, event, EntityRef::File, |data, id| {
                    data.file_cost(id).inclusive
                })
            }
            EntityKind::Class => {
                let candidates: Vec<ClassId> = self
                    .class_map()
                    .iter()
                    .filter(|(name, _)| name.contains(query))
                    .map(|(_, &id)| id)
                    .collect();
                self.best_by(candidates, event, EntityRef::Class, |data, id| {
                    data.class_cost(id).inclusive
                })
            }
            EntityKind::Function => {
                let candidates: Vec<FunctionId> = self
                    .functions()
                    .filter(|(_, f)| f.name().contains(query))
                    .map(|(id, _)| id)
                    .collect();
                self.best_by(
                    candidates,
                    event,
                    EntityRef::Function,
                    |data, id| data.function_cost(id).inclusive,
                )
            }
            EntityKind::Instr => {
                let parent = parent?;
                self.ensure_instrs(parent);
                let candidates: Vec<InstrId> = self
                    .function(parent)
                    .instrs
                    .iter()
                    .filter(|(addr, _)| {
                        format!("{addr:x}").contains(query)
                    })
                    .map(|(_, &id)| id)
                    .collect();
                self.best_by(candidates, event, EntityRef::Instr, |data, id| {
                    data.instr_cost(id)
                })
            }
            EntityKind::Line => {
                let parent = parent?;
                self.ensure_lines(parent);
                let sources = self.function(parent).sources().to_vec();
                let candidates: Vec<LineId> = sources
                    .iter()
                    .flat_map(|&sid| {
                        self.source(sid)
                            .lines()
                            .iter()
                            .filter(|(lineno, _)| {
                                lineno.to_string().contains(query)
                            })
                            .map(|(_, &id)| id)
                            .collect::<Vec<_>>()
                    })
                    .collect();
                self.best_by(candidates, event, EntityRef::Line, |data, id| {
                    data.line_cost(id)
                })
            }
            EntityKind::Call => {
                let parent = parent?;
                let candidates: Vec<CallId> = self
                    .function(parent)
                    .callings()
                    .iter()
                    .copied()
                    .filter(|&cid| {
                        let called = self.call(cid).called();
                        self.function(called).name().contains(query)
                    })
                    .collect();
                self.best_by(candidates, event, EntityRef::Call, |data, id| {
                    data.call_cost(id).cost
                })
            }
        }
    }

    fn best_by<I: Copy>(
        &mut self,
        candidates: Vec<I>,
        event: EventTypeId,
        wrap: impl Fn(I) -> EntityRef,
        cost_of: impl Fn(&mut TraceData, I) -> calltrace_events::CostVec,
    ) -> Option<EntityRef> {
        let mut best: Option<(I, SubCost)> = None;
        for id in candidates {
            let vector = cost_of(self, id);
            let value = self.event_value(event, &vector);
            match best {
                Some((_, top)) if value <= top => {}
                _ => best = Some((id, value)),
            }
        }
        best.map(|(id, _)| wrap(id))
    }
}

#[cfg(test)]
mod tests {
    use calltrace_events::SubCost;

    use super::*;
    use crate::ingest::PartBuilder;

    fn sample() -> TraceData {
        let mut data = TraceData::new();
        let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
        b.set_events("Ir").unwrap();
        b.set_object("a.out").unwrap();
        b.set_file("main.c").unwrap();
        b.set_function("main").unwrap();
        b.cost_row(&["10"], "100").unwrap();
        b.set_call_function("work").unwrap();
        b.call_row(1, &["11"], "500").unwrap();
        b.set_function("work").unwrap();
        b.cost_row(&["20"], "500").unwrap();
        b.set_function("worker_helper").unwrap();
        b.cost_row(&["30"], "40").unwrap();
        b.finish();
        data
    }

    #[test]
    fn test_search_function_prefers_greater_metric() {
        let mut data = sample();
        let event = data.mapping().type_by_name("Ir").unwrap();
        let found = data
            .search(EntityKind::Function, "work", event, None)
            .unwrap();
        let EntityRef::Function(id) = found else {
            panic!("expected function");
        };
        // Both "work" and "worker_helper" match; "work" costs more.
        assert_eq!(data.function(id).name(), "work");
    }

    #[test]
    fn test_search_line_requires_parent() {
        let mut data = sample();
        let event = data.mapping().type_by_name("Ir").unwrap();
        assert!(data.search(EntityKind::Line, "10", event, None).is_none());

        let main = data
            .functions()
            .find(|(_, f)| f.name() == "main")
            .map(|(id, _)| id)
            .unwrap();
        let found = data
            .search(EntityKind::Line, "10", event, Some(main))
            .unwrap();
        let EntityRef::Line(id) = found else {
            panic!("expected line");
        };
        assert_eq!(data.line(id).lineno(), 10);
    }

    #[test]
    fn test_search_call_by_callee_name() {
        let mut data = sample();
        let event = data.mapping().type_by_name("Ir").unwrap();
        let main = data
            .functions()
            .find(|(_, f)| f.name() == "main")
            .map(|(id, _)| id)
            .unwrap();
        let found = data
            .search(EntityKind::Call, "work", event, Some(main))
            .unwrap();
        let EntityRef::Call(id) = found else {
            panic!("expected call");
        };
        let cost = data.call_cost(id);
        assert_eq!(cost.cost.subcost(0), SubCost::new(500));
        assert_eq!(cost.count, SubCost::new(1));
    }

    #[test]
    fn test_search_no_match() {
        let mut data = sample();
        let event = data.mapping().type_by_name("Ir").unwrap();
        assert!(data
            .search(EntityKind::Object, "libzzz", event, None)
            .is_none());
    }
}
