//! Cycle detection over the call graph.
//!
//! Runs Tarjan's strongly-connected-component algorithm on the graph
//! whose nodes are functions and whose edges are non-recursive calls.
//! Components of size two or more become [`FunctionCycle`] entries,
//! numbered sequentially from 1; every member's `cycle` field points at
//! its entry. Analogous detectors find cycles between classes, files, and
//! objects, induced by calls crossing container boundaries.

use calltrace_events::InclusiveCost;
use indexmap::IndexSet;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::data::TraceData;
use crate::error::TraceError;
use crate::ids::{CallId, ClassId, CycleId, FileId, FunctionId, ObjectId};
use crate::progress::{NoProgress, Progress, ProgressSink};

/// A cycle of recursively calling functions, shown as a synthetic
/// function.
///
/// The caller list is the union of incoming edges from outside the
/// cycle, the callings list the union of outgoing edges to the outside.
/// Aggregated cost excludes cycle-internal call edges, which would double
/// count.
#[derive(Debug)]
pub struct FunctionCycle {
    pub(crate) number: u32,
    pub(crate) base: FunctionId,
    pub(crate) members: Vec<FunctionId>,
    pub(crate) callers: Vec<CallId>,
    pub(crate) callings: Vec<CallId>,
    pub(crate) dirty: bool,
    pub(crate) cost: InclusiveCost,
}

impl FunctionCycle {
    /// The cycle number, starting at 1.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// The member with the greatest inclusive cost in the primary
    /// metric; the cycle is displayed under this function's name.
    pub fn base(&self) -> FunctionId {
        self.base
    }

    /// The member functions; always two or more.
    pub fn members(&self) -> &[FunctionId] {
        &self.members
    }

    /// Incoming calls from functions outside the cycle.
    pub fn callers(&self) -> &[CallId] {
        &self.callers
    }

    /// Outgoing calls to functions outside the cycle.
    pub fn callings(&self) -> &[CallId] {
        &self.callings
    }
}

/// A cycle between containers (classes, files, or objects), detected
/// from calls crossing container boundaries.
#[derive(Debug)]
pub struct ContainerCycle<I> {
    pub(crate) number: u32,
    pub(crate) members: Vec<I>,
}

impl<I: Copy> ContainerCycle<I> {
    /// The cycle number, starting at 1.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// The member containers.
    pub fn members(&self) -> &[I] {
        &self.members
    }
}

/// One endpoint of a call, as shown by caller/callee views.
///
/// With cycle skipping, a member function is replaced by its cycle, so
/// navigation collapses recursion groups into one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallEndpoint {
    Function(FunctionId),
    Cycle(CycleId),
}

impl TraceData {
    /// The calling side of a call. With `skip_cycle`, a caller inside a
    /// cycle is reported as the cycle itself.
    pub fn call_caller(&self, id: CallId, skip_cycle: bool) -> CallEndpoint {
        let caller = self.calls[id.index()].caller();
        match self.functions[caller.index()].cycle {
            Some(cycle) if skip_cycle => CallEndpoint::Cycle(cycle),
            _ => CallEndpoint::Function(caller),
        }
    }

    /// The called side of a call. With `skip_cycle`, a callee inside a
    /// cycle is reported as the cycle itself.
    pub fn call_called(&self, id: CallId, skip_cycle: bool) -> CallEndpoint {
        let called = self.calls[id.index()].called();
        match self.functions[called.index()].cycle {
            Some(cycle) if skip_cycle => CallEndpoint::Cycle(cycle),
            _ => CallEndpoint::Function(called),
        }
    }

    /// The function cycles found by the last detection run.
    pub fn function_cycles(&self) -> &[FunctionCycle] {
        &self.cycles
    }

    /// One function cycle by id.
    pub fn function_cycle(&self, id: CycleId) -> &FunctionCycle {
        &self.cycles[id.index()]
    }

    /// Class cycles found by the last [`Self::update_class_cycles`] run.
    pub fn class_cycles(&self) -> &[ContainerCycle<ClassId>] {
        &self.class_cycles
    }

    /// File cycles found by the last [`Self::update_file_cycles`] run.
    pub fn file_cycles(&self) -> &[ContainerCycle<FileId>] {
        &self.file_cycles
    }

    /// Object cycles found by the last [`Self::update_object_cycles`]
    /// run.
    pub fn object_cycles(&self) -> &[ContainerCycle<ObjectId>] {
        &self.object_cycles
    }

    /// Returns true while cycle detection is running; cost reads during
    /// this window return cached values without recomputing.
    pub fn in_function_cycle_update(&self) -> bool {
        self.in_cycle_update
    }

    /// The cycle number of a cycle-internal call, else 0.
    ///
    /// A call is cycle-internal when caller and called function are in
    /// the same cycle and the caller is not the cycle's base function;
    /// such edges are withheld from inclusive sums.
    pub fn call_in_cycle(&self, id: CallId) -> u32 {
        let call = &self.calls[id.index()];
        let caller_cycle = self.functions[call.caller().index()].cycle;
        let called_cycle = self.functions[call.called().index()].cycle;
        match (caller_cycle, called_cycle) {
            (Some(a), Some(b)) if a == b => {
                let cycle = &self.cycles[a.index()];
                if cycle.base == call.caller() {
                    0
                } else {
                    cycle.number
                }
            }
            _ => 0,
        }
    }

    /// Detects function cycles, replacing any previous detection result.
    pub fn update_function_cycles(&mut self) -> Result<(), TraceError> {
        self.update_function_cycles_with(&mut NoProgress)
    }

    /// Detects function cycles, polling `sink` after each cycle found.
    ///
    /// A cancel from the sink stops the recording of further cycles at
    /// that boundary; cycles already recorded stay valid. Fails with a
    /// reentry error when called while a detection is already running.
    pub fn update_function_cycles_with(
        &mut self,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), TraceError> {
        if self.in_cycle_update {
            return Err(TraceError::reentry());
        }

        // Drop the previous result, then bring every function's
        // inclusive cost up to date while queries are still allowed:
        // base selection below reads them. Caches computed under the old
        // membership applied different edge exclusions, so everything
        // recomputes.
        for f in &mut self.functions {
            f.cycle = None;
        }
        self.cycles.clear();
        self.invalidate_all();
        let function_ids: Vec<FunctionId> =
            (0..self.functions.len()).map(FunctionId::new).collect();
        for &fid in &function_ids {
            self.ensure_function_clean(fid);
        }

        self.in_cycle_update = true;

        let mut graph =
            DiGraph::<(), ()>::with_capacity(self.functions.len(), self.calls.len());
        for _ in 0..self.functions.len() {
            graph.add_node(());
        }
        for call in &self.calls {
            if !call.is_recursive() {
                graph.add_edge(
                    NodeIndex::new(call.caller().index()),
                    NodeIndex::new(call.called().index()),
                    (),
                );
            }
        }

        let components = tarjan_scc(&graph);
        let mut cancelled = false;
        for component in components {
            if component.len() < 2 || cancelled {
                continue;
            }
            let members: Vec<FunctionId> = component
                .iter()
                .map(|node| FunctionId::new(node.index()))
                .collect();

            // Base: greatest inclusive cost in the primary metric, ties
            // broken by the lexicographically smaller name.
            let base = members
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    let fa = &self.functions[a.index()];
                    let fb = &self.functions[b.index()];
                    fa.cost
                        .inclusive
                        .subcost(0)
                        .cmp(&fb.cost.inclusive.subcost(0))
                        .then_with(|| fb.name().cmp(fa.name()))
                })
                .unwrap_or(members[0]);

            let id = CycleId::new(self.cycles.len());
            let number = (self.cycles.len() + 1) as u32;
            for &member in &members {
                self.functions[member.index()].cycle = Some(id);
            }
            debug!(
                cycle = number,
                members = members.len(),
                base = self.functions[base.index()].name(),
                "detected function cycle"
            );
            self.cycles.push(FunctionCycle {
                number,
                base,
                members,
                callers: Vec::new(),
                callings: Vec::new(),
                dirty: true,
                cost: InclusiveCost::new(),
            });
            if sink.on_cycle_detected(&self.cycles[id.index()])
                == Progress::Cancel
            {
                cancelled = true;
            }
        }

        // External edge lists. Discovery order is kept; the set guards
        // against duplicates should the call graph ever hand an edge to
        // the same cycle twice.
        for cycle_index in 0..self.cycles.len() {
            let mut callers: IndexSet<CallId> = IndexSet::new();
            let mut callings: IndexSet<CallId> = IndexSet::new();
            let id = CycleId::new(cycle_index);
            for (call_index, call) in self.calls.iter().enumerate() {
                let caller_in =
                    self.functions[call.caller().index()].cycle == Some(id);
                let called_in =
                    self.functions[call.called().index()].cycle == Some(id);
                if called_in && !caller_in {
                    callers.insert(CallId::new(call_index));
                }
                if caller_in && !called_in {
                    callings.insert(CallId::new(call_index));
                }
            }
            let cycle = &mut self.cycles[cycle_index];
            cycle.callers = callers.into_iter().collect();
            cycle.callings = callings.into_iter().collect();
        }

        self.in_cycle_update = false;

        // Membership changed which call edges count into inclusive
        // sums, so every cached aggregate is stale.
        self.invalidate_all();
        Ok(())
    }

    /// Self and inclusive cost of a cycle over the active parts.
    ///
    /// Self cost sums the members; inclusive cost adds the external
    /// outgoing edges only, never the cycle-internal ones.
    pub fn cycle_cost(&mut self, id: CycleId) -> InclusiveCost {
        if !self.in_cycle_update && self.cycles[id.index()].dirty {
            let members = self.cycles[id.index()].members.clone();
            let mut cost = InclusiveCost::new();
            for member in members {
                self.ensure_function_clean(member);
                cost.self_cost
                    .add_vec(&self.functions[member.index()].cost.self_cost);
            }
            cost.inclusive.add_vec(&cost.self_cost);
            let callings = self.cycles[id.index()].callings.clone();
            for cid in callings {
                let call_cost = self.call_cost(cid);
                cost.inclusive.add_vec(&call_cost.cost);
            }
            let cycle = &mut self.cycles[id.index()];
            cycle.cost = cost;
            cycle.dirty = false;
        }
        self.cycles[id.index()].cost
    }

    /// Detects cycles between classes.
    pub fn update_class_cycles(&mut self) {
        let edges = self.container_edges(|data, f| {
            data.functions[f.index()].class().index()
        });
        self.class_cycles =
            number_cycles(self.classes.len(), &edges, ClassId::new);
        debug!(count = self.class_cycles.len(), "detected class cycles");
    }

    /// Detects cycles between source files.
    pub fn update_file_cycles(&mut self) {
        let edges = self.container_edges(|data, f| {
            data.functions[f.index()].file().index()
        });
        self.file_cycles =
            number_cycles(self.files.len(), &edges, FileId::new);
        debug!(count = self.file_cycles.len(), "detected file cycles");
    }

    /// Detects cycles between binary objects.
    pub fn update_object_cycles(&mut self) {
        let edges = self.container_edges(|data, f| {
            data.functions[f.index()].object().index()
        });
        self.object_cycles =
            number_cycles(self.objects.len(), &edges, ObjectId::new);
        debug!(count = self.object_cycles.len(), "detected object cycles");
    }

    /// Cross-container edges induced by the call graph under a
    /// function-to-container projection.
    fn container_edges(
        &self,
        container_of: impl Fn(&TraceData, FunctionId) -> usize,
    ) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for call in &self.calls {
            let from = container_of(self, call.caller());
            let to = container_of(self, call.called());
            if from != to {
                edges.push((from, to));
            }
        }
        edges
    }
}

/// Runs Tarjan's SCC over a container graph and numbers the components
/// of size two or more sequentially from 1.
fn number_cycles<I>(
    node_count: usize,
    edges: &[(usize, usize)],
    make_id: impl Fn(usize) -> I,
) -> Vec<ContainerCycle<I>> {
    let mut graph = DiGraph::<(), ()>::with_capacity(node_count, edges.len());
    for _ in 0..node_count {
        graph.add_node(());
    }
    for &(from, to) in edges {
        graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), ());
    }
    tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() >= 2)
        .enumerate()
        .map(|(index, component)| ContainerCycle {
            number: (index + 1) as u32,
            members: component
                .into_iter()
                .map(|node| make_id(node.index()))
                .collect(),
        })
        .collect()
}
