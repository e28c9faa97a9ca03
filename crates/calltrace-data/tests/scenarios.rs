//! End-to-end scenarios driven through the public ingestion facade.

use calltrace_data::{
    EntityKind, EntityRef, FunctionId, PartBuilder, Progress, ProgressSink,
    TraceData,
};
use calltrace_events::{MAX_REAL, SubCost};

fn function_named(data: &TraceData, name: &str) -> FunctionId {
    data.functions()
        .find(|(_, f)| f.name() == name)
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("function '{name}' not interned"))
}

/// One part, one function with lines 10 and 11 holding [50,0,0] and
/// [30,2,1]: the function's self cost reads [80,2,1] and the line map
/// spans 10..=11.
#[test]
fn test_single_part_function_costs() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "/tmp", "callgrind.out.1");
    b.set_events("Ir Dr Dw").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("main.c").unwrap();
    b.set_function("f").unwrap();
    b.cost_row(&["10"], "50 0 0").unwrap();
    b.cost_row(&["11"], "30 2 1").unwrap();
    b.finish();

    let f = function_named(&data, "f");
    let cost = data.function_cost(f);
    assert_eq!(cost.self_cost.subcost(0), SubCost::new(80));
    assert_eq!(cost.self_cost.subcost(1), SubCost::new(2));
    assert_eq!(cost.self_cost.subcost(2), SubCost::new(1));

    let source = data.function(f).sources()[0];
    assert_eq!(data.source_line_range(source), Some((10, 11)));
    assert_eq!(data.source(source).first_lineno(), Some(10));
    assert_eq!(data.source(source).last_lineno(), Some(11));

    // Per-line costs materialize from the fix records.
    let lines: Vec<_> =
        data.source(source).lines().values().copied().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(data.line_cost(lines[0]).subcost(0), SubCost::new(50));
    assert_eq!(data.line_cost(lines[1]).subcost(0), SubCost::new(30));
}

/// Two parts with the same function: with both active the dynamic cost
/// is the sum; deactivating one and invalidating drops its share;
/// reactivating restores it.
#[test]
fn test_activation_toggles_dynamic_cost() {
    let mut data = TraceData::new();
    for (file, cost) in
        [("callgrind.out.1", "100"), ("callgrind.out.2", "200")]
    {
        let mut b = PartBuilder::new(&mut data, "", file);
        b.set_events("Ir").unwrap();
        b.set_object("a.out").unwrap();
        b.set_file("g.c").unwrap();
        b.set_function("g").unwrap();
        b.cost_row(&["1"], cost).unwrap();
        b.finish();
    }

    let g = function_named(&data, "g");
    assert_eq!(
        data.function_cost(g).self_cost.subcost(0),
        SubCost::new(300)
    );

    let second = data.part_ids().nth(1).unwrap();
    assert!(data.activate_part(second, false));
    data.invalidate_dynamic_cost();
    assert_eq!(
        data.function_cost(g).self_cost.subcost(0),
        SubCost::new(100)
    );
    assert_eq!(data.active_totals().subcost(0), SubCost::new(100));
    // The fixed trace totals ignore activation.
    assert_eq!(data.totals().subcost(0), SubCost::new(300));

    assert!(data.activate_part(second, true));
    data.invalidate_dynamic_cost();
    assert_eq!(
        data.function_cost(g).self_cost.subcost(0),
        SubCost::new(300)
    );
}

/// Summation soundness: a clean aggregate equals the sum of its active
/// children, per metric.
#[test]
fn test_summation_soundness() {
    let mut data = TraceData::new();
    for (file, row) in
        [("callgrind.out.1", "10 3"), ("callgrind.out.2", "7 5")]
    {
        let mut b = PartBuilder::new(&mut data, "", file);
        b.set_events("Ir Dr").unwrap();
        b.set_object("a.out").unwrap();
        b.set_file("a.c").unwrap();
        b.set_function("f").unwrap();
        b.cost_row(&["1"], row).unwrap();
        b.finish();
    }
    let f = function_named(&data, "f");
    let total = data.function_cost(f).self_cost;

    let mut expected = calltrace_events::CostVec::new();
    for pf in data.function(f).part_functions() {
        assert!(data.part(pf.part()).is_active());
        expected.add_vec(pf.self_cost());
    }
    for index in 0..MAX_REAL {
        assert_eq!(total.subcost(index), expected.subcost(index));
    }
}

/// Cumulative dominance: inclusive cost never falls below self cost.
#[test]
fn test_cumulative_dominance() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir Dr").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("main").unwrap();
    b.cost_row(&["1"], "10 1").unwrap();
    b.set_call_function("work").unwrap();
    b.call_row(3, &["2"], "90 7").unwrap();
    b.set_function("work").unwrap();
    b.cost_row(&["5"], "90 7").unwrap();
    b.finish();

    let ids: Vec<FunctionId> =
        data.functions().map(|(id, _)| id).collect();
    for id in ids {
        let cost = data.function_cost(id);
        for index in 0..MAX_REAL {
            assert!(
                cost.inclusive.subcost(index)
                    >= cost.self_cost.subcost(index),
                "inclusive < self at index {index}"
            );
        }
    }

    let main = function_named(&data, "main");
    let cost = data.function_cost(main);
    assert_eq!(cost.self_cost.subcost(0), SubCost::new(10));
    assert_eq!(cost.inclusive.subcost(0), SubCost::new(100));
}

/// Activation monotonicity: deactivating a part never increases any
/// dynamic aggregate.
#[test]
fn test_activation_monotonicity() {
    let mut data = TraceData::new();
    for (file, row) in
        [("callgrind.out.1", "40 2"), ("callgrind.out.2", "60 9")]
    {
        let mut b = PartBuilder::new(&mut data, "", file);
        b.set_events("Ir Dr").unwrap();
        b.set_object("a.out").unwrap();
        b.set_file("a.c").unwrap();
        b.set_function("f").unwrap();
        b.cost_row(&["1"], row).unwrap();
        b.finish();
    }
    let f = function_named(&data, "f");
    let before = data.function_cost(f);

    let first = data.part_ids().next().unwrap();
    data.activate_part(first, false);
    data.invalidate_dynamic_cost();
    let after = data.function_cost(f);

    for index in 0..MAX_REAL {
        assert!(
            after.self_cost.subcost(index)
                <= before.self_cost.subcost(index)
        );
        assert!(
            after.inclusive.subcost(index)
                <= before.inclusive.subcost(index)
        );
    }
}

/// Mutual recursion A <-> B forms cycle 1 with empty external edge
/// lists; adding external caller C puts exactly the edge C -> A into the
/// cycle's caller list.
#[test]
fn test_cycle_detection_scenario() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("A").unwrap();
    b.cost_row(&["1"], "5").unwrap();
    b.set_call_function("B").unwrap();
    b.call_row(1, &["2"], "10").unwrap();
    b.set_function("B").unwrap();
    b.cost_row(&["10"], "5").unwrap();
    b.set_call_function("A").unwrap();
    b.call_row(1, &["11"], "10").unwrap();
    b.finish();

    data.update_function_cycles().unwrap();
    assert_eq!(data.function_cycles().len(), 1);
    let cycle = &data.function_cycles()[0];
    assert_eq!(cycle.number(), 1);
    assert_eq!(cycle.members().len(), 2);
    assert!(cycle.callers().is_empty());
    assert!(cycle.callings().is_empty());

    let a = function_named(&data, "A");
    let b_id = function_named(&data, "B");
    assert_eq!(data.function(a).cycle(), data.function(b_id).cycle());

    // Third function C calls A from outside the cycle.
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.2");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("C").unwrap();
    b.cost_row(&["20"], "1").unwrap();
    b.set_call_function("A").unwrap();
    b.call_row(1, &["21"], "25").unwrap();
    b.finish();

    data.update_function_cycles().unwrap();
    let cycle = &data.function_cycles()[0];
    let c = function_named(&data, "C");
    assert!(data.function(c).cycle().is_none());
    assert_eq!(cycle.callers().len(), 1);
    let caller_edge = data.call(cycle.callers()[0]);
    assert_eq!(caller_edge.caller(), c);
    assert_eq!(caller_edge.called(), a);
    assert!(cycle.callings().is_empty());
}

/// Cycle partition: after detection every function is in at most one
/// cycle, and members of one cycle share it.
#[test]
fn test_cycle_partition_property() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    for (caller, called) in [
        ("A", "B"),
        ("B", "A"),
        ("C", "D"),
        ("D", "E"),
        ("E", "C"),
        ("A", "C"),
        ("F", "F"),
    ] {
        b.set_function(caller).unwrap();
        b.cost_row(&["1"], "1").unwrap();
        b.set_call_function(called).unwrap();
        b.call_row(1, &["1"], "1").unwrap();
    }
    b.finish();

    data.update_function_cycles().unwrap();
    assert_eq!(data.function_cycles().len(), 2);

    // Membership lists and per-function cycle links agree.
    for cycle in data.function_cycles() {
        assert!(cycle.members().len() >= 2);
        for &member in cycle.members() {
            let linked = data.function(member).cycle().unwrap();
            assert_eq!(
                data.function_cycle(linked).number(),
                cycle.number()
            );
        }
    }
    // A pure self-caller is not a cycle member.
    let f = function_named(&data, "F");
    assert!(data.function(f).cycle().is_none());
}

/// A function name with a class prefix interns into the class named by
/// the last "::" before the signature.
#[test]
fn test_class_derivation() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("libkio.so").unwrap();
    b.set_file("slave.cpp").unwrap();
    b.set_function("kio::Slave::send(int)").unwrap();
    b.cost_row(&["10"], "1").unwrap();
    b.finish();

    assert!(data.class_map().contains_key("kio::Slave"));
    assert!(!data.class_map().contains_key("kio::Slave::send"));
    let f = function_named(&data, "kio::Slave::send(int)");
    let class = data.function(f).class();
    assert_eq!(data.class(class).name(), "kio::Slave");
}

/// Compressed-id round trip: binding `(7) foo` and then referring to
/// `(7)` yields the same entity as interning "foo" directly.
#[test]
fn test_compressed_round_trip() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("(1) a.out").unwrap();
    b.set_file("(1) a.c").unwrap();
    b.set_function("(7) foo").unwrap();
    b.cost_row(&["1"], "10").unwrap();
    b.set_function("(7)").unwrap();
    b.cost_row(&["2"], "10").unwrap();
    b.finish();

    let foo = function_named(&data, "foo");
    assert_eq!(data.functions().count(), 1);
    assert_eq!(
        data.function_cost(foo).self_cost.subcost(0),
        SubCost::new(20)
    );
}

/// Activating an unchanged active set returns false and the follow-up
/// invalidation is a no-op.
#[test]
fn test_idempotent_activation() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("f").unwrap();
    b.cost_row(&["1"], "42").unwrap();
    b.finish();

    let f = function_named(&data, "f");
    let parts: Vec<_> = data.part_ids().collect();
    data.function_cost(f);

    assert!(!data.activate_parts(&parts, true));
    data.invalidate_dynamic_cost();
    // Still clean: the read below must not see a recompute of a dirty
    // entity (observable through the cached value being identical and
    // the dirty flag internals; here we just re-read).
    assert_eq!(
        data.function_cost(f).self_cost.subcost(0),
        SubCost::new(42)
    );
}

/// Line maps materialized before a later part arrives rebuild to cover
/// the new part's records without double counting the old ones.
#[test]
fn test_line_map_rebuilds_after_new_part() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("f").unwrap();
    b.cost_row(&["10"], "100").unwrap();
    b.finish();

    let f = function_named(&data, "f");
    let source = data.function(f).sources()[0];
    data.ensure_lines(f);
    let line = *data.source(source).lines().get(&10).unwrap();
    assert_eq!(data.line_cost(line).subcost(0), SubCost::new(100));

    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.2");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("f").unwrap();
    b.cost_row(&["10"], "40").unwrap();
    b.finish();

    data.ensure_lines(f);
    assert_eq!(data.line_cost(line).subcost(0), SubCost::new(140));
    // Two per-part leaves, not a duplicated first part.
    assert_eq!(data.line(line).items().len(), 2);
}

/// The search surface ranks name matches by metric and scopes positions
/// to their function.
#[test]
fn test_search_surface() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir Dr").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("alpha.c").unwrap();
    b.set_function("alpha_small").unwrap();
    b.cost_row(&["1"], "10 0").unwrap();
    b.set_function("alpha_big").unwrap();
    b.cost_row(&["2"], "900 5").unwrap();
    b.finish();

    let ir = data.mapping().type_by_name("Ir").unwrap();
    let found = data
        .search(EntityKind::Function, "alpha", ir, None)
        .unwrap();
    let EntityRef::Function(id) = found else {
        panic!("expected a function");
    };
    assert_eq!(data.function(id).name(), "alpha_big");
}

#[derive(Default)]
struct CountingSink {
    parts: usize,
    cycles: usize,
    cancel_after_first_cycle: bool,
}

impl ProgressSink for CountingSink {
    fn on_part_loaded(&mut self, _part: &calltrace_data::Part) -> Progress {
        self.parts += 1;
        Progress::Continue
    }

    fn on_cycle_detected(
        &mut self,
        _cycle: &calltrace_data::FunctionCycle,
    ) -> Progress {
        self.cycles += 1;
        if self.cancel_after_first_cycle {
            Progress::Cancel
        } else {
            Progress::Continue
        }
    }
}

/// The progress sink hears about parts and cycles; cancelling stops the
/// recording of further cycles at the next boundary.
#[test]
fn test_progress_sink() {
    let mut sink = CountingSink {
        cancel_after_first_cycle: true,
        ..CountingSink::default()
    };

    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    // Two independent two-function cycles.
    for (caller, called) in
        [("A", "B"), ("B", "A"), ("C", "D"), ("D", "C")]
    {
        b.set_function(caller).unwrap();
        b.cost_row(&["1"], "1").unwrap();
        b.set_call_function(called).unwrap();
        b.call_row(1, &["1"], "1").unwrap();
    }
    let (_, progress) = b.finish_with(&mut sink);
    assert_eq!(progress, Progress::Continue);
    assert_eq!(sink.parts, 1);

    data.update_function_cycles_with(&mut sink).unwrap();
    // Cancel after the first cycle: the second component is dropped.
    assert_eq!(sink.cycles, 1);
    assert_eq!(data.function_cycles().len(), 1);
}

/// Derived metrics defined on the trace's catalogue evaluate against
/// aggregate vectors.
#[test]
fn test_derived_metric_over_aggregates() {
    let mut data = TraceData::new();
    let mut b = PartBuilder::new(&mut data, "", "callgrind.out.1");
    b.set_events("Ir Dr Dw").unwrap();
    b.set_object("a.out").unwrap();
    b.set_file("a.c").unwrap();
    b.set_function("f").unwrap();
    b.cost_row(&["1"], "100 20 5").unwrap();
    b.finish();

    let rw = data
        .mapping_mut()
        .add_derived("RW", "Reads and writes", "Dr + Dw")
        .unwrap();
    let f = function_named(&data, "f");
    let cost = data.function_cost(f).self_cost;
    assert_eq!(data.event_value(rw, &cost), SubCost::new(25));
}
