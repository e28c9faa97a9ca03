//! Small cost tuples carried by jumps, calls, and aggregating entities.

use crate::costvec::CostVec;
use crate::subcost::SubCost;

/// Cost of a (conditional) jump.
///
/// `executed` counts how often the jump site was executed, `followed` how
/// often the non-fallthrough edge was taken. For unconditional jumps the
/// two are equal; for conditional jumps `followed <= executed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JumpCost {
    pub executed: SubCost,
    pub followed: SubCost,
}

impl JumpCost {
    /// Creates a zeroed jump cost.
    pub fn new() -> Self {
        JumpCost::default()
    }

    /// Adds another jump cost to this one.
    pub fn add(&mut self, other: &JumpCost) {
        self.executed += other.executed;
        self.followed += other.followed;
    }

    /// Resets both counters to zero.
    pub fn clear(&mut self) {
        *self = JumpCost::default();
    }
}

/// A cost vector with an additional call-count metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCost {
    pub cost: CostVec,
    pub count: SubCost,
}

impl CallCost {
    /// Creates a zeroed call cost.
    pub fn new() -> Self {
        CallCost::default()
    }

    /// Adds another call cost to this one.
    pub fn add(&mut self, other: &CallCost) {
        self.cost.add_vec(&other.cost);
        self.count += other.count;
    }

    /// Resets cost and count to zero.
    pub fn clear(&mut self) {
        *self = CallCost::default();
    }
}

/// Self cost paired with the cumulative (inclusive) cost.
///
/// The inclusive vector covers the self cost plus the transitive cost of
/// everything called from the owning entity, so per metric it never falls
/// below the self cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InclusiveCost {
    pub self_cost: CostVec,
    pub inclusive: CostVec,
}

impl InclusiveCost {
    /// Creates a zeroed pair.
    pub fn new() -> Self {
        InclusiveCost::default()
    }

    /// Adds another pair to this one, slot by slot.
    pub fn add(&mut self, other: &InclusiveCost) {
        self.self_cost.add_vec(&other.self_cost);
        self.inclusive.add_vec(&other.inclusive);
    }

    /// Resets both vectors to zero.
    pub fn clear(&mut self) {
        *self = InclusiveCost::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_cost_add() {
        let mut a = JumpCost {
            executed: SubCost::new(10),
            followed: SubCost::new(4),
        };
        let b = JumpCost {
            executed: SubCost::new(5),
            followed: SubCost::new(5),
        };
        a.add(&b);
        assert_eq!(a.executed, SubCost::new(15));
        assert_eq!(a.followed, SubCost::new(9));
    }

    #[test]
    fn test_call_cost_add() {
        let mut a = CallCost::new();
        a.cost.add_at(0, SubCost::new(100));
        a.count = SubCost::new(2);
        let mut b = CallCost::new();
        b.cost.add_at(0, SubCost::new(50));
        b.count = SubCost::new(1);
        a.add(&b);
        assert_eq!(a.cost.subcost(0), SubCost::new(150));
        assert_eq!(a.count, SubCost::new(3));
    }

    #[test]
    fn test_inclusive_cost_add() {
        let mut a = InclusiveCost::new();
        a.self_cost.add_at(0, SubCost::new(1));
        a.inclusive.add_at(0, SubCost::new(3));
        let b = a;
        a.add(&b);
        assert_eq!(a.self_cost.subcost(0), SubCost::new(2));
        assert_eq!(a.inclusive.subcost(0), SubCost::new(6));
    }
}
