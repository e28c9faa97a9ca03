//! Stable entity ids.
//!
//! Every entity kind lives in a per-kind arena owned by `TraceData`;
//! references between entities are these copyable arena indices instead of
//! pointers, so back-references never create ownership cycles.

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                $name(index as u32)
            }

            /// The arena index behind this id.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

entity_id!(
    /// A binary object (shared library or executable).
    ObjectId
);
entity_id!(
    /// A source file containing function definitions.
    FileId
);
entity_id!(
    /// A class or namespace grouping functions by name prefix.
    ClassId
);
entity_id!(
    /// A traced function.
    FunctionId
);
entity_id!(
    /// One source file a function's lines live in (distinct from the
    /// declaration file when code was inlined).
    SourceId
);
entity_id!(
    /// A code instruction address.
    InstrId
);
entity_id!(
    /// A source line.
    LineId
);
entity_id!(
    /// A call from one function to another.
    CallId
);
entity_id!(
    /// A jump between two instruction addresses.
    InstrJumpId
);
entity_id!(
    /// A jump between two source lines.
    LineJumpId
);
entity_id!(
    /// A call site at a specific instruction address.
    InstrCallId
);
entity_id!(
    /// A call site at a specific source line.
    LineCallId
);
entity_id!(
    /// One loaded trace part.
    PartId
);
entity_id!(
    /// A detected function cycle.
    CycleId
);
