//! Container entities: binary objects, source files, classes.
//!
//! Containers group functions and aggregate their costs. Their sums are
//! dynamic: they depend on the active part set and recompute lazily via
//! the dirty flag.

use calltrace_events::InclusiveCost;

use crate::ids::{FunctionId, SourceId};

/// A binary object (shared library or executable) with defined functions.
#[derive(Debug)]
pub struct Object {
    pub(crate) name: String,
    pub(crate) short_name: String,
    pub(crate) functions: Vec<FunctionId>,
    pub(crate) dirty: bool,
    pub(crate) cost: InclusiveCost,
}

impl Object {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let short_name =
            name.rsplit('/').next().unwrap_or(&name).to_string();
        Object {
            name,
            short_name,
            functions: Vec::new(),
            dirty: true,
            cost: InclusiveCost::new(),
        }
    }

    /// The full object path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The object path without leading directories.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Functions defined in this object.
    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }
}

/// A source file containing function definitions.
#[derive(Debug)]
pub struct File {
    pub(crate) name: String,
    pub(crate) functions: Vec<FunctionId>,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) dirty: bool,
    pub(crate) cost: InclusiveCost,
}

impl File {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        File {
            name: name.into(),
            functions: Vec::new(),
            sources: Vec::new(),
            dirty: true,
            cost: InclusiveCost::new(),
        }
    }

    /// The full file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file name without leading directories.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Functions declared in this file.
    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }

    /// Per-function line holders whose lines live in this file, including
    /// inlined code from functions declared elsewhere.
    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }
}

/// A class or namespace.
///
/// If a function symbol has a prefix ending in `"::"`, the prefix names
/// its class; symbols without such a prefix land in the global
/// pseudo-class, whose name is empty.
#[derive(Debug)]
pub struct Class {
    pub(crate) name: String,
    pub(crate) functions: Vec<FunctionId>,
    pub(crate) dirty: bool,
    pub(crate) cost: InclusiveCost,
}

impl Class {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Class {
            name: name.into(),
            functions: Vec::new(),
            dirty: true,
            cost: InclusiveCost::new(),
        }
    }

    /// The class name; empty for the global pseudo-class.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name; the global pseudo-class shows as `(global)`.
    pub fn pretty_name(&self) -> &str {
        if self.name.is_empty() {
            "(global)"
        } else {
            &self.name
        }
    }

    /// Functions belonging to this class.
    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_short_name() {
        let object = Object::new("/usr/lib/libc.so.6");
        assert_eq!(object.short_name(), "libc.so.6");
        assert_eq!(object.name(), "/usr/lib/libc.so.6");
    }

    #[test]
    fn test_global_class_pretty_name() {
        let class = Class::new("");
        assert_eq!(class.pretty_name(), "(global)");
        let named = Class::new("kio::Slave");
        assert_eq!(named.pretty_name(), "kio::Slave");
    }
}
