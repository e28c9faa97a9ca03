//! Trace parts: one loaded part file each.

use calltrace_events::{CostVec, SubMapping};

/// All data read from one part file: the costs that happened in one time
/// slice or process/thread subset of the traced command.
///
/// Descriptive fields come from the part file header. After ingest the
/// only mutation is toggling the `active` flag, which decides whether the
/// part contributes to dynamic aggregates.
#[derive(Debug)]
pub struct Part {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) trigger: String,
    pub(crate) timeframe: String,
    pub(crate) version: String,
    pub(crate) number: u32,
    pub(crate) thread_id: u32,
    pub(crate) process_id: u32,
    pub(crate) totals: CostVec,
    pub(crate) mapping: Option<SubMapping>,
    pub(crate) active: bool,
    pub(crate) rejected: bool,
    pub(crate) skipped_records: u32,
}

impl Part {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Part {
            name: name.into(),
            description: String::new(),
            trigger: String::new(),
            timeframe: String::new(),
            version: String::new(),
            number: 0,
            thread_id: 0,
            process_id: 0,
            totals: CostVec::new(),
            mapping: None,
            active: true,
            rejected: false,
            skipped_records: 0,
        }
    }

    /// The part file name, including its directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file name without leading directories.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Free-form description from the part header.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// What triggered the dump of this part.
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// The covered timeframe, as written by the generator.
    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    /// Format version of the part file.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Sequence number of this part within the trace.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Thread id the part was recorded for.
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// Process id the part was recorded for.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// The part's totals vector.
    pub fn totals(&self) -> &CostVec {
        &self.totals
    }

    /// The column mapping the part's cost rows were read under.
    pub fn mapping(&self) -> Option<&SubMapping> {
        self.mapping.as_ref()
    }

    /// Whether the part contributes to dynamic aggregates.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether ingestion rejected this part; rejected parts can never be
    /// activated.
    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Number of body records skipped as malformed during ingest.
    pub fn skipped_records(&self) -> u32 {
        self.skipped_records
    }

    /// Key for the canonical part ordering: by part number, then thread
    /// id, then name.
    pub fn sort_key(&self) -> (u32, u32, &str) {
        (self.number, self.thread_id, &self.name)
    }

    /// Sets the active flag. Returns true if the state actually changed;
    /// setting an already-set state is a no-op. Rejected parts stay
    /// inactive.
    pub(crate) fn activate(&mut self, active: bool) -> bool {
        if self.rejected || self.active == active {
            return false;
        }
        self.active = active;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_is_idempotent() {
        let mut part = Part::new("callgrind.out.1");
        assert!(part.is_active());
        assert!(!part.activate(true));
        assert!(part.activate(false));
        assert!(!part.activate(false));
        assert!(part.activate(true));
    }

    #[test]
    fn test_rejected_parts_stay_inactive() {
        let mut part = Part::new("callgrind.out.2");
        part.rejected = true;
        part.active = false;
        assert!(!part.activate(true));
        assert!(!part.is_active());
    }

    #[test]
    fn test_short_name_strips_directories() {
        let part = Part::new("/tmp/traces/callgrind.out.3");
        assert_eq!(part.short_name(), "callgrind.out.3");
    }
}
