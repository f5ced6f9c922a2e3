//! Archive naming.
//!
//! Names are the creation instant in UTC at millisecond precision,
//! `YYYYMMDD-HHMMSS-mmm`. When that name is pending in another creation or
//! already registered, `-1`, `-2`, ... is appended until it is free.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

const NAME_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Issues unique archive names and sequence numbers.
///
/// Only names of creations still in progress are kept; finished archives are
/// found through the `taken` check against the registry.
#[derive(Debug, Default)]
pub(crate) struct BackupNamer {
    next_sequence: u64,
    pending: HashSet<String>,
}

impl BackupNamer {
    /// Starts after the highest sequence already in storage.
    pub(crate) fn starting_after(max_sequence: Option<u64>) -> Self {
        Self { next_sequence: max_sequence.map_or(0, |s| s + 1), pending: HashSet::new() }
    }

    /// Issues the name and sequence for an archive created at `at`.
    ///
    /// `taken` reports registered names. The name stays pending until
    /// [`release`](Self::release).
    pub(crate) fn next(
        &mut self,
        at: DateTime<Utc>,
        taken: impl Fn(&str) -> bool,
    ) -> (String, u64) {
        let base = format_name(at);
        let mut name = base.clone();
        let mut suffix = 0u32;
        while self.pending.contains(&name) || taken(&name) {
            suffix += 1;
            name = format!("{base}-{suffix}");
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.insert(name.clone());
        (name, sequence)
    }

    /// Ends a creation, after its archive was registered or abandoned.
    pub(crate) fn release(&mut self, name: &str) {
        self.pending.remove(name);
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Formats the base name for an instant.
pub(crate) fn format_name(at: DateTime<Utc>) -> String {
    at.format(NAME_FORMAT).to_string()
}
