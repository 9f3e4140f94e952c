//! Diff of the rendered job rows against the registry.
//!
//! The reconciler remembers the snapshot each row was last rendered with.
//! Given the registry's current handles it reports rows to insert (with
//! their position in the sorted result), rows whose content changed, and
//! rows that disappeared.
//!
//! Sorting is stable and compares raw field values only. Jobs that compare
//! equal keep the order the server listed them in; no further tie-breaking
//! is applied.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::models::{JobSnapshot, PresentationHint};
use super::registry::JobHandle;

/// Column the job table is sorted by, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    #[default]
    Name,
    State,
    Type,
    PartSize,
    Compression,
    Crypt,
    LastExecuted,
    EstimatedTime,
}

impl SortKey {
    pub const ALL: [SortKey; 8] = [
        SortKey::Name,
        SortKey::State,
        SortKey::Type,
        SortKey::PartSize,
        SortKey::Compression,
        SortKey::Crypt,
        SortKey::LastExecuted,
        SortKey::EstimatedTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::State => "state",
            SortKey::Type => "type",
            SortKey::PartSize => "part-size",
            SortKey::Compression => "compression",
            SortKey::Crypt => "crypt",
            SortKey::LastExecuted => "last-executed",
            SortKey::EstimatedTime => "estimated-time",
        }
    }

    /// The following key, wrapping around.
    pub fn next(&self) -> SortKey {
        let index = SortKey::ALL.iter().position(|k| k == self).unwrap_or(0);
        SortKey::ALL[(index + 1) % SortKey::ALL.len()]
    }

    pub fn compare(&self, a: &JobSnapshot, b: &JobSnapshot) -> Ordering {
        match self {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::State => a.state.cmp(&b.state),
            SortKey::Type => a.archive_type.cmp(&b.archive_type),
            SortKey::PartSize => a.archive_part_size.cmp(&b.archive_part_size),
            SortKey::Compression => a.compression_text().cmp(&b.compression_text()),
            SortKey::Crypt => a.crypt_text().cmp(&b.crypt_text()),
            SortKey::LastExecuted => a.last_executed_at.cmp(&b.last_executed_at),
            SortKey::EstimatedTime => a.estimated_rest_seconds.cmp(&b.estimated_rest_seconds),
        }
    }

    /// Stable in-place sort.
    pub fn sort(&self, jobs: &mut [JobSnapshot]) {
        jobs.sort_by(|a, b| self.compare(a, b));
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown sort key '{}'", s))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered job row.
#[derive(Debug, Clone)]
pub struct Row {
    pub handle: JobHandle,
    /// Content the row was last rendered with.
    pub snapshot: JobSnapshot,
    pub hint: PresentationHint,
}

/// Changes between two reconciliations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDiff {
    /// New rows as `(position, uuid)`, positions refer to the sorted result.
    pub inserted: Vec<(usize, String)>,
    /// Rows present before and after whose content changed.
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Reconciler {
    sort: SortKey,
    rows: Vec<Row>,
}

impl Reconciler {
    pub fn new(sort: SortKey) -> Self {
        Self {
            sort,
            rows: Vec::new(),
        }
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort
    }

    /// Rows in display order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Change the sort key and reorder the current rows.
    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
        self.rows
            .sort_by(|a, b| sort.compare(&a.snapshot, &b.snapshot));
    }

    /// Bring the rows in line with `jobs` (in registry order).
    pub fn reconcile(&mut self, jobs: &[JobHandle]) -> RowDiff {
        let mut previous: HashMap<String, Row> = self
            .rows
            .drain(..)
            .map(|row| (row.snapshot.uuid.clone(), row))
            .collect();

        let mut next: Vec<Row> = jobs
            .iter()
            .map(|handle| {
                let snapshot = handle.snapshot();
                Row {
                    handle: handle.clone(),
                    hint: snapshot.hint(),
                    snapshot,
                }
            })
            .collect();
        next.sort_by(|a, b| self.sort.compare(&a.snapshot, &b.snapshot));

        let mut diff = RowDiff::default();
        for (position, row) in next.iter().enumerate() {
            match previous.remove(&row.snapshot.uuid) {
                Some(old) => {
                    if old.snapshot != row.snapshot || !old.handle.same(&row.handle) {
                        diff.updated.push(row.snapshot.uuid.clone());
                    }
                }
                None => diff.inserted.push((position, row.snapshot.uuid.clone())),
            }
        }

        let mut removed: Vec<String> = previous.into_keys().collect();
        removed.sort();
        diff.removed = removed;

        self.rows = next;
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::JobState;
    use crate::core::registry::JobRegistry;

    fn job(uuid: &str, name: &str, part_size: u64) -> JobSnapshot {
        JobSnapshot {
            uuid: uuid.to_string(),
            name: name.to_string(),
            archive_part_size: part_size,
            state: JobState::Waiting,
            ..Default::default()
        }
    }

    #[test]
    fn first_reconcile_inserts_sorted() {
        let registry = JobRegistry::new();
        registry.replace(vec![job("b", "beta", 0), job("a", "alpha", 0)]);

        let mut reconciler = Reconciler::new(SortKey::Name);
        let diff = reconciler.reconcile(&registry.handles());

        assert_eq!(
            diff.inserted,
            vec![(0, "a".to_string()), (1, "b".to_string())]
        );
        assert!(diff.updated.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn unchanged_jobs_produce_empty_diff() {
        let registry = JobRegistry::new();
        registry.replace(vec![job("a", "alpha", 0)]);
        let mut reconciler = Reconciler::new(SortKey::Name);
        reconciler.reconcile(&registry.handles());
        let handle = reconciler.rows()[0].handle.clone();

        registry.replace(vec![job("a", "alpha", 0)]);
        let diff = reconciler.reconcile(&registry.handles());

        assert!(diff.is_empty());
        assert!(reconciler.rows()[0].handle.same(&handle));
    }

    #[test]
    fn changed_and_removed_rows() {
        let registry = JobRegistry::new();
        registry.replace(vec![job("a", "alpha", 0), job("b", "beta", 0)]);
        let mut reconciler = Reconciler::new(SortKey::Name);
        reconciler.reconcile(&registry.handles());

        let mut running = job("a", "alpha", 0);
        running.state = JobState::Running;
        registry.replace(vec![running, job("c", "gamma", 0)]);
        let diff = reconciler.reconcile(&registry.handles());

        assert_eq!(diff.updated, vec!["a".to_string()]);
        assert_eq!(diff.removed, vec!["b".to_string()]);
        assert_eq!(diff.inserted, vec![(1, "c".to_string())]);
        assert_eq!(reconciler.rows()[0].hint, PresentationHint::Active);
    }

    #[test]
    fn sort_by_part_size_is_stable() {
        let mut jobs = vec![
            job("x", "zulu", 100),
            job("y", "alpha", 100),
            job("z", "mike", 10),
        ];
        SortKey::PartSize.sort(&mut jobs);

        let order: Vec<&str> = jobs.iter().map(|j| j.uuid.as_str()).collect();
        assert_eq!(order, vec!["z", "x", "y"]);
    }

    #[test]
    fn set_sort_reorders_rows() {
        let registry = JobRegistry::new();
        registry.replace(vec![job("a", "alpha", 300), job("b", "beta", 100)]);
        let mut reconciler = Reconciler::new(SortKey::Name);
        reconciler.reconcile(&registry.handles());

        reconciler.set_sort(SortKey::PartSize);

        let order: Vec<&str> = reconciler
            .rows()
            .iter()
            .map(|r| r.snapshot.uuid.as_str())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn sort_key_parsing_and_cycling() {
        assert_eq!("Part-Size".parse::<SortKey>(), Ok(SortKey::PartSize));
        assert!("colour".parse::<SortKey>().is_err());
        assert_eq!(SortKey::Name.next(), SortKey::State);
        assert_eq!(SortKey::EstimatedTime.next(), SortKey::Name);
    }
}
