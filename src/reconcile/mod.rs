//! Merges the enumeration with all evidence into a used/unused/excluded partition.
//!
//! The merge is a pure function of its inputs: evidence is unioned regardless of the
//! order sets arrive in, and every collection is ordered, so identical inputs always
//! produce identical partitions.
mod error;
mod exclusion;
mod partition;

pub use error::{ReconciliationError, Result};
pub use exclusion::ExclusionSet;
pub use partition::{FileRecord, UsagePartition};

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use crate::evidence::EvidenceSet;
use partition::checked_total;

/// Partitions `records` using the union of `evidence`.
///
/// A record is excluded if its path lies under an exclusion prefix, even when some
/// source saw it in use. Otherwise it is used if any source reported its path, and
/// unused if none did. A path enumerated twice keeps its first size.
///
/// # Errors
///
/// Returns a [`ReconciliationError`] if a size total overflows or the partition
/// fails its conservation checks.
pub fn reconcile(
    records: impl IntoIterator<Item = FileRecord>,
    evidence: &[EvidenceSet],
    exclusions: &ExclusionSet,
) -> Result<UsagePartition> {
    let mut files: BTreeMap<String, u64> = BTreeMap::new();
    let mut duplicates = 0usize;
    for record in records {
        match files.entry(record.path) {
            Entry::Vacant(slot) => {
                slot.insert(record.size_bytes);
            }
            Entry::Occupied(_) => duplicates += 1,
        }
    }
    if duplicates > 0 {
        log::debug!("ignored {duplicates} repeated enumeration entries");
    }

    let seen: BTreeSet<&str> = evidence
        .iter()
        .flat_map(|set| set.paths.iter().map(String::as_str))
        .collect();

    let mut partition = UsagePartition {
        degraded_sources: evidence
            .iter()
            .filter(|set| set.partial_failure)
            .map(|set| set.source)
            .collect(),
        unmatched_evidence: seen
            .iter()
            .filter(|path| !files.contains_key(**path))
            .map(|path| (*path).to_owned())
            .collect(),
        ..UsagePartition::default()
    };

    for (path, size_bytes) in files {
        let bucket = if exclusions.is_excluded(&path) {
            &mut partition.excluded
        } else if seen.contains(path.as_str()) {
            &mut partition.used
        } else {
            &mut partition.unused
        };
        bucket.insert(FileRecord { path, size_bytes });
    }

    partition.used_size = checked_total(&partition.used, "used")?;
    partition.unused_size = checked_total(&partition.unused, "unused")?;
    partition.excluded_size = checked_total(&partition.excluded, "excluded")?;
    partition.total_size = partition
        .used_size
        .checked_add(partition.unused_size)
        .and_then(|sum| sum.checked_add(partition.excluded_size))
        .ok_or(ReconciliationError::Overflow { partition: "total" })?;

    check_invariants(&partition, &seen)?;
    log::debug!(
        "reconciled {} files: {} used, {} unused, {} excluded",
        partition.file_count(),
        partition.used.len(),
        partition.unused.len(),
        partition.excluded.len()
    );
    Ok(partition)
}

fn check_invariants(partition: &UsagePartition, seen: &BTreeSet<&str>) -> Result<()> {
    if let Some(record) = partition.used.iter().find(|r| !seen.contains(r.path.as_str())) {
        return Err(ReconciliationError::Invariant(format!(
            "`{}` is used without evidence",
            record.path
        )));
    }

    let mut paths = BTreeSet::new();
    for record in partition
        .used
        .iter()
        .chain(&partition.unused)
        .chain(&partition.excluded)
    {
        if !paths.insert(record.path.as_str()) {
            return Err(ReconciliationError::Invariant(format!(
                "`{}` appears in more than one partition",
                record.path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::SourceId;

    fn evidence(source: SourceId, paths: &[&str]) -> EvidenceSet {
        let mut set = EvidenceSet::begin(source);
        set.paths = paths.iter().map(|p| (*p).to_owned()).collect();
        set
    }

    fn records(list: &[(&str, u64)]) -> Vec<FileRecord> {
        list.iter().map(|(p, s)| FileRecord::new(*p, *s)).collect()
    }

    #[test]
    fn test_basic_partition() {
        let partition = reconcile(
            records(&[("/a", 10), ("/b", 5), ("/proc/x", 1)]),
            &[evidence(SourceId::OpenFd, &["/a"])],
            &ExclusionSet::new(["/proc"]),
        )
        .unwrap();

        assert_eq!(partition.used_paths().collect::<Vec<_>>(), vec!["/a"]);
        assert_eq!(partition.unused, BTreeSet::from([FileRecord::new("/b", 5)]));
        assert_eq!(
            partition.excluded,
            BTreeSet::from([FileRecord::new("/proc/x", 1)])
        );
        assert_eq!(partition.unused_size, 5);
        assert_eq!(partition.used_size, 10);
        assert_eq!(partition.total_size, 16);
    }

    #[test]
    fn test_all_sources_failed() {
        let failed: Vec<_> = SourceId::ALL
            .into_iter()
            .map(|s| EvidenceSet::failed(s, "tool absent"))
            .collect();
        let partition = reconcile(
            records(&[("/bin/sh", 100), ("/etc/os-release", 4), ("/tmp/x", 1)]),
            &failed,
            &ExclusionSet::new(["/tmp"]),
        )
        .unwrap();

        assert!(partition.used.is_empty());
        assert_eq!(partition.unused.len(), 2);
        assert_eq!(partition.unused_size, 104);
        assert_eq!(
            partition.degraded_sources,
            SourceId::ALL.into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn test_duplicate_paths_counted_once() {
        let partition = reconcile(
            records(&[("/lib/libc.so", 2000), ("/lib/libc.so", 2000), ("/x", 1)]),
            &[],
            &ExclusionSet::default(),
        )
        .unwrap();
        assert_eq!(partition.total_size, 2001);
        assert_eq!(partition.unused.len(), 2);
    }

    #[test]
    fn test_duplicate_keeps_first_size() {
        let partition = reconcile(
            records(&[("/data", 7), ("/data", 9)]),
            &[],
            &ExclusionSet::default(),
        )
        .unwrap();
        assert_eq!(partition.unused, BTreeSet::from([FileRecord::new("/data", 7)]));
    }

    #[test]
    fn test_exclusion_beats_evidence() {
        let partition = reconcile(
            records(&[("/var/log/app.log", 50), ("/var/logs/app.log", 60)]),
            &[evidence(
                SourceId::ProcFd,
                &["/var/log/app.log", "/var/logs/app.log"],
            )],
            &ExclusionSet::new(["/var/log"]),
        )
        .unwrap();
        assert_eq!(partition.excluded_size, 50);
        assert_eq!(partition.used_size, 60);
    }

    #[test]
    fn test_unmatched_evidence() {
        let partition = reconcile(
            records(&[("/bin/app", 1)]),
            &[evidence(SourceId::ProcFd, &["/bin/app", "/dev/null", "/tmp/gone"])],
            &ExclusionSet::default(),
        )
        .unwrap();
        assert_eq!(
            partition.unmatched_evidence,
            BTreeSet::from(["/dev/null".to_owned(), "/tmp/gone".to_owned()])
        );
    }

    #[test]
    fn test_empty_enumeration() {
        let partition = reconcile(
            Vec::new(),
            &[evidence(SourceId::OpenFd, &["/a"])],
            &ExclusionSet::default(),
        )
        .unwrap();
        assert_eq!(partition.file_count(), 0);
        assert_eq!(partition.total_size, 0);
    }

    #[test]
    fn test_idempotent_and_commutative() {
        let files = records(&[("/a", 1), ("/b", 2), ("/c", 3), ("/d", 4)]);
        let sets = vec![
            evidence(SourceId::OpenFd, &["/a"]),
            evidence(SourceId::ProcMap, &["/b", "/a"]),
            EvidenceSet::failed(SourceId::Trace, "denied"),
        ];
        let exclusions = ExclusionSet::new(["/d"]);

        let first = reconcile(files.clone(), &sets, &exclusions).unwrap();
        let second = reconcile(files.clone(), &sets, &exclusions).unwrap();
        assert_eq!(first, second);

        let mut reversed = sets.clone();
        reversed.reverse();
        let mut shuffled_files = files;
        shuffled_files.reverse();
        assert_eq!(
            reconcile(shuffled_files, &reversed, &exclusions).unwrap(),
            first
        );
    }

    #[test]
    fn test_completeness_and_conservation() {
        let files = records(&[
            ("/usr/bin/python3", 5_000_000),
            ("/usr/lib/libpython.so", 8_000_000),
            ("/var/cache/apt/archives/x.deb", 300_000),
            ("/dev/shm/seg", 10),
            ("/app/main.py", 1_200),
        ]);
        let sets = vec![evidence(
            SourceId::Trace,
            &["/usr/bin/python3", "/app/main.py", "/dev/shm/seg"],
        )];
        let partition = reconcile(files.clone(), &sets, &ExclusionSet::new(["/dev"])).unwrap();

        let all: BTreeSet<_> = partition
            .used
            .iter()
            .chain(&partition.unused)
            .chain(&partition.excluded)
            .cloned()
            .collect();
        assert_eq!(all, files.into_iter().collect::<BTreeSet<_>>());
        assert_eq!(
            partition.total_size,
            partition.used_size + partition.unused_size + partition.excluded_size
        );
        for record in &partition.used {
            assert!(sets[0].paths.contains(&record.path));
        }
    }

    #[test]
    fn test_total_overflow_is_an_error() {
        let err = reconcile(
            records(&[("/a", u64::MAX), ("/b", 1)]),
            &[evidence(SourceId::OpenFd, &["/a"])],
            &ExclusionSet::default(),
        )
        .unwrap_err();
        assert_eq!(err, ReconciliationError::Overflow { partition: "total" });
    }
}
