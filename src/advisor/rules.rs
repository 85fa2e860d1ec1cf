use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::{AdvisorConfig, LayerInfo, OptimizationSuggestion};
use crate::reconcile::{FileRecord, UsagePartition};
use crate::report::format_size;

pub const LARGE_UNUSED_FILES: &str = "large unused files";
pub const DUPLICATE_LAYER_FILES: &str = "duplicate layer files";
pub const PACKAGE_MANAGER_CACHES: &str = "package manager caches";

/// System-wide package manager caches and indexes.
const CACHE_PREFIXES: &[&str] = &[
    "/var/cache/apt/archives",
    "/var/lib/apt/lists",
    "/var/cache/yum",
    "/var/cache/dnf",
    "/var/cache/apk",
    "/root/.cache/pip",
    "/root/.npm/_cacache",
    "/usr/local/share/.cache/yarn",
    "/root/.cache/yarn",
    "/root/.cache/go-build",
];

/// Per-user caches, matched anywhere below a home directory.
const USER_CACHE_DIRS: &[&str] = &[
    "/.cache/pip/",
    "/.npm/_cacache/",
    "/.cache/yarn/",
    "/.cache/go-build/",
];

/// Unused files above the configured size threshold.
pub fn large_unused_files(
    partition: &UsagePartition,
    _layers: Option<&LayerInfo>,
    config: &AdvisorConfig,
) -> Option<OptimizationSuggestion> {
    let threshold = config.large_file_threshold_bytes;
    let matches: Vec<&FileRecord> = partition
        .unused
        .iter()
        .filter(|r| r.size_bytes > threshold)
        .collect();
    if matches.is_empty() {
        return None;
    }

    Some(OptimizationSuggestion {
        category: LARGE_UNUSED_FILES.to_owned(),
        description: format!(
            "{} unused files are larger than {}; remove them or move them out of the image",
            matches.len(),
            format_size(threshold)
        ),
        potential_savings: sum_sizes(&matches),
        priority: 1,
        paths: matches.iter().map(|r| r.path.clone()).collect(),
    })
}

/// Byte-identical files shipped by more than one layer.
pub fn duplicate_layer_files(
    _partition: &UsagePartition,
    layers: Option<&LayerInfo>,
    _config: &AdvisorConfig,
) -> Option<OptimizationSuggestion> {
    let layers = layers?;

    // (digest, size) -> layers holding such a file, and the paths it appears under
    let mut copies: BTreeMap<(&str, u64), (BTreeSet<&str>, BTreeSet<&str>)> = BTreeMap::new();
    for layer in &layers.layers {
        for file in &layer.files {
            let (holders, paths) = copies
                .entry((file.digest.as_str(), file.size_bytes))
                .or_default();
            holders.insert(layer.id.as_str());
            paths.insert(file.path.as_str());
        }
    }

    let mut savings = 0u64;
    let mut groups = 0usize;
    let mut paths = BTreeSet::new();
    for ((_, size), (holders, group_paths)) in &copies {
        if holders.len() < 2 {
            continue;
        }
        groups += 1;
        let extra = (holders.len() as u64 - 1).saturating_mul(*size);
        savings = savings.saturating_add(extra);
        paths.extend(group_paths.iter().map(|p| (*p).to_owned()));
    }
    if groups == 0 {
        return None;
    }

    Some(OptimizationSuggestion {
        category: DUPLICATE_LAYER_FILES.to_owned(),
        description: format!(
            "{groups} files are stored identically in several layers; \
             restructure the build so each is written once"
        ),
        potential_savings: savings,
        priority: 2,
        paths: paths.into_iter().collect(),
    })
}

/// Package manager caches left in the image.
pub fn package_manager_caches(
    partition: &UsagePartition,
    _layers: Option<&LayerInfo>,
    _config: &AdvisorConfig,
) -> Option<OptimizationSuggestion> {
    let matches: Vec<&FileRecord> = partition
        .unused
        .iter()
        .filter(|r| is_package_cache(&r.path))
        .collect();
    if matches.is_empty() {
        return None;
    }

    Some(OptimizationSuggestion {
        category: PACKAGE_MANAGER_CACHES.to_owned(),
        description: format!(
            "{} files belong to package manager caches; clean them in the same layer \
             that installs packages",
            matches.len()
        ),
        potential_savings: sum_sizes(&matches),
        priority: 3,
        paths: matches.iter().map(|r| r.path.clone()).collect(),
    })
}

pub fn is_package_cache(path: &str) -> bool {
    CACHE_PREFIXES
        .iter()
        .any(|prefix| Path::new(path).starts_with(prefix))
        || USER_CACHE_DIRS.iter().any(|dir| path.contains(dir))
}

fn sum_sizes(records: &[&FileRecord]) -> u64 {
    records
        .iter()
        .fold(0u64, |acc, r| acc.saturating_add(r.size_bytes))
}
