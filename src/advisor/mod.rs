//! Heuristic image-size suggestions derived from a [`UsagePartition`].
//!
//! Rules are independent of each other and each yields at most one suggestion.
//! Suggestions are advisory; nothing here decides what gets deleted.
mod layers;
mod rules;

pub use layers::{Layer, LayerError, LayerFile, LayerInfo, load_layer_info};
pub use rules::{
    DUPLICATE_LAYER_FILES, LARGE_UNUSED_FILES, PACKAGE_MANAGER_CACHES, is_package_cache,
};

use serde::Serialize;

use crate::config::DEFAULT_LARGE_FILE_THRESHOLD;
use crate::reconcile::UsagePartition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisorConfig {
    /// Unused files strictly larger than this are reported.
    pub large_file_threshold_bytes: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            large_file_threshold_bytes: DEFAULT_LARGE_FILE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationSuggestion {
    pub category: String,
    pub description: String,
    pub potential_savings: u64,
    /// 1 is the most important.
    pub priority: u8,
    pub paths: Vec<String>,
}

type Rule = fn(&UsagePartition, Option<&LayerInfo>, &AdvisorConfig) -> Option<OptimizationSuggestion>;

const RULES: &[Rule] = &[
    rules::large_unused_files,
    rules::duplicate_layer_files,
    rules::package_manager_caches,
];

/// Applies every rule and returns the suggestions ordered by priority.
pub fn advise(
    partition: &UsagePartition,
    layers: Option<&LayerInfo>,
    config: &AdvisorConfig,
) -> Vec<OptimizationSuggestion> {
    let mut suggestions: Vec<_> = RULES
        .iter()
        .filter_map(|rule| rule(partition, layers, config))
        .collect();
    suggestions.sort_by_key(|s| s.priority);
    log::debug!("{} optimization suggestions", suggestions.len());
    suggestions
}
