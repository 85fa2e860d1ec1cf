//! JSON and human-readable rendering of an analysis.
use std::io::{self, Write};

use serde::Serialize;

use crate::advisor::{LayerInfo, OptimizationSuggestion};
use crate::evidence::SourceId;
use crate::reconcile::UsagePartition;

/// Printed with every report.
pub const ADVISORY_NOTICE: &str = "Results are advisory only: files used outside the \
observation window may be reported as unused. Verify before removing anything.";

/// Formats a byte count with binary units, e.g. `1.5 KB` or `2.00 GB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit < 2 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Everything a caller gets back from one analysis of a container.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub container: &'a str,
    pub partition: &'a UsagePartition,
    pub suggestions: &'a [OptimizationSuggestion],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<&'a LayerInfo>,
    pub notice: &'static str,
}

impl<'a> Report<'a> {
    pub fn new(
        container: &'a str,
        partition: &'a UsagePartition,
        suggestions: &'a [OptimizationSuggestion],
        layers: Option<&'a LayerInfo>,
    ) -> Self {
        Self {
            container,
            partition,
            suggestions,
            layers,
            notice: ADVISORY_NOTICE,
        }
    }

    pub fn write_json(&self, w: impl Write) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(w, self)
    }

    /// Writes the summary shown on a terminal. File lists are capped at `max_paths`
    /// entries per section.
    pub fn write_summary(&self, mut w: impl Write, max_paths: usize) -> io::Result<()> {
        let p = self.partition;
        writeln!(w, "Container {}", self.container)?;
        writeln!(
            w,
            "  {} files, {} total",
            p.file_count(),
            format_size(p.total_size)
        )?;
        writeln!(w, "  used:     {:>7} files  {:>10}", p.used.len(), format_size(p.used_size))?;
        writeln!(w, "  unused:   {:>7} files  {:>10}", p.unused.len(), format_size(p.unused_size))?;
        writeln!(
            w,
            "  excluded: {:>7} files  {:>10}",
            p.excluded.len(),
            format_size(p.excluded_size)
        )?;
        if !p.unmatched_evidence.is_empty() {
            writeln!(
                w,
                "  {} observed paths matched no regular file",
                p.unmatched_evidence.len()
            )?;
        }
        if p.skipped_entries > 0 {
            writeln!(w, "  {} entries could not be read", p.skipped_entries)?;
        }

        if p.enumeration_truncated {
            writeln!(w)?;
            writeln!(w, "Incomplete listing: the file walk ran out of time")?;
            writeln!(w, "  files it did not reach are missing from every section")?;
        }
        if !p.degraded_sources.is_empty() {
            let names: Vec<&str> = p.degraded_sources.iter().map(SourceId::as_str).collect();
            writeln!(w)?;
            writeln!(w, "Incomplete evidence from: {}", names.join(", "))?;
            writeln!(w, "  files used only through these sources may show as unused")?;
        }

        if let Some(layers) = self.layers {
            writeln!(w)?;
            writeln!(
                w,
                "Image layers ({}, {}):",
                layers.layers.len(),
                format_size(layers.total_size())
            )?;
            for layer in &layers.layers {
                writeln!(
                    w,
                    "  {:>10}  {}",
                    format_size(layer.size_bytes),
                    truncate(&layer.created_by, 72)
                )?;
            }
        }

        writeln!(w)?;
        if self.suggestions.is_empty() {
            writeln!(w, "No optimization suggestions.")?;
        } else {
            writeln!(w, "Suggestions:")?;
            for s in self.suggestions {
                writeln!(
                    w,
                    "  [{}] {} (save up to {})",
                    s.priority,
                    s.category,
                    format_size(s.potential_savings)
                )?;
                writeln!(w, "      {}", s.description)?;
                for path in s.paths.iter().take(max_paths) {
                    writeln!(w, "      {path}")?;
                }
                if s.paths.len() > max_paths {
                    writeln!(w, "      ... and {} more", s.paths.len() - max_paths)?;
                }
            }
        }

        writeln!(w)?;
        writeln!(w, "{ADVISORY_NOTICE}")
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
