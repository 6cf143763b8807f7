//! Performance tracking.
//!
//! The tracker is owned by the host and handed to the conversation as an
//! `Arc`; it loads from and persists to a JSON file of its own.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Samples kept per timing series.
const MAX_SAMPLES: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCounts {
    pub succeeded: u64,
    pub failed: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceStats {
    pub turns: u64,
    pub automatic_turns: u64,
    pub cancelled_turns: u64,
    pub transport_errors: u64,
    pub fallback_arguments: u64,
    pub dropped_results: u64,
    pub first_token_ms: Vec<u64>,
    pub turn_ms: Vec<u64>,
    pub tools: BTreeMap<String, ToolCounts>,
}

/// How a turn ended, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    Completed,
    Cancelled,
    TransportError,
}

fn read_stats(path: &Path) -> Result<Option<PerformanceStats>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stats file {}", path.display()))?;
    let stats = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse stats file {}", path.display()))?;
    Ok(Some(stats))
}

fn push_sample(samples: &mut Vec<u64>, duration: Duration) {
    samples.push(duration.as_millis() as u64);
    if samples.len() > MAX_SAMPLES {
        let excess = samples.len() - MAX_SAMPLES;
        samples.drain(..excess);
    }
}

#[derive(Debug, Default)]
pub struct PerformanceTracker {
    path: Option<PathBuf>,
    stats: Mutex<PerformanceStats>,
}

impl PerformanceTracker {
    /// A tracker that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing, unreadable or corrupt file starts empty
    /// and is overwritten on the next `persist`.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let stats = match read_stats(&path) {
            Ok(Some(stats)) => {
                debug!("Loaded performance stats from {}", path.display());
                stats
            }
            Ok(None) => PerformanceStats::default(),
            Err(e) => {
                warn!("Starting with empty statistics: {:#}", e);
                PerformanceStats::default()
            }
        };
        Self {
            path: Some(path),
            stats: Mutex::new(stats),
        }
    }

    /// Write the current stats to the file the tracker was loaded from.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write stats file {}", path.display()))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, PerformanceStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> PerformanceStats {
        self.lock().clone()
    }

    pub fn record_first_token(&self, elapsed: Duration) {
        push_sample(&mut self.lock().first_token_ms, elapsed);
    }

    pub fn record_turn(&self, elapsed: Duration, automatic: bool, end: TurnEnd) {
        let mut stats = self.lock();
        stats.turns += 1;
        if automatic {
            stats.automatic_turns += 1;
        }
        match end {
            TurnEnd::Completed => {}
            TurnEnd::Cancelled => stats.cancelled_turns += 1,
            TurnEnd::TransportError => stats.transport_errors += 1,
        }
        push_sample(&mut stats.turn_ms, elapsed);
    }

    pub fn record_tool(&self, tool: &str, elapsed: Duration, success: bool) {
        let mut stats = self.lock();
        let counts = stats.tools.entry(tool.to_string()).or_default();
        if success {
            counts.succeeded += 1;
        } else {
            counts.failed += 1;
        }
        counts.total_ms += elapsed.as_millis() as u64;
    }

    pub fn record_fallback(&self) {
        self.lock().fallback_arguments += 1;
    }

    pub fn record_dropped_results(&self, count: usize) {
        self.lock().dropped_results += count as u64;
    }

    /// Human-readable summary.
    pub fn format(&self) -> String {
        let stats = self.snapshot();
        let mut out = String::new();

        out.push_str("\n📊 Assistant Statistics\n");
        out.push_str(&"=".repeat(60));
        out.push_str("\n\n");

        out.push_str("💬 Turns:\n");
        out.push_str(&format!("   • Total:             {:>10}\n", stats.turns));
        out.push_str(&format!("   • Automatic:         {:>10}\n", stats.automatic_turns));
        out.push_str(&format!("   • Cancelled:         {:>10}\n", stats.cancelled_turns));
        out.push_str(&format!("   • Transport Errors:  {:>10}\n", stats.transport_errors));
        out.push('\n');

        out.push_str("⚡ Performance:\n");
        if let Some((avg, median)) = summarize(&stats.first_token_ms) {
            out.push_str(&format!("   • Avg Time to First Token:    {:>6.3}s\n", avg));
            out.push_str(&format!("   • Median Time to First Token: {:>6.3}s\n", median));
        }
        if let Some((avg, median)) = summarize(&stats.turn_ms) {
            out.push_str(&format!("   • Avg Turn Duration:          {:>6.3}s\n", avg));
            out.push_str(&format!("   • Median Turn Duration:       {:>6.3}s\n", median));
        }
        out.push('\n');

        out.push_str("🔧 Tool Call Metrics:\n");
        let succeeded: u64 = stats.tools.values().map(|c| c.succeeded).sum();
        let failed: u64 = stats.tools.values().map(|c| c.failed).sum();
        out.push_str(&format!("   • Successful:        {:>10}\n", succeeded));
        out.push_str(&format!("   • Failed:            {:>10}\n", failed));
        out.push_str(&format!("   • Fallback Args:     {:>10}\n", stats.fallback_arguments));
        out.push_str(&format!("   • Dropped Results:   {:>10}\n", stats.dropped_results));
        for (tool, counts) in &stats.tools {
            out.push_str(&format!(
                "     - {:<24} {:>4} ok {:>4} failed\n",
                tool, counts.succeeded, counts.failed
            ));
        }
        out.push('\n');

        out.push_str(&"=".repeat(60));
        out.push('\n');
        out
    }
}

/// Average and median, in seconds.
fn summarize(samples_ms: &[u64]) -> Option<(f64, f64)> {
    if samples_ms.is_empty() {
        return None;
    }
    let avg = samples_ms.iter().sum::<u64>() as f64 / samples_ms.len() as f64;
    let mut sorted = samples_ms.to_vec();
    sorted.sort_unstable();
    let median = sorted[sorted.len() / 2] as f64;
    Some((avg / 1000.0, median / 1000.0))
}
