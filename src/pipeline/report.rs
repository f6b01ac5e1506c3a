use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use otterpgo_utils::PhaseTiming;

use super::controller::{IterationResult, Outcome, improvement};

const RULE_WIDTH: usize = 80;

/// One line of the iteration table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRow {
    pub iteration: u32,
    pub kind: &'static str,
    pub total_cycles: u64,
    /// Against the previous iteration; absent for the baseline
    pub improvement_percent: Option<f64>,
    /// Baseline cycles over this iteration's cycles
    pub speedup: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub baseline_cycles: u64,
    pub final_cycles: u64,
    pub total_improvement_percent: f64,
    /// Absent when the final measurement recorded no cycles
    pub final_speedup: Option<f64>,
    /// Non-baseline iterations that completed
    pub iterations_run: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRow {
    pub phase: String,
    pub elapsed_ms: u64,
}

/// Everything known about a run once it reached a terminal state. A failed
/// run still reports the iterations that completed before the failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub iterations: Vec<IterationResult>,
    pub rows: Vec<IterationRow>,
    pub summary: Option<ReportSummary>,
    pub phases: Vec<PhaseRow>,
}

fn speedup(baseline: u64, cycles: u64) -> Option<f64> {
    (cycles > 0).then(|| baseline as f64 / cycles as f64)
}

impl RunReport {
    pub fn new(iterations: Vec<IterationResult>, outcome: Outcome) -> Self {
        let baseline = iterations.first().map(|result| result.total_cycles);

        let rows = iterations
            .iter()
            .enumerate()
            .map(|(position, result)| {
                let previous = position
                    .checked_sub(1)
                    .map(|prev| iterations[prev].total_cycles);
                IterationRow {
                    iteration: result.index,
                    kind: if result.is_baseline {
                        "Baseline"
                    } else {
                        "Optimized"
                    },
                    total_cycles: result.total_cycles,
                    improvement_percent: previous
                        .map(|prev| improvement(prev, result.total_cycles) * 100.0),
                    speedup: baseline.and_then(|base| speedup(base, result.total_cycles)),
                }
            })
            .collect();

        let summary = match (iterations.first(), iterations.last()) {
            (Some(first), Some(last)) => Some(ReportSummary {
                baseline_cycles: first.total_cycles,
                final_cycles: last.total_cycles,
                total_improvement_percent: improvement(first.total_cycles, last.total_cycles)
                    * 100.0,
                final_speedup: speedup(first.total_cycles, last.total_cycles),
                iterations_run: iterations.iter().filter(|r| !r.is_baseline).count() as u32,
            }),
            _ => None,
        };

        Self {
            outcome,
            iterations,
            rows,
            summary,
            phases: Vec::new(),
        }
    }

    pub fn with_phases(mut self, phases: &[PhaseTiming]) -> Self {
        self.phases = phases
            .iter()
            .map(|phase| PhaseRow {
                phase: phase.name.clone(),
                elapsed_ms: phase.duration.as_millis() as u64,
            })
            .collect();
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Plain-text iteration table
    pub fn render_table(&self) -> String {
        let rule = "-".repeat(RULE_WIDTH);
        let mut out = format!("{rule}\n");
        out.push_str(&format!(
            "{:<6} {:<12} {:>15} {:>12} {:>10}\n",
            "Iter", "Type", "Total Cycles", "Improvement", "Speedup"
        ));
        out.push_str(&format!("{rule}\n"));
        for row in &self.rows {
            let improvement = row
                .improvement_percent
                .map_or_else(|| "-".to_string(), |percent| format!("{percent:+.2}%"));
            let speedup = row
                .speedup
                .map_or_else(|| "-".to_string(), |speedup| format!("{speedup:.2}x"));
            out.push_str(&format!(
                "{:<6} {:<12} {:>15} {:>12} {:>10}\n",
                row.iteration,
                row.kind,
                group_thousands(row.total_cycles),
                improvement,
                speedup
            ));
        }
        out.push_str(&format!("{rule}\n"));
        out
    }

    pub fn print(&self) {
        let banner = "=".repeat(RULE_WIDTH);
        println!();
        println!("{banner}");
        println!("{}", "MULTI-ITERATION PGO RESULTS".bold());
        println!("{banner}");
        println!();
        println!("Iteration Summary:");
        print!("{}", self.render_table());

        if let Some(summary) = &self.summary {
            println!();
            println!("Final Results:");
            println!(
                "  Baseline cycles:      {:>15}",
                group_thousands(summary.baseline_cycles)
            );
            println!(
                "  Final cycles:         {:>15}",
                group_thousands(summary.final_cycles)
            );
            println!(
                "  Total improvement:    {:>14.2}%",
                summary.total_improvement_percent
            );
            match summary.final_speedup {
                Some(speedup) => println!("  Final speedup:        {speedup:>15.2}x"),
                None => println!("  Final speedup:        {:>15}", "-"),
            }
            println!("  Iterations run:       {:>15}", summary.iterations_run);
        }

        if !self.phases.is_empty() {
            println!();
            println!("Phase timings:");
            for phase in &self.phases {
                println!("  {:<20} {:>10} ms", phase.phase, phase.elapsed_ms);
            }
        }

        println!();
        let outcome = self.outcome.to_string();
        match self.outcome {
            Outcome::Converged { .. } => println!("{}", outcome.green().bold()),
            Outcome::NotConverged { .. } => println!("{}", outcome.yellow().bold()),
            Outcome::Failed { .. } => println!("{}", outcome.red().bold()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json().context("failed to serialize run report")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "saved run report");
        Ok(())
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
