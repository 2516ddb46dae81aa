use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::analysis::CategoryScore;
use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner};
use crate::pipeline::tool_adapters::run_json_command;

pub const COMPLEXITY_THRESHOLD: u64 = 10;
const TARGET_AVERAGE_COMPLEXITY: f64 = 5.0;

/// Totals gathered from radon's complexity and maintainability reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityMetrics {
    pub total_complexity: u64,
    pub block_count: usize,
    pub complex_blocks: Vec<String>,
    pub mi_total: f64,
    pub files_analyzed: usize,
}

impl QualityMetrics {
    pub fn average_complexity(&self) -> f64 {
        if self.block_count == 0 {
            return 0.0;
        }
        self.total_complexity as f64 / self.block_count as f64
    }

    pub fn average_maintainability(&self) -> f64 {
        if self.files_analyzed == 0 {
            return 0.0;
        }
        self.mi_total / self.files_analyzed as f64
    }

    pub fn complexity_score(&self) -> f64 {
        (100.0 - (self.average_complexity() - TARGET_AVERAGE_COMPLEXITY) * 10.0).clamp(0.0, 100.0)
    }

    pub fn maintainability_score(&self) -> f64 {
        let avg_mi = self.average_maintainability();
        if avg_mi > 0.0 {
            avg_mi
        } else {
            100.0
        }
    }

    pub fn score(&self) -> i64 {
        ((self.complexity_score() + self.maintainability_score()) / 2.0).round() as i64
    }

    pub fn to_category(&self) -> CategoryScore {
        let avg_cc = self.average_complexity();
        let avg_mi = self.average_maintainability();
        CategoryScore {
            score: self.score(),
            summary: format!(
                "Average Cyclomatic Complexity: {avg_cc:.2}. Average Maintainability Index: {avg_mi:.2}. {} functions are overly complex.",
                self.complex_blocks.len()
            ),
            details: json!({
                "average_complexity": format!("{avg_cc:.2}"),
                "average_maintainability_index": format!("{avg_mi:.2}"),
                "highly_complex_functions": self.complex_blocks,
            }),
        }
    }
}

pub fn radon_command(program: &str, mode: &str, cwd: &Path, files: &[PathBuf]) -> CommandSpec {
    CommandSpec::new(program, cwd)
        .args([mode, "-j"])
        .args(files.iter().map(|path| path.display().to_string()))
}

pub fn run_quality_check(
    runner: &dyn PipelineCommandRunner,
    program: &str,
    cwd: &Path,
    files: &[PathBuf],
) -> CategoryScore {
    info!(files = files.len(), "running code quality checks with radon");
    let complexity = run_json_command::<BTreeMap<String, Value>>(
        runner,
        radon_command(program, "cc", cwd, files),
        &[0],
    );
    let maintainability = run_json_command::<BTreeMap<String, Value>>(
        runner,
        radon_command(program, "mi", cwd, files),
        &[0],
    );
    match (complexity, maintainability) {
        (Ok(cc), Ok(mi)) => collect_metrics(&cc, &mi, files.len()).to_category(),
        (Err(error), _) | (_, Err(error)) => {
            warn!(error = %error, "radon did not produce a report");
            CategoryScore {
                score: 0,
                summary: format!("Radon analysis failed: {error}"),
                details: json!({}),
            }
        }
    }
}

/// Folds radon's per-file JSON into totals. Files radon could not parse
/// report an `error` object and are skipped.
pub fn collect_metrics(
    complexity: &BTreeMap<String, Value>,
    maintainability: &BTreeMap<String, Value>,
    files_analyzed: usize,
) -> QualityMetrics {
    let mut metrics = QualityMetrics {
        files_analyzed,
        ..QualityMetrics::default()
    };

    for (file, blocks) in complexity {
        let Some(blocks) = blocks.as_array() else {
            debug!(file = %file, "radon skipped unparsable file");
            continue;
        };
        for block in blocks {
            let complexity = block.get("complexity").and_then(Value::as_u64).unwrap_or(0);
            if complexity > COMPLEXITY_THRESHOLD {
                let name = block.get("name").and_then(Value::as_str).unwrap_or("<unknown>");
                metrics
                    .complex_blocks
                    .push(format!("{name} (Complexity: {complexity})"));
            }
            metrics.total_complexity += complexity;
            metrics.block_count += 1;
        }
    }

    metrics.mi_total = maintainability
        .values()
        .filter_map(|entry| entry.get("mi").and_then(Value::as_f64))
        .filter(|mi| *mi > 0.0)
        .sum();
    metrics
}
