use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::analysis::CategoryScore;
use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner, PipelineRuntimeError};
use crate::pipeline::tool_adapters::{run_json_command, ToolAdapterError};

/// Bandit exits 1 when it finds issues; both codes carry a report.
const BANDIT_REPORT_STATUS: [i32; 2] = [0, 1];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl SeverityCounts {
    /// 100 minus fixed per-severity penalties, floored at zero.
    pub fn score(self) -> i64 {
        let penalty = self.high * 10 + self.medium * 5 + self.low * 2;
        100_i64.saturating_sub(penalty as i64).max(0)
    }

    pub fn summary(self) -> String {
        format!(
            "Found {} high, {} medium, and {} low severity issues.",
            self.high, self.medium, self.low
        )
    }
}

#[derive(Debug, Deserialize)]
struct BanditReport {
    metrics: BanditMetrics,
    #[serde(default)]
    results: Value,
}

#[derive(Debug, Deserialize)]
struct BanditMetrics {
    #[serde(rename = "_totals")]
    totals: BanditTotals,
}

#[derive(Debug, Deserialize)]
struct BanditTotals {
    #[serde(rename = "SEVERITY.HIGH")]
    high: f64,
    #[serde(rename = "SEVERITY.MEDIUM")]
    medium: f64,
    #[serde(rename = "SEVERITY.LOW")]
    low: f64,
}

pub fn bandit_command(program: &str, scan_root: &Path) -> CommandSpec {
    CommandSpec::new(program, scan_root)
        .arg("-r")
        .arg(scan_root.display().to_string())
        .args(["-f", "json"])
}

pub fn run_security_scan(
    runner: &dyn PipelineCommandRunner,
    program: &str,
    scan_root: &Path,
) -> CategoryScore {
    info!("running security scan with bandit");
    match run_json_command::<BanditReport>(
        runner,
        bandit_command(program, scan_root),
        &BANDIT_REPORT_STATUS,
    ) {
        Ok(report) => {
            let counts = SeverityCounts {
                high: report.metrics.totals.high as u64,
                medium: report.metrics.totals.medium as u64,
                low: report.metrics.totals.low as u64,
            };
            CategoryScore {
                score: counts.score(),
                summary: counts.summary(),
                details: report.results,
            }
        }
        Err(error) => {
            warn!(error = %error, "bandit scan did not produce a report");
            scan_failure(error)
        }
    }
}

fn scan_failure(error: ToolAdapterError) -> CategoryScore {
    let (summary, details) = match error {
        ToolAdapterError::JsonDecode { stdout, .. } => {
            (String::from("Error parsing Bandit JSON output."), stdout)
        }
        ToolAdapterError::CommandFailed { stderr, .. } => {
            (String::from("Bandit command failed to execute."), stderr)
        }
        ToolAdapterError::CommandRunner(PipelineRuntimeError::ProgramNotFound(_)) => (
            String::from("Bandit command not found. Is it installed?"),
            String::new(),
        ),
        other => (
            format!("An unexpected error occurred during security scan: {other}"),
            String::new(),
        ),
    };
    CategoryScore {
        score: 0,
        summary,
        details: Value::String(details),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::CommandOutput;
    use serde_json::json;
    use std::sync::Mutex;

    struct BanditFake {
        reply: Mutex<Option<Result<CommandOutput, PipelineRuntimeError>>>,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl BanditFake {
        fn new(reply: Result<CommandOutput, PipelineRuntimeError>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl PipelineCommandRunner for BanditFake {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
            self.seen.lock().expect("seen").push(spec.clone());
            self.reply
                .lock()
                .expect("reply")
                .take()
                .unwrap_or_else(|| Err(PipelineRuntimeError::ProgramNotFound(spec.program.clone())))
        }
    }

    fn exited(status_code: i32, stdout: String, stderr: &str) -> CommandOutput {
        CommandOutput {
            status_code,
            stdout,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn score_applies_fixed_weights_and_floor() {
        let one_each = SeverityCounts {
            high: 1,
            medium: 1,
            low: 1,
        };
        assert_eq!(one_each.score(), 83);
        assert_eq!(
            SeverityCounts {
                high: 12,
                medium: 0,
                low: 0
            }
            .score(),
            0
        );
        assert_eq!(SeverityCounts::default().score(), 100);
    }

    #[test]
    fn findings_exit_code_still_yields_a_score() {
        let report = json!({
            "metrics": {"_totals": {"SEVERITY.HIGH": 1, "SEVERITY.MEDIUM": 1, "SEVERITY.LOW": 1}},
            "results": [{"test_id": "B105", "issue_severity": "LOW"}]
        });
        let fake = BanditFake::new(Ok(exited(1, report.to_string(), "")));

        let scored = run_security_scan(&fake, "bandit", Path::new("/tmp/ws"));

        assert_eq!(scored.score, 83);
        assert_eq!(scored.summary, "Found 1 high, 1 medium, and 1 low severity issues.");
        assert_eq!(scored.details[0]["test_id"], json!("B105"));
        let seen = fake.seen.lock().expect("seen");
        assert_eq!(seen[0].args, vec!["-r", "/tmp/ws", "-f", "json"]);
    }

    #[test]
    fn tool_failures_degrade_to_zero_with_diagnostic() {
        let fake = BanditFake::new(Ok(exited(2, String::new(), "usage: bandit")));
        let scored = run_security_scan(&fake, "bandit", Path::new("/tmp/ws"));
        assert_eq!(scored.score, 0);
        assert_eq!(scored.summary, "Bandit command failed to execute.");
        assert_eq!(scored.details, json!("usage: bandit"));

        let fake = BanditFake::new(Ok(exited(0, String::from("{oops"), "")));
        let scored = run_security_scan(&fake, "bandit", Path::new("/tmp/ws"));
        assert_eq!(scored.summary, "Error parsing Bandit JSON output.");
        assert_eq!(scored.details, json!("{oops"));

        let fake = BanditFake::new(Err(PipelineRuntimeError::ProgramNotFound(String::from(
            "bandit",
        ))));
        let scored = run_security_scan(&fake, "bandit", Path::new("/tmp/ws"));
        assert_eq!(scored.summary, "Bandit command not found. Is it installed?");
    }
}
