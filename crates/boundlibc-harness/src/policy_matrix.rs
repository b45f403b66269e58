//! Process-level verification of the bounds-check policy.
//!
//! The policy is read once per process, so every case runs in a fresh child:
//! the harness binary re-invokes itself with `probe` under a cleared
//! environment holding only the case's variables, and compares the level the
//! child reports with the expected one.

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Barrier};
use std::time::Instant;

use boundlibc_membrane::config::{BOUNDS_CHECKS_ENV, BoundsCheckLevel, bounds_check_level};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("probe for case '{case}' exited with {status}: {stderr}")]
    ProbeFailed {
        case: String,
        status: String,
        stderr: String,
    },
    #[error("probe for case '{case}' printed no report")]
    MissingReport { case: String },
    #[error("unknown bounds-check level '{0}'")]
    UnknownLevel(String),
}

fn serialize_level<S: Serializer>(level: &BoundsCheckLevel, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level.as_str())
}

fn serialize_opt_level<S: Serializer>(
    level: &Option<BoundsCheckLevel>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match level {
        Some(level) => s.serialize_str(level.as_str()),
        None => s.serialize_none(),
    }
}

/// What a `probe` child prints as its single JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Level name as returned by [`BoundsCheckLevel::as_str`].
    pub level: String,
    /// Number of threads that resolved the level concurrently.
    pub threads: usize,
    /// Whether every thread saw the same level.
    pub agreed: bool,
}

impl ProbeReport {
    pub fn parsed_level(&self) -> Result<BoundsCheckLevel, HarnessError> {
        BoundsCheckLevel::from_name(&self.level)
            .ok_or_else(|| HarnessError::UnknownLevel(self.level.clone()))
    }
}

/// Resolve the level from `threads` threads released together. This is the
/// body of the `probe` subcommand and must run before anything else in the
/// process touches the policy.
#[must_use]
pub fn probe(threads: usize) -> ProbeReport {
    let threads = threads.max(1);
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                bounds_check_level()
            })
        })
        .collect();
    let levels: Vec<Option<BoundsCheckLevel>> =
        handles.into_iter().map(|h| h.join().ok()).collect();

    let first = levels.first().copied().flatten();
    let agreed = first.is_some() && levels.iter().all(|l| *l == first);
    ProbeReport {
        level: first.unwrap_or(BoundsCheckLevel::Unknown).as_str().to_string(),
        threads,
        agreed,
    }
}

/// One child-process scenario.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyCase {
    pub name: String,
    /// Complete environment of the child, in order.
    pub env: Vec<(String, String)>,
    #[serde(serialize_with = "serialize_level")]
    pub expected: BoundsCheckLevel,
}

impl PolicyCase {
    #[must_use]
    pub fn new(name: &str, env: &[(&str, &str)], expected: BoundsCheckLevel) -> Self {
        Self {
            name: name.to_string(),
            env: env
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            expected,
        }
    }

    /// Case with only `LIBC_BOUNDS_CHECKS` set to `value`.
    #[must_use]
    pub fn with_value(name: &str, value: &str, expected: BoundsCheckLevel) -> Self {
        Self::new(name, &[(BOUNDS_CHECKS_ENV, value)], expected)
    }
}

/// The documented policy table plus the malformed-value and unrelated-key
/// scenarios.
#[must_use]
pub fn default_cases() -> Vec<PolicyCase> {
    vec![
        PolicyCase::new("unset", &[], BoundsCheckLevel::WriteOnly),
        PolicyCase::with_value("value_0", "0", BoundsCheckLevel::None),
        PolicyCase::with_value("value_1", "1", BoundsCheckLevel::WriteOnly),
        PolicyCase::with_value("value_2", "2", BoundsCheckLevel::ReadWrite),
        PolicyCase::with_value("value_9", "9", BoundsCheckLevel::WriteOnly),
        PolicyCase::with_value("value_empty", "", BoundsCheckLevel::WriteOnly),
        PolicyCase::with_value("value_word", "none", BoundsCheckLevel::WriteOnly),
        PolicyCase::with_value("value_20", "20", BoundsCheckLevel::ReadWrite),
        PolicyCase::new(
            "unrelated_key_same_value",
            &[(BOUNDS_CHECKS_ENV, "2"), ("FOO", "2")],
            BoundsCheckLevel::ReadWrite,
        ),
        PolicyCase::new(
            "unrelated_key_only",
            &[("FOO", "0"), ("LIBC_BOUNDS_CHECKSX", "0")],
            BoundsCheckLevel::WriteOnly,
        ),
    ]
}

/// Result of one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub name: String,
    #[serde(serialize_with = "serialize_level")]
    pub expected: BoundsCheckLevel,
    #[serde(serialize_with = "serialize_opt_level")]
    pub observed: Option<BoundsCheckLevel>,
    pub threads_agreed: bool,
    pub passed: bool,
    pub duration_ms: u64,
    /// Why the probe could not produce a level, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run one case in a child `probe` process.
pub fn run_case(exe: &Path, case: &PolicyCase, threads: usize) -> Result<CaseResult, HarnessError> {
    let started = Instant::now();
    let output = Command::new(exe)
        .arg("probe")
        .arg("--threads")
        .arg(threads.to_string())
        .env_clear()
        .envs(case.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .output()?;

    if !output.status.success() {
        return Err(HarnessError::ProbeFailed {
            case: case.name.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| HarnessError::MissingReport {
            case: case.name.clone(),
        })?;
    let report: ProbeReport = serde_json::from_str(line)?;
    let observed = report.parsed_level()?;

    Ok(CaseResult {
        name: case.name.clone(),
        expected: case.expected,
        observed: Some(observed),
        threads_agreed: report.agreed,
        passed: report.agreed && observed == case.expected,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        error: None,
    })
}

/// Aggregate of a matrix run.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixReport {
    pub cases: Vec<CaseResult>,
    pub passed: usize,
    pub failed: usize,
}

impl MatrixReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Run every case; a case whose probe cannot run counts as failed and keeps
/// the error that stopped it.
pub fn run_matrix(exe: &Path, cases: &[PolicyCase], threads: usize) -> MatrixReport {
    let results: Vec<CaseResult> = cases
        .iter()
        .map(|case| {
            run_case(exe, case, threads).unwrap_or_else(|err| CaseResult {
                name: case.name.clone(),
                expected: case.expected,
                observed: None,
                threads_agreed: false,
                passed: false,
                duration_ms: 0,
                error: Some(err.to_string()),
            })
        })
        .collect();
    let passed = results.iter().filter(|r| r.passed).count();
    MatrixReport {
        failed: results.len() - passed,
        passed,
        cases: results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boundlibc_membrane::config::resolve_from_entries;

    #[test]
    fn default_cases_agree_with_in_process_resolution() {
        for case in default_cases() {
            let entries: Vec<String> = case.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
            assert_eq!(resolve_from_entries(&entries), case.expected, "case {}", case.name);
        }
    }

    #[test]
    fn default_cases_cover_every_resolved_level() {
        let cases = default_cases();
        for level in BoundsCheckLevel::RESOLVED {
            assert!(cases.iter().any(|c| c.expected == level), "{level}");
        }
    }

    #[test]
    fn probe_in_process_agrees() {
        let report = probe(4);
        assert!(report.agreed);
        assert_eq!(report.threads, 4);
        assert_eq!(report.parsed_level().unwrap(), bounds_check_level());
    }

    #[test]
    fn probe_report_rejects_unknown_names() {
        let report = ProbeReport {
            level: "full".to_string(),
            threads: 1,
            agreed: true,
        };
        assert!(matches!(
            report.parsed_level(),
            Err(HarnessError::UnknownLevel(name)) if name == "full"
        ));
    }

    #[test]
    fn case_results_serialize_level_names() {
        let result = CaseResult {
            name: "value_2".to_string(),
            expected: BoundsCheckLevel::ReadWrite,
            observed: None,
            threads_agreed: false,
            passed: false,
            duration_ms: 0,
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["expected"], "read-write");
        assert!(json["observed"].is_null());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn missing_executable_is_reported_per_case() {
        let exe = Path::new("/nonexistent/boundlibc-harness");
        let case = PolicyCase::with_value("value_2", "2", BoundsCheckLevel::ReadWrite);
        assert!(matches!(run_case(exe, &case, 1), Err(HarnessError::Io(_))));

        let report = run_matrix(exe, &[case], 1);
        assert_eq!(report.failed, 1);
        let failed = &report.cases[0];
        assert!(!failed.passed);
        let error = failed.error.as_deref().unwrap();
        assert!(error.starts_with("io: "), "{error}");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cases"][0]["error"], error);
    }

    #[test]
    fn failing_child_keeps_status_and_stderr() {
        // `false` exits 1 regardless of its arguments.
        let exe = Path::new("/bin/false");
        if !exe.exists() {
            return;
        }
        let case = PolicyCase::with_value("value_0", "0", BoundsCheckLevel::None);
        let report = run_matrix(exe, &[case], 1);
        let error = report.cases[0].error.as_deref().unwrap();
        assert!(
            error.starts_with("probe for case 'value_0' exited with"),
            "{error}"
        );
    }
}
