use chrono::{DateTime, Utc};
use forge_content_store::{capture, DriftStatus, FingerprintStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Severity band of a diagnostic finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Outcome of one diagnostic check
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticResult {
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticResult {
    fn new(passed: bool, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            passed,
            severity,
            message: message.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    fn detail(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.to_string(), value);
        }
        self
    }
}

/// Counters accumulated over an operation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub tool_calls: u64,
    pub revisions: u64,
    pub tokens_used: u64,
    pub files_accessed: u64,
    pub loop_iterations: u64,
}

/// Configured maxima for an operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OperationLimits {
    pub max_tool_calls: u64,
    pub max_revisions: u64,
    pub max_tokens: u64,
    pub max_files_accessed: u64,
    pub max_loop_iterations: u64,
}

impl Default for OperationLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 50,
            max_revisions: 10,
            max_tokens: 100_000,
            max_files_accessed: 100,
            max_loop_iterations: 25,
        }
    }
}

/// Configuration for the diagnostic agent
#[derive(Debug, Clone)]
pub struct DiagnosticConfig {
    /// Fraction of a limit at which a warning fires
    pub warn_ratio: f64,

    /// Size change fraction past which drift escalates to critical
    pub critical_size_delta: f64,

    /// Bounded in-memory history
    pub history_limit: usize,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            warn_ratio: 0.9,
            critical_size_delta: 0.5,
            history_limit: 1000,
        }
    }
}

/// Drift, confidence, and resource-limit review over a shared fingerprint store
pub struct DiagnosticAgent {
    fingerprints: Arc<FingerprintStore>,
    limits: OperationLimits,
    config: DiagnosticConfig,
    history: Mutex<VecDeque<DiagnosticResult>>,
}

impl DiagnosticAgent {
    pub fn new(
        fingerprints: Arc<FingerprintStore>,
        limits: OperationLimits,
        config: DiagnosticConfig,
    ) -> Self {
        Self {
            fingerprints,
            limits,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Check a file against its registered fingerprint
    ///
    /// Untracked existing files are registered as the new baseline and pass
    /// with info severity; large drifts (size change past the configured
    /// fraction) escalate to critical.
    pub fn check_drift(&self, path: impl AsRef<Path>) -> DiagnosticResult {
        let path = path.as_ref();

        let result = match self.fingerprints.check_drift(path) {
            Ok(DriftStatus::NoDrift) => DiagnosticResult::new(
                true,
                Severity::Info,
                format!("No drift detected for {}", path.display()),
            ),
            Ok(DriftStatus::NotTracked) => match capture(path) {
                Ok(fp) => {
                    self.fingerprints.register(fp);
                    DiagnosticResult::new(
                        true,
                        Severity::Info,
                        format!("No drift: baseline registered for {}", path.display()),
                    )
                }
                Err(_) => DiagnosticResult::new(
                    true,
                    Severity::Info,
                    format!("No drift baseline for {}", path.display()),
                ),
            },
            Ok(DriftStatus::Drifted { old, new }) => {
                let size_delta = new.size.abs_diff(old.size) as f64;
                let ratio = if old.size > 0 {
                    size_delta / old.size as f64
                } else {
                    1.0
                };
                let severity = if ratio > self.config.critical_size_delta {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                DiagnosticResult::new(
                    false,
                    severity,
                    format!("Drift detected for {}", path.display()),
                )
                .detail("old_sha256", &old.sha256)
                .detail("new_sha256", &new.sha256)
                .detail("size_delta_ratio", ratio)
            }
            Err(e) => DiagnosticResult::new(
                false,
                Severity::Error,
                format!("Drift check failed for {}: {}", path.display(), e),
            ),
        };

        self.record(result)
    }

    /// Band a caller-supplied confidence score
    ///
    /// >= 80 passes with info; 40-79 warns as low confidence; below 40 is
    /// critical.
    pub fn check_confidence(&self, confidence: f64) -> DiagnosticResult {
        let result = if confidence >= 80.0 {
            DiagnosticResult::new(true, Severity::Info, "Confidence sufficient")
        } else if confidence >= 40.0 {
            DiagnosticResult::new(false, Severity::Warning, "Low confidence")
        } else {
            DiagnosticResult::new(false, Severity::Critical, "Critically low confidence")
        }
        .detail("confidence", confidence);

        self.record(result)
    }

    /// Compare operation metrics against the configured maxima
    ///
    /// Any metric at or past its limit is an error; at or past the warn
    /// ratio, a warning.
    pub fn check_loop_limits(&self, metrics: &OperationMetrics) -> DiagnosticResult {
        let gauges = [
            ("tool_calls", metrics.tool_calls, self.limits.max_tool_calls),
            ("revisions", metrics.revisions, self.limits.max_revisions),
            ("tokens_used", metrics.tokens_used, self.limits.max_tokens),
            (
                "files_accessed",
                metrics.files_accessed,
                self.limits.max_files_accessed,
            ),
            (
                "loop_iterations",
                metrics.loop_iterations,
                self.limits.max_loop_iterations,
            ),
        ];

        let mut exceeded = Vec::new();
        let mut near = Vec::new();
        for (name, value, max) in gauges {
            if max == 0 {
                continue;
            }
            if value > max {
                exceeded.push(name);
            } else if value as f64 >= max as f64 * self.config.warn_ratio {
                near.push(name);
            }
        }

        let result = if !exceeded.is_empty() {
            DiagnosticResult::new(false, Severity::Error, "Operation limits exceeded")
                .detail("exceeded", &exceeded)
        } else if !near.is_empty() {
            DiagnosticResult::new(false, Severity::Warning, "Operation limits nearly exhausted")
                .detail("near_limit", &near)
        } else {
            DiagnosticResult::new(true, Severity::Info, "Operation limits within budget")
        };

        self.record(result)
    }

    /// Per-file drift plus an overall limits check
    pub fn review(
        &self,
        paths: &[impl AsRef<Path>],
        metrics: &OperationMetrics,
    ) -> Vec<DiagnosticResult> {
        let mut results: Vec<DiagnosticResult> =
            paths.iter().map(|path| self.check_drift(path)).collect();
        results.push(self.check_loop_limits(metrics));
        results
    }

    /// True when any result carries error or critical severity
    pub fn has_critical_issues(results: &[DiagnosticResult]) -> bool {
        results.iter().any(|r| r.severity >= Severity::Error)
    }

    /// Bounded history of produced results, oldest first
    pub fn history(&self) -> Vec<DiagnosticResult> {
        let history = self.history.lock().expect("history poisoned");
        history.iter().cloned().collect()
    }

    fn record(&self, result: DiagnosticResult) -> DiagnosticResult {
        if result.severity >= Severity::Warning {
            log::warn!("Diagnostic: {}", result.message);
        }
        let mut history = self.history.lock().expect("history poisoned");
        history.push_back(result.clone());
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn agent() -> DiagnosticAgent {
        DiagnosticAgent::new(
            Arc::new(FingerprintStore::new()),
            OperationLimits::default(),
            DiagnosticConfig::default(),
        )
    }

    #[test]
    fn test_drift_untracked_registers_baseline() {
        let agent = agent();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"def hello():\n    pass\n").unwrap();
        file.flush().unwrap();

        let result = agent.check_drift(file.path());
        assert!(result.passed);
        assert_eq!(result.severity, Severity::Info);
        assert!(result.message.to_lowercase().contains("no drift"));

        // Second check sees the registered baseline
        let again = agent.check_drift(file.path());
        assert!(again.passed);
    }

    #[test]
    fn test_drift_missing_file_is_info() {
        let agent = agent();
        let result = agent.check_drift("definitely/not/here.py");
        assert!(result.passed);
        assert_eq!(result.severity, Severity::Info);
    }

    #[test]
    fn test_small_drift_warns() {
        let agent = agent();
        let mut file = NamedTempFile::new().unwrap();
        let content = "x".repeat(100);
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        agent.check_drift(file.path());

        // Grow by 10%: drift, but under the critical ratio
        file.write_all(&vec![b'y'; 10]).unwrap();
        file.flush().unwrap();

        let result = agent.check_drift(file.path());
        assert!(!result.passed);
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.details.contains_key("size_delta_ratio"));
    }

    #[test]
    fn test_large_drift_is_critical() {
        let agent = agent();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"tiny").unwrap();
        file.flush().unwrap();
        agent.check_drift(file.path());

        file.write_all(&vec![b'z'; 100]).unwrap();
        file.flush().unwrap();

        let result = agent.check_drift(file.path());
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_confidence_bands() {
        let agent = agent();

        let high = agent.check_confidence(95.0);
        assert!(high.passed);
        assert_eq!(high.severity, Severity::Info);

        let medium = agent.check_confidence(75.0);
        assert_eq!(medium.severity, Severity::Warning);
        assert!(medium.message.to_lowercase().contains("low confidence"));

        let boundary = agent.check_confidence(40.0);
        assert_eq!(boundary.severity, Severity::Warning);

        let low = agent.check_confidence(30.0);
        assert_eq!(low.severity, Severity::Critical);
    }

    #[test]
    fn test_loop_limits_bands() {
        let agent = agent();

        let safe = agent.check_loop_limits(&OperationMetrics {
            tool_calls: 5,
            ..Default::default()
        });
        assert!(safe.passed);
        assert_eq!(safe.severity, Severity::Info);

        let near = agent.check_loop_limits(&OperationMetrics {
            tool_calls: 45,
            ..Default::default()
        });
        assert_eq!(near.severity, Severity::Warning);

        let over = agent.check_loop_limits(&OperationMetrics {
            tool_calls: 51,
            ..Default::default()
        });
        assert_eq!(over.severity, Severity::Error);
        assert_eq!(
            over.details.get("exceeded"),
            Some(&serde_json::json!(["tool_calls"]))
        );
    }

    #[test]
    fn test_review_and_critical_detection() {
        let agent = agent();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"content\n").unwrap();
        file.flush().unwrap();

        let results = agent.review(
            &[file.path()],
            &OperationMetrics {
                tool_calls: 1,
                ..Default::default()
            },
        );
        assert_eq!(results.len(), 2);
        assert!(!DiagnosticAgent::has_critical_issues(&results));

        let exceeded = agent.check_loop_limits(&OperationMetrics {
            loop_iterations: 100,
            ..Default::default()
        });
        assert!(DiagnosticAgent::has_critical_issues(&[exceeded]));
    }

    #[test]
    fn test_history_is_bounded() {
        let agent = DiagnosticAgent::new(
            Arc::new(FingerprintStore::new()),
            OperationLimits::default(),
            DiagnosticConfig {
                history_limit: 3,
                ..Default::default()
            },
        );

        for _ in 0..6 {
            agent.check_confidence(90.0);
        }
        assert_eq!(agent.history().len(), 3);
    }
}
