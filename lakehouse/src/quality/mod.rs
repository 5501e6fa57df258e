pub mod checks;
pub mod validator;

use serde::Serialize;
use std::fmt;

pub use validator::DataQualityValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Raw,
    Cleaned,
    Aggregated,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Raw => "raw",
            Layer::Cleaned => "cleaned",
            Layer::Aggregated => "aggregated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    pub fn new(name: &str, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: message.into(),
        }
    }
}

/// Outcome of checking one layer. The layer passes only if every check does.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub layer: Layer,
    pub passed: bool,
    pub record_count: u64,
    pub checks: Vec<CheckResult>,
    pub failed_checks: Vec<String>,
}

impl ValidationReport {
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            passed: true,
            record_count: 0,
            checks: Vec::new(),
            failed_checks: Vec::new(),
        }
    }

    /// Adds a check and returns whether it passed.
    pub fn push(&mut self, check: CheckResult) -> bool {
        let passed = check.passed;
        if !passed {
            self.passed = false;
            self.failed_checks.push(check.name.clone());
        }
        self.checks.push(check);
        passed
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineValidation {
    pub passed: bool,
    pub raw: ValidationReport,
    pub cleaned: ValidationReport,
    pub aggregated: ValidationReport,
}

impl PipelineValidation {
    pub fn failed_layers(&self) -> Vec<Layer> {
        [&self.raw, &self.cleaned, &self.aggregated]
            .into_iter()
            .filter(|r| !r.passed)
            .map(|r| r.layer)
            .collect()
    }
}
