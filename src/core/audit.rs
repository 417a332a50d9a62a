/// An issue found during a workflow audit pass.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// A hard problem: evaluation would fail or silently misbehave.
    Error(String),
    /// Suspicious but legal wiring.
    Warning(String),
}

/// The result of [`Workflow::audit`](crate::Workflow::audit).
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    /// Emits every issue through the `log` facade.
    pub fn log_summary(&self) {
        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(msg) => log::error!("audit: {msg}"),
                ValidationIssue::Warning(msg) => log::warn!("audit: {msg}"),
            }
        }
    }
}
