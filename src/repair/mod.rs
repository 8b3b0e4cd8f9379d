//! Bounded validate -> fix -> revalidate loop over one artifact.
//!
//! Each fix transition is recorded in the artifact history once its outcome
//! is known, and `current` follows the newest candidate so an interrupted
//! run still leaves its latest attempt on disk.

pub mod command;
pub mod end_blocks;

use crate::artifact::{ArtifactKey, ArtifactStore, AttemptOutcome, FixAttempt};
use crate::error::{EvalError, EvalResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use command::{CommandFixer, CommandValidator};
pub use end_blocks::{ChainFixer, EndBlockFixer};

/// Which part of a POU a diagnostic points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Declaration,
    Implementation,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<u32>,
    #[serde(default)]
    pub section: Section,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            section: Section::Unknown,
        }
    }

    pub fn at(mut self, line: u32) -> Self {
        self.location = Some(line);
        self
    }

    pub fn in_section(mut self, section: Section) -> Self {
        self.section = section;
        self
    }
}

/// Normalized validator answer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub pass: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            pass: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            pass: false,
            diagnostics,
        }
    }
}

/// A validator or fixer could not answer. Distinct from a failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub trait Validator: Send + Sync {
    fn validate(&self, code: &str) -> Result<ValidationResult, ServiceError>;
}

pub trait Fixer: Send + Sync {
    fn fix(&self, code: &str, diagnostics: &[Diagnostic]) -> Result<String, ServiceError>;
}

impl<F> Validator for F
where
    F: Fn(&str) -> Result<ValidationResult, ServiceError> + Send + Sync,
{
    fn validate(&self, code: &str) -> Result<ValidationResult, ServiceError> {
        self(code)
    }
}

impl<F> Fixer for F
where
    F: Fn(&str, &[Diagnostic]) -> Result<String, ServiceError> + Send + Sync,
{
    fn fix(&self, code: &str, diagnostics: &[Diagnostic]) -> Result<String, ServiceError> {
        self(code, diagnostics)
    }
}

/// Retry with exponential backoff for validator and fixer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra tries after the first call.
    pub retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(self.multiplier.saturating_pow(retry.saturating_sub(1)))
    }

    /// Call `op` until it answers or the retries run out.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, ServiceError>,
    ) -> EvalResult<T> {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.retries => {
                    retry += 1;
                    let delay = self.backoff(retry);
                    warn!(
                        call = what,
                        error = %err,
                        retry,
                        max_retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        "service call failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    return Err(EvalError::ServiceUnavailable {
                        attempts: retry + 1,
                        message: format!("{}: {}", what, err),
                    })
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExhaustReason {
    AttemptsExhausted,
    Stalled,
    ServiceError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalState {
    Validated,
    Exhausted(ExhaustReason),
}

/// Per-artifact state machine of a repair run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Pristine,
    Validating,
    Fixing,
    Validated,
    Exhausted(ExhaustReason),
}

impl RepairState {
    pub fn can_transition_to(self, next: RepairState) -> bool {
        use RepairState::*;
        matches!(
            (self, next),
            (Pristine, Validating)
                | (Validating, Validated)
                | (Validating, Fixing)
                | (Validating, Exhausted(_))
                | (Fixing, Validating)
                | (Fixing, Exhausted(_))
        )
    }

    pub fn terminal(self) -> Option<TerminalState> {
        match self {
            RepairState::Validated => Some(TerminalState::Validated),
            RepairState::Exhausted(reason) => Some(TerminalState::Exhausted(reason)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub key: ArtifactKey,
    pub final_code: String,
    pub succeeded: bool,
    pub terminal: TerminalState,
    pub history: Vec<FixAttempt>,
    pub validations: usize,
    pub fix_calls: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_error: Option<String>,
}

/// Diagnostics handed to the fixer. Declaration errors cascade into the
/// implementation, so when any exist only they are forwarded.
pub fn diagnostics_for_fixer(diagnostics: &[Diagnostic]) -> Vec<Diagnostic> {
    let declarations: Vec<Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.section == Section::Declaration)
        .cloned()
        .collect();
    if declarations.is_empty() {
        diagnostics.to_vec()
    } else {
        declarations
    }
}

pub struct RepairOrchestrator<'a> {
    store: &'a ArtifactStore,
    validator: &'a dyn Validator,
    fixer: &'a dyn Fixer,
    max_attempts: usize,
    retry: RetryPolicy,
}

struct RunTracker<'k> {
    key: &'k ArtifactKey,
    state: RepairState,
    validations: usize,
    fix_calls: usize,
}

impl RunTracker<'_> {
    fn advance(&mut self, next: RepairState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal repair transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(artifact = %self.key, from = ?self.state, to = ?next, "repair transition");
        match next {
            RepairState::Validating => self.validations += 1,
            RepairState::Fixing => self.fix_calls += 1,
            _ => {}
        }
        self.state = next;
    }
}

impl<'a> RepairOrchestrator<'a> {
    pub fn new(
        store: &'a ArtifactStore,
        validator: &'a dyn Validator,
        fixer: &'a dyn Fixer,
        max_attempts: usize,
    ) -> Self {
        Self {
            store,
            validator,
            fixer,
            max_attempts,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run the repair loop for one artifact.
    ///
    /// Service failures end the run with `Exhausted(ServiceError)` and keep
    /// the history recorded so far; only store failures return `Err`.
    pub fn repair(&self, key: &ArtifactKey, initial_code: &str) -> EvalResult<RepairOutcome> {
        let mut run = self.store.begin_run(key)?;
        self.store.backup_once(&mut run, initial_code)?;
        self.store.write_current(key, initial_code)?;

        let mut tracker = RunTracker {
            key,
            state: RepairState::Pristine,
            validations: 0,
            fix_calls: 0,
        };
        let mut history: Vec<FixAttempt> = Vec::new();
        let mut code = initial_code.to_string();
        let mut service_error = None;

        tracker.advance(RepairState::Validating);
        let mut validation = match self.retry.run("validate", || self.validator.validate(&code)) {
            Ok(result) => Some(result),
            Err(err) => {
                service_error = Some(err.to_string());
                tracker.advance(RepairState::Exhausted(ExhaustReason::ServiceError));
                None
            }
        };

        while let Some(result) = validation.take() {
            if result.pass {
                tracker.advance(RepairState::Validated);
                break;
            }
            let attempt_index = history.len();
            if attempt_index >= self.max_attempts {
                tracker.advance(RepairState::Exhausted(ExhaustReason::AttemptsExhausted));
                break;
            }

            tracker.advance(RepairState::Fixing);
            let to_fixer = diagnostics_for_fixer(&result.diagnostics);
            debug!(
                artifact = %key,
                attempt = attempt_index,
                diagnostics = to_fixer.len(),
                "requesting fix"
            );
            let candidate = match self.retry.run("fix", || self.fixer.fix(&code, &to_fixer)) {
                Ok(candidate) => candidate,
                Err(err) => {
                    service_error = Some(err.to_string());
                    let entry = self.entry(
                        attempt_index,
                        &code,
                        &result,
                        code.clone(),
                        AttemptOutcome::ServiceError,
                    );
                    self.record(key, &mut history, entry)?;
                    tracker.advance(RepairState::Exhausted(ExhaustReason::ServiceError));
                    break;
                }
            };

            if candidate == code {
                let entry = self.entry(attempt_index, &code, &result, candidate, AttemptOutcome::Failed);
                self.record(key, &mut history, entry)?;
                tracker.advance(RepairState::Exhausted(ExhaustReason::Stalled));
                break;
            }

            self.store.write_current(key, &candidate)?;
            let input = std::mem::replace(&mut code, candidate);

            tracker.advance(RepairState::Validating);
            match self.retry.run("validate", || self.validator.validate(&code)) {
                Ok(next) => {
                    let outcome = if next.pass {
                        AttemptOutcome::Passed
                    } else {
                        AttemptOutcome::Failed
                    };
                    let entry = self.entry(attempt_index, &input, &result, code.clone(), outcome);
                    self.record(key, &mut history, entry)?;
                    validation = Some(next);
                }
                Err(err) => {
                    service_error = Some(err.to_string());
                    let entry = self.entry(
                        attempt_index,
                        &input,
                        &result,
                        code.clone(),
                        AttemptOutcome::ServiceError,
                    );
                    self.record(key, &mut history, entry)?;
                    tracker.advance(RepairState::Exhausted(ExhaustReason::ServiceError));
                }
            }
        }

        let terminal = tracker
            .state
            .terminal()
            .unwrap_or(TerminalState::Exhausted(ExhaustReason::AttemptsExhausted));
        let succeeded = terminal == TerminalState::Validated;

        if let Some(message) = &service_error {
            warn!(artifact = %key, attempts = history.len(), error = %message, "repair aborted by service failure");
        } else {
            info!(
                artifact = %key,
                terminal = ?terminal,
                attempts = history.len(),
                validations = tracker.validations,
                "repair finished"
            );
        }

        Ok(RepairOutcome {
            key: key.clone(),
            final_code: code,
            succeeded,
            terminal,
            history,
            validations: tracker.validations,
            fix_calls: tracker.fix_calls,
            service_error,
        })
    }

    fn entry(
        &self,
        attempt_index: usize,
        input: &str,
        input_validation: &ValidationResult,
        output: String,
        outcome: AttemptOutcome,
    ) -> FixAttempt {
        FixAttempt {
            attempt_index,
            input_text: input.to_string(),
            diagnostics_in: input_validation.diagnostics.clone(),
            output_text: output,
            outcome,
            recorded_at: Utc::now(),
        }
    }

    fn record(
        &self,
        key: &ArtifactKey,
        history: &mut Vec<FixAttempt>,
        entry: FixAttempt,
    ) -> EvalResult<()> {
        self.store.append_history(key, &entry)?;
        history.push(entry);
        Ok(())
    }
}
