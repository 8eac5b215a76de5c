use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use archbot_core::{Architecture, RuleStore, Violation, ARCHITECTURE_KEYS, DEFAULT_MAX_ITERATIONS};

use crate::engine::{GatewayError, GenerationRequest, ModelGateway};
use crate::evaluate::{Evaluation, RuleEvaluator};
use crate::parse;
use crate::prompt;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives human-readable status lines while the loop runs.
///
/// Purely observational: errors and panics are logged and dropped.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str) -> Result<(), SinkError>;
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        self(message);
        Ok(())
    }
}

/// Forwards status lines to a channel, e.g. a UI task.
pub struct ChannelSink(pub UnboundedSender<String>);

impl ProgressSink for ChannelSink {
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        self.0.send(message.to_string())?;
        Ok(())
    }
}

/// Key under which `Validator::generate` stores its one-shot rule summary.
pub const VALIDATION_WARNINGS_KEY: &str = "validation_warnings";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("max_iterations must be at least 1")]
    ZeroIterationBudget,
}

#[derive(Debug, Error)]
pub enum DesignError {
    #[error(transparent)]
    Validate(#[from] ValidateError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No rules loaded; nothing was checked
    NoRules,
    /// The last evaluation pass found no violations
    Passed,
    /// Violations remain and the iteration budget is used up
    BudgetExhausted,
    /// The repair call failed; the pre-repair architecture is returned
    RegenerationFailed(String),
}

/// Best architecture obtained, plus what is still wrong with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub architecture: Architecture,
    /// Violations of the last evaluation pass only
    pub violations: Vec<Violation>,
    /// Completed regenerations
    pub iterations_used: u32,
    pub stop: StopReason,
}

impl Outcome {
    pub fn into_parts(self) -> (Architecture, Vec<Violation>, u32) {
        (self.architecture, self.violations, self.iterations_used)
    }
}

enum LoopState {
    Evaluating,
    Improving,
    Stopped(StopReason),
}

/// Generates architectures and runs the validate-and-improve loop.
///
/// Cheap to clone; the gateway and rule store are shared read-only, so one
/// validator can serve several sessions concurrently.
#[derive(Clone)]
pub struct Validator {
    gateway: Arc<dyn ModelGateway>,
    rules: Arc<RuleStore>,
}

impl Validator {
    pub fn new(gateway: Arc<dyn ModelGateway>, rules: Arc<RuleStore>) -> Self {
        Validator { gateway, rules }
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// One evaluation pass without repair.
    pub async fn evaluate_architecture(
        &self,
        architecture: &Architecture,
        requirements: &str,
    ) -> Evaluation {
        RuleEvaluator::new(self.gateway.as_ref(), &self.rules)
            .evaluate_architecture(architecture, requirements)
            .await
    }

    /// Ask the model for an architecture and attach a one-shot rule check.
    ///
    /// `requirements` is what the rules are judged against; for an adjust
    /// request it differs from `request.text`. When rules fail, the
    /// `"{rule}: {reason}"` lines are stored under `validation_warnings`;
    /// the architecture is returned either way.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        requirements: &str,
    ) -> Result<Architecture, GatewayError> {
        let mut architecture = self.generate_unchecked(request).await?;

        if !self.rules.is_empty() {
            let evaluation = self.evaluate_architecture(&architecture, requirements).await;
            if !evaluation.all_pass() {
                let summary = prompt::violation_summary(&evaluation.violations);
                tracing::warn!(violations = evaluation.violations.len(), "generated architecture fails rules");
                architecture
                    .extra
                    .insert(VALIDATION_WARNINGS_KEY.to_string(), Value::String(summary));
            }
        }
        Ok(architecture)
    }

    /// Ask the model for an architecture, without any rule check.
    pub async fn generate_unchecked(&self, request: &GenerationRequest) -> Result<Architecture, GatewayError> {
        let output = self.gateway.generate(request).await.map_err(|e| {
            tracing::error!("architecture generation failed: {e}");
            e
        })?;
        let architecture = Architecture::from_map(parse::interpret(output, ARCHITECTURE_KEYS));
        if architecture.is_degraded() {
            tracing::warn!("model answer did not contain a structured architecture");
        }
        Ok(architecture)
    }

    /// Generate an architecture and run it through `validate_and_improve`.
    ///
    /// The budget is checked before any model call. The first architecture is
    /// evaluated once, by the loop.
    pub async fn design(
        &self,
        request: &GenerationRequest,
        requirements: &str,
        max_iterations: u32,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Outcome, DesignError> {
        if max_iterations == 0 {
            return Err(ValidateError::ZeroIterationBudget.into());
        }
        let architecture = self.generate_unchecked(request).await?;
        Ok(self
            .run_loop(architecture, requirements, max_iterations, progress)
            .await)
    }

    /// Check `architecture` against every rule and ask the model to repair
    /// violations, at most `max_iterations` evaluation passes in total.
    ///
    /// Only `max_iterations == 0` is an error. Gateway failures end the loop
    /// with the last good architecture instead.
    pub async fn validate_and_improve(
        &self,
        architecture: Architecture,
        requirements: &str,
        max_iterations: u32,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<Outcome, ValidateError> {
        if max_iterations == 0 {
            return Err(ValidateError::ZeroIterationBudget);
        }
        Ok(self
            .run_loop(architecture, requirements, max_iterations, progress)
            .await)
    }

    /// `validate_and_improve` with the default budget and no progress sink.
    pub async fn validate(&self, architecture: Architecture, requirements: &str) -> Outcome {
        self.run_loop(architecture, requirements, DEFAULT_MAX_ITERATIONS, None)
            .await
    }

    async fn run_loop(
        &self,
        architecture: Architecture,
        requirements: &str,
        max_iterations: u32,
        progress: Option<&dyn ProgressSink>,
    ) -> Outcome {
        debug_assert!(max_iterations > 0);
        let mut current = architecture;
        // The outcome carries the loop's own verdict only
        current.extra.shift_remove(VALIDATION_WARNINGS_KEY);
        let mut violations: Vec<Violation> = Vec::new();
        let mut iterations_used: u32 = 0;

        if self.rules.is_empty() {
            tracing::warn!("no rules loaded, skipping validation");
            return Outcome {
                architecture: current,
                violations,
                iterations_used,
                stop: StopReason::NoRules,
            };
        }

        let evaluator = RuleEvaluator::new(self.gateway.as_ref(), &self.rules);
        let mut state = LoopState::Evaluating;

        let stop = loop {
            state = match state {
                LoopState::Evaluating => {
                    tracing::info!(pass = iterations_used + 1, "evaluating architecture rules");
                    let evaluation = evaluator.evaluate_architecture(&current, requirements).await;
                    if evaluation.all_pass() {
                        violations.clear();
                        LoopState::Stopped(StopReason::Passed)
                    } else {
                        violations = evaluation.violations;
                        tracing::warn!(count = violations.len(), "architecture violates rules");
                        if iterations_used >= max_iterations - 1 {
                            tracing::warn!(max_iterations, "iteration budget exhausted");
                            LoopState::Stopped(StopReason::BudgetExhausted)
                        } else {
                            LoopState::Improving
                        }
                    }
                }
                LoopState::Improving => {
                    let round = iterations_used + 1;
                    notify(progress, &prompt::progress_message(round, &violations));

                    let repair = prompt::improvement_prompt(&current, &violations, requirements);
                    tracing::info!(round, "requesting improved architecture");
                    match self.gateway.generate(&GenerationRequest::adjust(repair)).await {
                        Ok(output) => {
                            current = Architecture::from_map(parse::interpret(output, ARCHITECTURE_KEYS));
                            iterations_used += 1;
                            notify(
                                progress,
                                &format!("Finished improvement round {iterations_used}."),
                            );
                            LoopState::Evaluating
                        }
                        Err(e) => {
                            tracing::error!(round, "regeneration failed, keeping last architecture: {e}");
                            LoopState::Stopped(StopReason::RegenerationFailed(e.to_string()))
                        }
                    }
                }
                LoopState::Stopped(reason) => break reason,
            };
        };

        tracing::info!(iterations_used, remaining = violations.len(), ?stop, "validation finished");
        Outcome {
            architecture: current,
            violations,
            iterations_used,
            stop,
        }
    }
}

fn notify(progress: Option<&dyn ProgressSink>, message: &str) {
    let Some(sink) = progress else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| sink.notify(message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!("progress sink failed: {e}"),
        Err(_) => tracing::debug!("progress sink panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_channel_is_an_error_not_a_panic() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink(tx);
        assert!(sink.notify("hello").is_err());
        notify(Some(&sink), "hello");
    }

    #[test]
    fn panicking_sink_is_swallowed() {
        let sink = |_: &str| panic!("ui went away");
        notify(Some(&sink), "hello");
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        notify(Some(&ChannelSink(tx)), "round 1");
        assert_eq!(rx.try_recv().unwrap(), "round 1");
    }
}
