use serde_json::{Map, Value};

use archbot_core::{Architecture, Rule, RuleStore, Violation};

use crate::engine::ModelGateway;
use crate::parse;
use crate::prompt;

const VERDICT_KEYS: &[&str] = &["is_valid"];
const DEFAULT_FAIL_REASON: &str = "does not meet the rule requirements";

/// Pass/fail judgment for one rule, parsed from one evaluation call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Verdict {
    is_valid: bool,
    description: String,
    reason: String,
}

impl Verdict {
    fn unparsed() -> Self {
        Verdict {
            is_valid: false,
            description: "could not parse verdict".to_string(),
            reason: "the evaluation answer contained no usable verdict".to_string(),
        }
    }
}

/// Result of one evaluation pass over every rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Failed rules, in rule store order
    pub violations: Vec<Violation>,
    /// Rules whose evaluation call errored; neither passed nor failed
    pub skipped: Vec<String>,
}

impl Evaluation {
    pub fn all_pass(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_parts(self) -> (bool, Vec<Violation>) {
        (self.violations.is_empty(), self.violations)
    }
}

/// Checks an architecture against every rule, one model call per rule.
pub struct RuleEvaluator<'a> {
    gateway: &'a dyn ModelGateway,
    rules: &'a RuleStore,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(gateway: &'a dyn ModelGateway, rules: &'a RuleStore) -> Self {
        RuleEvaluator { gateway, rules }
    }

    /// Evaluate all rules in order. A failing rule never stops the pass, and
    /// a rule whose call errors is skipped rather than counted.
    pub async fn evaluate_architecture(
        &self,
        architecture: &Architecture,
        requirements: &str,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();
        if self.rules.is_empty() {
            tracing::debug!("no rules loaded, skipping evaluation");
            return evaluation;
        }

        let architecture_json = architecture.to_pretty_json();
        for rule in self.rules.iter() {
            match self.check_rule(rule, &architecture_json, requirements).await {
                Some(verdict) if verdict.is_valid => {
                    tracing::info!(rule = %rule.name, "rule satisfied");
                }
                Some(verdict) => {
                    let reason = if verdict.reason.trim().is_empty() {
                        DEFAULT_FAIL_REASON.to_string()
                    } else {
                        verdict.reason
                    };
                    tracing::warn!(rule = %rule.name, %reason, "rule violated");
                    evaluation.violations.push(Violation {
                        rule: rule.name.clone(),
                        description: verdict.description,
                        reason,
                    });
                }
                None => evaluation.skipped.push(rule.name.clone()),
            }
        }
        evaluation
    }

    async fn check_rule(
        &self,
        rule: &Rule,
        architecture_json: &str,
        requirements: &str,
    ) -> Option<Verdict> {
        let prompt = prompt::evaluation_prompt(rule, architecture_json, requirements);
        match self.gateway.evaluate(&prompt).await {
            Ok(output) => {
                let interpreted = parse::interpret(output, VERDICT_KEYS);
                Some(extract_verdict(&interpreted))
            }
            Err(e) => {
                tracing::error!(rule = %rule.name, "rule evaluation call failed, skipping: {e}");
                None
            }
        }
    }
}

/// `is_valid` on the object itself, else inside its `content` text, else a
/// failing verdict. Unreadable answers never count as a pass.
fn extract_verdict(map: &Map<String, Value>) -> Verdict {
    if let Some(verdict) = verdict_from(map) {
        return verdict;
    }
    if let Some(text) = map.get("content").and_then(Value::as_str) {
        if let Some(verdict) = parse::extract_object(text, VERDICT_KEYS).as_ref().and_then(verdict_from) {
            return verdict;
        }
    }
    tracing::error!("could not extract a verdict from evaluation answer");
    Verdict::unparsed()
}

fn verdict_from(map: &Map<String, Value>) -> Option<Verdict> {
    let is_valid = match map.get("is_valid")? {
        Value::Bool(b) => *b,
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => true,
            "false" | "no" => false,
            _ => return None,
        },
        _ => return None,
    };
    Some(Verdict {
        is_valid,
        description: text_field(map, "description"),
        reason: text_field(map, "reason"),
    })
}

fn text_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GatewayError, GenerationRequest, ModelOutput};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn verdict_direct() {
        let v = extract_verdict(&obj(json!({"is_valid": false, "description": "d", "reason": "no IAM"})));
        assert!(!v.is_valid);
        assert_eq!(v.reason, "no IAM");
    }

    #[test]
    fn verdict_from_string_flag() {
        let v = extract_verdict(&obj(json!({"is_valid": "True", "reason": "ok"})));
        assert!(v.is_valid);
    }

    #[test]
    fn verdict_inside_content() {
        let content = "Analysis...\n```json\n{\"is_valid\": true, \"description\": \"fine\"}\n```";
        let v = extract_verdict(&obj(json!({"content": content})));
        assert!(v.is_valid);
        assert_eq!(v.description, "fine");
    }

    #[tokio::test]
    async fn verdict_after_echoed_architecture() {
        let answer = "Reviewing:\n```json\n{\"architecture_overview\": \"x\"}\n```\n\
Verdict:\n```json\n{\"is_valid\": false, \"reason\": \"public S3 bucket\"}\n```";
        let gateway = ByRule {
            answers: vec![("R-S3", Ok(answer))],
            calls: Mutex::new(vec![]),
        };
        let rules = RuleStore::new(vec![Rule::new("s3", "R-S3")]);
        let eval = RuleEvaluator::new(&gateway, &rules)
            .evaluate_architecture(&arch(), "req")
            .await;
        assert_eq!(eval.violations.len(), 1);
        assert_eq!(eval.violations[0].reason, "public S3 bucket");
    }

    #[test]
    fn garbage_is_a_failing_verdict() {
        let v = extract_verdict(&obj(json!({"content": "I think it's mostly fine?"})));
        assert_eq!(v, Verdict::unparsed());
        let v = extract_verdict(&obj(json!({"verdict": "pass"})));
        assert!(!v.is_valid);
        let v = extract_verdict(&obj(json!({"is_valid": null})));
        assert!(!v.is_valid);
    }

    /// Answers evaluation prompts by looking up which rule text they embed.
    struct ByRule {
        answers: Vec<(&'static str, Result<&'static str, &'static str>)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelGateway for ByRule {
        async fn generate(&self, _: &GenerationRequest) -> Result<ModelOutput, GatewayError> {
            Err(GatewayError::Other("not used".into()))
        }

        async fn evaluate(&self, prompt: &str) -> Result<ModelOutput, GatewayError> {
            let (marker, answer) = self
                .answers
                .iter()
                .find(|(marker, _)| prompt.contains(marker))
                .expect("prompt for unknown rule");
            self.calls.lock().unwrap().push(marker.to_string());
            match answer {
                Ok(text) => Ok(ModelOutput::Raw(text.to_string())),
                Err(e) => Err(GatewayError::Other(e.to_string())),
            }
        }
    }

    fn arch() -> Architecture {
        Architecture::from_value(json!({"architecture_overview": "x"}))
    }

    #[tokio::test]
    async fn one_failure_among_passes() {
        let pass = r#"{"is_valid": true, "description": "", "reason": "ok"}"#;
        let fail = r#"{"is_valid": false, "description": "d", "reason": "missing IAM"}"#;
        for order in [["PASS-RULE", "FAIL-RULE"], ["FAIL-RULE", "PASS-RULE"]] {
            let gateway = ByRule {
                answers: vec![("PASS-RULE", Ok(pass)), ("FAIL-RULE", Ok(fail))],
                calls: Mutex::new(vec![]),
            };
            let rules: RuleStore = order
                .iter()
                .map(|m| Rule::new(format!("{m} name"), format!("# {m}")))
                .collect();
            let eval = RuleEvaluator::new(&gateway, &rules)
                .evaluate_architecture(&arch(), "req")
                .await;
            assert_eq!(eval.violations.len(), 1);
            assert_eq!(eval.violations[0].rule, "FAIL-RULE name");
            assert_eq!(eval.violations[0].reason, "missing IAM");
            assert_eq!(gateway.calls.lock().unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn errored_rule_is_skipped_not_failed() {
        let gateway = ByRule {
            answers: vec![
                ("R-ERR", Err("timeout")),
                ("R-BAD", Ok(r#"{"is_valid": false, "reason": ""}"#)),
            ],
            calls: Mutex::new(vec![]),
        };
        let rules = RuleStore::new(vec![Rule::new("err", "R-ERR"), Rule::new("bad", "R-BAD")]);
        let eval = RuleEvaluator::new(&gateway, &rules)
            .evaluate_architecture(&arch(), "req")
            .await;
        assert_eq!(eval.skipped, ["err".to_string()]);
        assert_eq!(eval.violations.len(), 1);
        assert_eq!(eval.violations[0].reason, DEFAULT_FAIL_REASON);
        assert!(!eval.all_pass());
    }

    #[tokio::test]
    async fn empty_store_makes_no_calls() {
        let gateway = ByRule {
            answers: vec![],
            calls: Mutex::new(vec![]),
        };
        let rules = RuleStore::empty();
        let (pass, violations) = RuleEvaluator::new(&gateway, &rules)
            .evaluate_architecture(&arch(), "req")
            .await
            .into_parts();
        assert!(pass);
        assert!(violations.is_empty());
        assert!(gateway.calls.lock().unwrap().is_empty());
    }
}
