use archbot_core::{architecture_schema, Architecture, Rule, ServiceType, Violation};

const OUTPUT_FORMAT: &str = "\
Return ONLY a JSON object, without Markdown fences or commentary, with these fields:\n\
- architecture_overview: string, short description of the overall design\n\
- components: array of {\"name\", \"service_type\", \"description\"}\n\
- diagram_description: {\"nodes\": [{\"id\", \"type\", \"name\"}], \
\"connections\": [{\"from\", \"to\", \"label\"}]}\n\
- design_decisions: array of strings, each a decision and its rationale\n\
- best_practices: array of strings, the AWS best practices applied\n";

pub fn architect_system_prompt() -> String {
    "You are a senior AWS solutions architect. You design architectures that follow the \
AWS Well-Architected Framework pillars: operational excellence, security, reliability, \
performance efficiency, cost optimization and sustainability. You always answer with a \
single JSON object describing the architecture."
        .to_string()
}

pub fn evaluator_system_prompt() -> String {
    "You are an AWS architecture reviewer. You check one architecture against one company \
architecture rule and answer with a single JSON verdict object."
        .to_string()
}

fn diagram_guidance() -> String {
    format!(
        "For diagram_description, every node has an \"id\" (unique), a \"type\" and a \"name\" \
(display label). \"type\" and every component's service_type must be one of: {}.\n\
Every connection has \"from\" and \"to\" node ids and an optional \"label\".\n\n\
Example:\n\
{{\n  \"diagram_description\": {{\n    \"nodes\": [\n      \
{{\"id\": \"web\", \"type\": \"EC2\", \"name\": \"Web server\"}},\n      \
{{\"id\": \"db\", \"type\": \"RDS\", \"name\": \"Database\"}}\n    ],\n    \
\"connections\": [\n      {{\"from\": \"web\", \"to\": \"db\", \"label\": \"reads/writes\"}}\n    ]\n  }}\n}}\n",
        ServiceType::catalog()
    )
}

/// Prompt for a fresh design from requirements.
pub fn generation_prompt(requirements: &str) -> String {
    format!(
        "Design an AWS architecture for the following system requirements.\n\n\
## Requirements\n{requirements}\n\n\
Provide:\n\
1. An architecture overview\n\
2. The AWS services used and what each one is for\n\
3. A textual diagram: nodes and the connections between them\n\
4. The key design decisions and why\n\
5. The AWS best practices applied\n\n\
{}\n{}\n\
JSON schema of the expected object:\n{}\n",
        diagram_guidance(),
        OUTPUT_FORMAT,
        architecture_schema()
    )
}

/// Prompt for revising an existing design. `context` carries the current
/// architecture and what to change.
pub fn adjustment_prompt(context: &str) -> String {
    format!(
        "Revise the existing AWS architecture using the information below.\n\n\
{context}\n\n\
Return the complete revised architecture, not a diff. Call out added, changed or \
removed components in design_decisions.\n\n\
{}\n{}",
        diagram_guidance(),
        OUTPUT_FORMAT
    )
}

/// Prompt asking the model whether `architecture_json` satisfies `rule`.
pub fn evaluation_prompt(rule: &Rule, architecture_json: &str, requirements: &str) -> String {
    format!(
        "Assess whether the architecture below complies with the architecture rule.\n\n\
## Architecture rule\n{}\n\n\
## User requirements\n{requirements}\n\n\
## Architecture\n```json\n{architecture_json}\n```\n\n\
Answer with ONLY a JSON object with these fields:\n\
- is_valid: boolean, true if the architecture complies with the rule\n\
- description: string, one-sentence summary of the assessment\n\
- reason: string, why it does not comply; or, if it does, which parts satisfy the rule\n",
        rule.content
    )
}

/// Repair instruction listing every violation of the last evaluation pass.
///
/// Pure: the same inputs always give the same text. The architecture is
/// serialized in its own field order.
pub fn improvement_prompt(
    architecture: &Architecture,
    violations: &[Violation],
    requirements: &str,
) -> String {
    let mut issues = String::new();
    for (i, v) in violations.iter().enumerate() {
        issues.push_str(&format!("{}. {}: {}\n", i + 1, v.rule, v.reason));
        if !v.description.is_empty() {
            issues.push_str("   Note: ");
            issues.push_str(&v.description);
            issues.push('\n');
        }
    }

    format!(
        "Adjust the architecture so that it complies with the company architecture rules.\n\n\
## Original requirements\n{requirements}\n\n\
## Current architecture\n```json\n{}\n```\n\n\
## Issues to fix\n{issues}\n\
Resolve exactly these issues while keeping the overall structure of the current \
architecture and still meeting the requirements. Return the complete revised \
architecture: overview, components, diagram description, design decisions and best \
practices.\n",
        architecture.to_pretty_json()
    )
}

/// Status line sent to the progress sink before a repair round.
pub fn progress_message(round: u32, violations: &[Violation]) -> String {
    let mut msg = format!(
        "Round {round}: validating and improving the architecture.\n\
Found {} issue(s) to fix:\n",
        violations.len()
    );
    for v in violations {
        msg.push_str(&format!("- {}: {}\n", v.rule, v.reason));
    }
    msg
}

/// `"{rule}: {reason}"` per violation, one per line.
pub fn violation_summary(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.rule, v.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn violation(rule: &str, reason: &str, description: &str) -> Violation {
        Violation {
            rule: rule.to_string(),
            description: description.to_string(),
            reason: reason.to_string(),
        }
    }

    #[test]
    fn improvement_prompt_numbers_violations() {
        let arch = Architecture::from_value(json!({"architecture_overview": "three tier"}));
        let prompt = improvement_prompt(
            &arch,
            &[
                violation("IAM", "missing IAM", ""),
                violation("Multi-AZ", "single AZ database", "RDS runs in one AZ"),
            ],
            "an online shop",
        );
        assert!(prompt.contains("1. IAM: missing IAM\n2. Multi-AZ: single AZ database\n   Note: RDS runs in one AZ\n"));
        assert!(prompt.contains("## Original requirements\nan online shop"));
        assert!(prompt.contains("\"architecture_overview\": \"three tier\""));
    }

    #[test]
    fn improvement_prompt_is_deterministic() {
        let arch = Architecture::from_value(json!({
            "zeta": 1,
            "architecture_overview": "o",
            "alpha": 2,
        }));
        let v = [violation("R1", "r", "")];
        let a = improvement_prompt(&arch, &v, "req");
        let b = improvement_prompt(&arch.clone(), &v, "req");
        assert_eq!(a, b);
        // Extra fields keep arrival order after the known ones
        let zeta = a.find("\"zeta\"").unwrap();
        let alpha = a.find("\"alpha\"").unwrap();
        assert!(a.find("\"architecture_overview\"").unwrap() < zeta);
        assert!(zeta < alpha);
    }

    #[test]
    fn evaluation_prompt_embeds_everything() {
        let rule = Rule::new("Encryption", "# Encryption\nAll data stores use KMS.");
        let prompt = evaluation_prompt(&rule, "{\"components\": []}", "store invoices");
        assert!(prompt.contains("All data stores use KMS."));
        assert!(prompt.contains("store invoices"));
        assert!(prompt.contains("```json\n{\"components\": []}\n```"));
        assert!(prompt.contains("is_valid"));
    }

    #[test]
    fn generation_prompt_lists_catalog() {
        let prompt = generation_prompt("a blog");
        assert!(prompt.contains("a blog"));
        assert!(prompt.contains("APIGateway"));
        assert!(prompt.contains("diagram_description"));
    }

    #[test]
    fn progress_lists_each_issue() {
        let msg = progress_message(2, &[violation("R1", "no WAF", "")]);
        assert!(msg.starts_with("Round 2:"));
        assert!(msg.contains("- R1: no WAF"));
    }
}
