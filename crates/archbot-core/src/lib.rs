pub mod error;
pub mod rules;

pub use error::Error;
pub use rules::{Rule, RuleStore};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;

// --- Types (the JSON shape the model is asked to produce) ---

/// Unknown fields kept verbatim, in the order they arrived.
pub type Extra = Map<String, Value>;

/// An architecture proposal as returned by the model.
///
/// Every field is optional: the model is untrusted and frequently drops or
/// renames sections. Anything we don't recognise lands in `extra` and is
/// written back out after the known fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Architecture {
    /// Short prose description of the overall design
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture_overview: Option<String>,
    /// AWS services used and what each one is for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<Component>>,
    /// Nodes and connections for the architecture diagram
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_description: Option<DiagramDescription>,
    /// Key design decisions and their rationale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_decisions: Option<Vec<String>>,
    /// AWS best practices applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_practices: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

pub const ARCHITECTURE_KEYS: &[&str] = &[
    "architecture_overview",
    "components",
    "diagram_description",
    "design_decisions",
    "best_practices",
];

impl Architecture {
    /// Build an architecture from an arbitrary JSON object.
    ///
    /// Never fails: a known field whose value has the wrong shape is moved
    /// into `extra` instead of rejecting the whole document.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut arch = Architecture::default();
        for (key, value) in map {
            match key.as_str() {
                "architecture_overview" => {
                    take_or_stash(&mut arch.architecture_overview, &mut arch.extra, key, value)
                }
                "components" => take_or_stash(&mut arch.components, &mut arch.extra, key, value),
                "diagram_description" => {
                    take_or_stash(&mut arch.diagram_description, &mut arch.extra, key, value)
                }
                "design_decisions" => {
                    take_or_stash(&mut arch.design_decisions, &mut arch.extra, key, value)
                }
                "best_practices" => {
                    take_or_stash(&mut arch.best_practices, &mut arch.extra, key, value)
                }
                _ => {
                    arch.extra.insert(key, value);
                }
            }
        }
        arch
    }

    /// Like `from_map`, for any JSON value. Non-objects are kept under `content`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::String(text) => Self::from_map(content_map(text)),
            other => Self::from_map(content_map(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Pretty JSON in field order, as embedded into prompts.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn components(&self) -> &[Component] {
        self.components.as_deref().unwrap_or(&[])
    }

    pub fn design_decisions(&self) -> &[String] {
        self.design_decisions.as_deref().unwrap_or(&[])
    }

    pub fn best_practices(&self) -> &[String] {
        self.best_practices.as_deref().unwrap_or(&[])
    }

    /// Raw text kept when the model's answer could not be parsed.
    pub fn raw_content(&self) -> Option<&str> {
        self.extra.get("content").and_then(Value::as_str)
    }

    /// True when none of the known sections are present.
    pub fn is_degraded(&self) -> bool {
        self.architecture_overview.is_none()
            && self.components.is_none()
            && self.diagram_description.is_none()
            && self.design_decisions.is_none()
            && self.best_practices.is_none()
    }
}

fn take_or_stash<T: DeserializeOwned>(
    slot: &mut Option<T>,
    extra: &mut Extra,
    key: String,
    value: Value,
) {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => *slot = Some(parsed),
        Err(_) => {
            extra.insert(key, value);
        }
    }
}

/// `{"content": text}`, the shape used for unparsable model output.
pub fn content_map(text: String) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("content".to_string(), Value::String(text));
    map
}

/// JSON schema of `Architecture`, embedded into generation prompts.
pub fn architecture_schema() -> String {
    let schema = schemars::schema_for!(Architecture);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Component {
    #[serde(default)]
    pub name: String,
    /// One of the service type tags, e.g. "Lambda", "RDS", "S3"
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Component {
    /// Catalog entry for `service_type`, falling back to EC2 for unknown tags.
    pub fn service(&self) -> ServiceType {
        ServiceType::resolve(&self.service_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DiagramDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<Edge>>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl DiagramDescription {
    pub fn nodes(&self) -> &[Node] {
        self.nodes.as_deref().unwrap_or(&[])
    }

    pub fn connections(&self) -> &[Edge] {
        self.connections.as_deref().unwrap_or(&[])
    }
}

/// A diagram node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    /// Service type tag, same catalog as `Component::service_type`
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Node {
    pub fn service(&self) -> ServiceType {
        ServiceType::resolve(&self.node_type)
    }
}

/// A diagram connection between two node ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Edge {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ServiceType {
    #[default]
    Ec2,
    Lambda,
    Ecs,
    Fargate,
    Eks,
    ElasticBeanstalk,
    Rds,
    DynamoDb,
    ElastiCache,
    Aurora,
    Redshift,
    Vpc,
    Elb,
    Alb,
    Nlb,
    CloudFront,
    Route53,
    ApiGateway,
    S3,
    Efs,
    Ebs,
    Iam,
    Cognito,
    Waf,
    Shield,
    Sqs,
    Sns,
    EventBridge,
    CloudWatch,
    CloudTrail,
    CloudFormation,
}

impl ServiceType {
    pub const ALL: [ServiceType; 31] = [
        ServiceType::Ec2,
        ServiceType::Lambda,
        ServiceType::Ecs,
        ServiceType::Fargate,
        ServiceType::Eks,
        ServiceType::ElasticBeanstalk,
        ServiceType::Rds,
        ServiceType::DynamoDb,
        ServiceType::ElastiCache,
        ServiceType::Aurora,
        ServiceType::Redshift,
        ServiceType::Vpc,
        ServiceType::Elb,
        ServiceType::Alb,
        ServiceType::Nlb,
        ServiceType::CloudFront,
        ServiceType::Route53,
        ServiceType::ApiGateway,
        ServiceType::S3,
        ServiceType::Efs,
        ServiceType::Ebs,
        ServiceType::Iam,
        ServiceType::Cognito,
        ServiceType::Waf,
        ServiceType::Shield,
        ServiceType::Sqs,
        ServiceType::Sns,
        ServiceType::EventBridge,
        ServiceType::CloudWatch,
        ServiceType::CloudTrail,
        ServiceType::CloudFormation,
    ];

    /// `ALL` ordered by tag length, longest first, so "ElasticBeanstalk"
    /// is matched before the shorter tags it contains.
    const LONGEST_FIRST: [ServiceType; 31] = [
        ServiceType::ElasticBeanstalk,
        ServiceType::CloudFormation,
        ServiceType::ElastiCache,
        ServiceType::EventBridge,
        ServiceType::CloudFront,
        ServiceType::ApiGateway,
        ServiceType::CloudWatch,
        ServiceType::CloudTrail,
        ServiceType::DynamoDb,
        ServiceType::Redshift,
        ServiceType::Fargate,
        ServiceType::Route53,
        ServiceType::Cognito,
        ServiceType::Lambda,
        ServiceType::Aurora,
        ServiceType::Shield,
        ServiceType::Ec2,
        ServiceType::Ecs,
        ServiceType::Eks,
        ServiceType::Rds,
        ServiceType::Vpc,
        ServiceType::Elb,
        ServiceType::Alb,
        ServiceType::Nlb,
        ServiceType::Efs,
        ServiceType::Ebs,
        ServiceType::Iam,
        ServiceType::Waf,
        ServiceType::Sqs,
        ServiceType::Sns,
        ServiceType::S3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Ec2 => "EC2",
            ServiceType::Lambda => "Lambda",
            ServiceType::Ecs => "ECS",
            ServiceType::Fargate => "Fargate",
            ServiceType::Eks => "EKS",
            ServiceType::ElasticBeanstalk => "ElasticBeanstalk",
            ServiceType::Rds => "RDS",
            ServiceType::DynamoDb => "Dynamodb",
            ServiceType::ElastiCache => "ElastiCache",
            ServiceType::Aurora => "Aurora",
            ServiceType::Redshift => "Redshift",
            ServiceType::Vpc => "VPC",
            ServiceType::Elb => "ELB",
            ServiceType::Alb => "ALB",
            ServiceType::Nlb => "NLB",
            ServiceType::CloudFront => "CloudFront",
            ServiceType::Route53 => "Route53",
            ServiceType::ApiGateway => "APIGateway",
            ServiceType::S3 => "S3",
            ServiceType::Efs => "EFS",
            ServiceType::Ebs => "EBS",
            ServiceType::Iam => "IAM",
            ServiceType::Cognito => "Cognito",
            ServiceType::Waf => "WAF",
            ServiceType::Shield => "Shield",
            ServiceType::Sqs => "SQS",
            ServiceType::Sns => "SNS",
            ServiceType::EventBridge => "Eventbridge",
            ServiceType::CloudWatch => "Cloudwatch",
            ServiceType::CloudTrail => "Cloudtrail",
            ServiceType::CloudFormation => "Cloudformation",
        }
    }

    /// Exact tag, then case-insensitive tag, then a tag contained in the
    /// input ignoring spaces and dashes (e.g. "Amazon S3 bucket",
    /// "API Gateway"). Anything else is EC2.
    pub fn resolve(tag: &str) -> ServiceType {
        let tag = tag.trim();
        if let Some(t) = Self::ALL.iter().find(|t| t.as_str() == tag) {
            return *t;
        }
        let lower = tag.to_lowercase();
        if let Some(t) = Self::ALL.iter().find(|t| t.as_str().to_lowercase() == lower) {
            return *t;
        }
        let squashed: String = lower
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect();
        if let Some(t) = Self::LONGEST_FIRST
            .iter()
            .find(|t| squashed.contains(&t.as_str().to_lowercase()))
        {
            return *t;
        }
        if !tag.is_empty() {
            tracing::debug!(service_type = tag, "unknown service type, using EC2");
        }
        ServiceType::default()
    }

    /// Comma-separated catalog, for prompts.
    pub fn catalog() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule that an architecture failed, with the evaluator's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    #[serde(default)]
    pub description: String,
    pub reason: String,
}

// --- Storage ---

/// Resolve the global data directory (~/.archbot/).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".archbot")
}

// --- AI Settings ---

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub max_iterations: u32,
    pub timeout_secs: u64,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            provider: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout_secs: 120,
            temperature: 0.7,
            rules_dir: None,
        }
    }
}

impl Settings {
    /// Directory holding the `*.md` rule files.
    pub fn rules_path(&self) -> PathBuf {
        self.rules_dir
            .clone()
            .unwrap_or_else(|| data_dir().join("rules"))
    }
}

pub const API_KEY_ENV: &str = "ARCHBOT_API_KEY";

fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Read settings from disk. A missing or corrupt file yields defaults;
/// `ARCHBOT_API_KEY` overrides the stored key.
pub fn read_settings() -> Settings {
    let path = settings_path();
    let mut settings: Settings = if path.exists() {
        match fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(Error::from))
        {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable settings: {e}");
                Settings::default()
            }
        }
    } else {
        Settings::default()
    };
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.is_empty() {
            settings.api_key = key;
        }
    }
    settings
}

pub fn write_settings(settings: &Settings) -> Result<(), Error> {
    let dir = data_dir();
    fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(settings_path(), json)?;
    Ok(())
}

pub fn ai_configured(settings: &Settings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}
