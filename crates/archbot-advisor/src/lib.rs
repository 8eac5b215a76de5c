//! Architecture generation and the validate-and-improve loop.
//!
//! A generated architecture is checked against every loaded rule (one model
//! call per rule). Violations are turned into a repair prompt and sent back
//! to the model, up to a fixed number of rounds.

pub mod engine;
pub mod evaluate;
pub mod improve;
pub mod parse;
pub mod prompt;
pub mod session;

pub use engine::{GatewayError, GenerationRequest, LlmGateway, ModelGateway, ModelOutput, RequestKind};
pub use evaluate::{Evaluation, RuleEvaluator};
pub use improve::{
    ChannelSink, DesignError, Outcome, ProgressSink, StopReason, ValidateError, Validator,
    VALIDATION_WARNINGS_KEY,
};
pub use session::Conversation;
