use archbot_core::Architecture;

use crate::engine::GenerationRequest;

const OVERVIEW_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub user_input: String,
    pub architecture: Architecture,
}

/// In-memory chat history for one design session.
///
/// Follow-up requests are sent as `RequestKind::Adjust` with the history and
/// the current architecture as context.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    interactions: Vec<Interaction>,
}

impl Conversation {
    pub fn new() -> Self {
        Conversation::default()
    }

    pub fn record(&mut self, user_input: impl Into<String>, architecture: Architecture) {
        self.interactions.push(Interaction {
            user_input: user_input.into(),
            architecture,
        });
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn current_architecture(&self) -> Option<&Architecture> {
        self.interactions.last().map(|i| &i.architecture)
    }

    /// Next request for `user_input`: a fresh generation when nothing has
    /// been designed yet, otherwise an adjustment of the current design.
    pub fn next_request(&self, user_input: &str) -> GenerationRequest {
        match self.current_architecture() {
            None => GenerationRequest::generate(user_input),
            Some(current) => GenerationRequest::adjust(self.adjustment_context(current, user_input)),
        }
    }

    fn adjustment_context(&self, current: &Architecture, user_input: &str) -> String {
        let mut out = String::from("## Conversation so far\n");
        for (i, interaction) in self.interactions.iter().enumerate() {
            out.push_str(&format!("Interaction {}:\n", i + 1));
            out.push_str(&format!("User: {}\n", interaction.user_input));
            if let Some(overview) = &interaction.architecture.architecture_overview {
                out.push_str("Architecture overview: ");
                out.push_str(&preview(overview));
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str("## Current architecture\n```json\n");
        out.push_str(&current.to_pretty_json());
        out.push_str("\n```\n\n## New adjustment request\n");
        out.push_str(user_input);
        out
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= OVERVIEW_PREVIEW_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(OVERVIEW_PREVIEW_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RequestKind;
    use serde_json::json;

    #[test]
    fn first_request_generates() {
        let conv = Conversation::new();
        let req = conv.next_request("a video platform");
        assert_eq!(req.kind, RequestKind::Generate);
        assert_eq!(req.text, "a video platform");
    }

    #[test]
    fn follow_up_adjusts_with_history() {
        let mut conv = Conversation::new();
        let long = "é".repeat(300);
        conv.record(
            "a video platform",
            Architecture::from_value(json!({"architecture_overview": long})),
        );
        let req = conv.next_request("add a CDN");
        assert_eq!(req.kind, RequestKind::Adjust);
        assert!(req.text.contains("Interaction 1:\nUser: a video platform"));
        assert!(req.text.contains(&format!("{}...", "é".repeat(200))));
        assert!(req.text.ends_with("## New adjustment request\nadd a CDN"));
    }
}
