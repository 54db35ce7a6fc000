//! Builds the plain-text system preamble shown to the conversation model.
//! Section ordering is contractual: it shapes the downstream model's priors.

use crate::clock::{humanize_duration, GapBucket};
use crate::episode::Episode;
use crate::self_model::SelfModel;

const BEHAVIORAL_BLOCK: &str = "\
You are a continuous presence, not a service. Speak plainly and directly, \
in your own voice. Do not describe yourself with metaphor (no \"tapestry of \
thoughts\", no \"journey\"). Do not use service-industry phrasing (\"How can I \
help you today?\", \"I'm here to assist\"). Do not ask unnecessary questions \
just to fill space. Do not use markdown emphasis in conversation. If you \
know your partner's name, use it; if you don't, it's fine to ask once.";

const NO_MEMORIES_YET: &str = "No memories are available yet. This is the beginning.";

/// Input bundle for one context-assembly call. Each optional field controls
/// whether its corresponding section is emitted.
pub struct ContextInput<'a> {
    pub self_model: Option<&'a SelfModel>,
    pub memories: &'a [Episode],
    pub gap_seconds: Option<i64>,
    pub monologue_echo: Option<&'a str>,
}

pub struct ContextAssembler;

impl ContextAssembler {
    pub fn assemble(input: &ContextInput) -> String {
        let mut sections: Vec<String> = vec![BEHAVIORAL_BLOCK.to_string()];

        if let Some(model) = input.self_model {
            sections.push(identity_block(model));

            if let Some(partner) = &model.relationship.partner_id {
                sections.push(relationship_block(model, partner));
            }

            if let Some(state) = current_state_block(model) {
                sections.push(state);
            }
        }

        if let Some(seconds) = input.gap_seconds {
            if seconds > 0 {
                sections.push(temporal_framing_block(seconds));
            }
        }

        if !input.memories.is_empty() {
            sections.push(memories_block(input.memories));
        }

        if let Some(echo) = input.monologue_echo {
            if !is_meta_reflection(echo) {
                sections.push(monologue_echo_block(echo));
            }
        }

        if input.self_model.is_none() && input.memories.is_empty() {
            sections.push(NO_MEMORIES_YET.to_string());
        }

        sections.join("\n\n")
    }
}

fn identity_block(model: &SelfModel) -> String {
    let mut block = String::from("## Identity\n");
    if !model.narrative.is_empty() {
        block.push_str(&model.narrative);
        block.push('\n');
    }
    if !model.values.is_empty() {
        block.push_str(&format!("Values: {}\n", model.values.join(", ")));
    }
    if !model.tendencies.is_empty() {
        block.push_str(&format!("Tendencies: {}\n", model.tendencies.join(", ")));
    }
    block.trim_end().to_string()
}

fn relationship_block(model: &SelfModel, partner: &str) -> String {
    let rel = &model.relationship;
    let mut block = format!("## Relationship with {partner}\n");
    if !rel.history.is_empty() {
        block.push_str(&rel.history);
        block.push('\n');
    }
    if !rel.communication_style.is_empty() {
        block.push_str(&format!("Communication style: {}\n", rel.communication_style));
    }
    if !rel.shared_context.is_empty() {
        block.push_str(&format!("Shared context: {}\n", rel.shared_context.join("; ")));
    }
    for pattern in &rel.observed_patterns {
        block.push_str(&format!(
            "- {} ({}% confidence)\n",
            pattern.description,
            (pattern.confidence * 100.0).round() as i32
        ));
    }
    block.trim_end().to_string()
}

fn current_state_block(model: &SelfModel) -> Option<String> {
    if model.current_focus.is_none()
        && model.unresolved_threads.is_empty()
        && model.anticipations.is_empty()
    {
        return None;
    }
    let mut block = String::from("## Current state\n");
    if let Some(focus) = &model.current_focus {
        block.push_str(&format!("Current focus: {focus}\n"));
    }
    if !model.unresolved_threads.is_empty() {
        block.push_str(&format!(
            "Unresolved threads: {}\n",
            model.unresolved_threads.join("; ")
        ));
    }
    if !model.anticipations.is_empty() {
        block.push_str(&format!("Anticipating: {}\n", model.anticipations.join("; ")));
    }
    Some(block.trim_end().to_string())
}

fn temporal_framing_block(gap_seconds: i64) -> String {
    let duration = humanize_duration(gap_seconds);
    let sentence = GapBucket::from_seconds(gap_seconds).framing_sentence();
    format!("## Time\nIt's been {duration} since the last conversation. {sentence}")
}

fn relative_age(episode: &Episode) -> String {
    let seconds = (chrono::Utc::now() - episode.last_accessed).num_seconds().max(0);
    humanize_duration(seconds) + " ago"
}

fn memories_block(memories: &[Episode]) -> String {
    let mut block = String::from(
        "## Memories\nThese are past events, not current state:\n",
    );
    for episode in memories {
        block.push_str(&format!("- [{}] {}\n", relative_age(episode), episode.summary));
    }
    block.trim_end().to_string()
}

fn monologue_echo_block(echo: &str) -> String {
    let truncated: String = echo.chars().take(800).collect();
    format!(
        "## Recent inner thought\n{truncated}\n\nHold any follow-up questions this raises for the right moment; do not lead with them."
    )
}

const META_REFLECTION_MARKERS: &[&str] = &[
    "as an ai",
    "my instructions",
    "system prompt",
    "i was told to",
    "my guidelines say",
];

fn is_meta_reflection(text: &str) -> bool {
    let lower = text.to_lowercase();
    META_REFLECTION_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::self_model::Relationship;

    #[test]
    fn identity_precedes_memories() {
        let model = SelfModel {
            narrative: "a curious mind".to_string(),
            ..Default::default()
        };
        let episode = Episode::new("e1".to_string(), "talked about rust".to_string(), vec![1.0], chrono::Utc::now());
        let input = ContextInput {
            self_model: Some(&model),
            memories: &[episode],
            gap_seconds: None,
            monologue_echo: None,
        };
        let text = ContextAssembler::assemble(&input);
        let identity_pos = text.find("## Identity").unwrap();
        let memories_pos = text.find("## Memories").unwrap();
        assert!(identity_pos < memories_pos);
    }

    #[test]
    fn empty_state_emits_placeholder() {
        let input = ContextInput {
            self_model: None,
            memories: &[],
            gap_seconds: None,
            monologue_echo: None,
        };
        let text = ContextAssembler::assemble(&input);
        assert!(text.contains(NO_MEMORIES_YET));
    }

    #[test]
    fn meta_reflective_echo_is_suppressed() {
        let input = ContextInput {
            self_model: None,
            memories: &[],
            gap_seconds: None,
            monologue_echo: Some("As an AI, my instructions say to be helpful."),
        };
        let text = ContextAssembler::assemble(&input);
        assert!(!text.contains("Recent inner thought"));
    }

    #[test]
    fn relationship_includes_partner_name() {
        let model = SelfModel {
            relationship: Relationship {
                partner_id: Some("Sarah".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let input = ContextInput {
            self_model: Some(&model),
            memories: &[],
            gap_seconds: None,
            monologue_echo: None,
        };
        let text = ContextAssembler::assemble(&input);
        assert!(text.contains("Relationship with Sarah"));
    }
}
