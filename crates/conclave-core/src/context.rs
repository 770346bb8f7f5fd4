//! Prompt building for agents, the manager's planner and its synthesizer

use tracing::debug;

use crate::agents::profile::DelegationStrategy;
use crate::agents::registry::Persona;
use crate::orchestrator::{PLAN_MARKER, Task};
use crate::providers::ChatMessage;
use crate::retrieval::Passage;
use crate::types::{Message, Sender};

/// System prompt for a conversation or RAG turn
pub fn build_system_prompt(persona: &str, passages: &[Passage]) -> String {
    let mut prompt = String::new();

    if !persona.is_empty() {
        prompt.push_str(persona);
        prompt.push_str("\n\n");
    }

    if !passages.is_empty() {
        prompt.push_str("# CONTEXT\n\n");
        prompt.push_str("Use the following context to help answer the question:\n\n");
        let joined = passages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        prompt.push_str(&joined);
        prompt.push_str("\n\n");
    }

    prompt.push_str("# CURRENT TIME\n\n");
    prompt.push_str(&chrono::Utc::now().to_rfc3339());
    prompt.push('\n');

    debug!("Built system prompt ({} chars)", prompt.len());
    prompt
}

/// System prompt asking the manager for reasoning and a task plan
pub fn build_planning_prompt(
    persona: &str,
    delegates: &[Persona],
    strategy: DelegationStrategy,
) -> String {
    let mut prompt = String::new();
    if !persona.is_empty() {
        prompt.push_str(persona);
        prompt.push_str("\n\n");
    }

    prompt.push_str(
        "You break complex requests into smaller subtasks and delegate each one \
         to the specialized agent best suited for it.\n\n",
    );

    prompt.push_str("# AGENTS\n\n");
    if delegates.is_empty() {
        prompt.push_str("No agent profiles are available. Answer the request yourself.\n");
    }
    for d in delegates {
        prompt.push_str(&format!("- {}: {}", d.name, d.description));
        if !d.persona.is_empty() {
            prompt.push_str(&format!(" ({})", d.persona));
        }
        prompt.push('\n');
    }

    prompt.push_str("\n# INSTRUCTIONS\n\n");
    prompt.push_str("First explain your reasoning. Then write the marker ");
    prompt.push_str(PLAN_MARKER);
    prompt.push_str(" followed by a JSON array of subtasks:\n\n");
    prompt.push_str("```json\n[\n  {\"title\": \"Short title\", \"instruction\": \"What the agent must do\", \"agent\": \"profile_name\"}\n]\n```\n\n");
    prompt.push_str("If the request needs no delegation, reply with the answer itself and no task plan.\n");
    match strategy {
        DelegationStrategy::Specified => {
            prompt.push_str("Use the exact profile names listed above for \"agent\".\n")
        }
        DelegationStrategy::Automatic => prompt.push_str(
            "\"agent\" may be a profile name or a short description of the skill needed.\n",
        ),
    }

    debug!("Built planning prompt ({} chars)", prompt.len());
    prompt
}

/// System prompt and user message for the synthesis call
pub fn build_synthesis_prompt(persona: &str, request: &str, tasks: &[Task]) -> (String, String) {
    let mut system = String::new();
    if !persona.is_empty() {
        system.push_str(persona);
        system.push_str("\n\n");
    }
    system.push_str(
        "Your agents have finished working on the user's request. Combine their \
         results into a single direct answer. Mention any subtask that failed.\n",
    );

    let mut user = format!("Request: {}\n\nResults:\n", request);
    for (i, task) in tasks.iter().enumerate() {
        user.push_str(&format!(
            "\n{}. {} [{}] ({})\n{}\n",
            i + 1,
            task.title,
            task.agent.as_deref().unwrap_or("none"),
            task.status,
            task.output()
        ));
    }
    (system, user)
}

/// Session history as provider messages
pub fn history_messages(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| match m.sender {
            Sender::User => ChatMessage::user(m.text.clone()),
            Sender::Agent => ChatMessage::assistant(m.text.clone()),
        })
        .collect()
}
