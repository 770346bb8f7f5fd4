//! Serializes a manager run into the text protocol
//! the display layer parses:
//!
//! ```text
//! <synthesis>
//!
//! # Thinking Process
//! <thinking>
//!
//! # Task Results
//! ## Task 1: <title>
//! Status: <success|failed>
//! Agent: <profile>
//! Result: <text>
//! ```

use crate::orchestrator::{ManagerRun, Task, TaskStatus};

pub const THINKING_HEADER: &str = "# Thinking Process";
pub const RESULTS_HEADER: &str = "# Task Results";

pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn format(run: &ManagerRun) -> String {
        let mut sections: Vec<String> = Vec::new();

        let synthesis = run.synthesis.trim();
        if !synthesis.is_empty() {
            sections.push(synthesis.to_string());
        }

        if run.show_thinking
            && let Some(thinking) = run.thinking.as_deref().map(str::trim)
            && !thinking.is_empty()
        {
            sections.push(format!("{}\n{}", THINKING_HEADER, thinking));
        }

        if !run.tasks.is_empty() {
            let blocks: Vec<String> = run
                .tasks
                .iter()
                .enumerate()
                .map(|(i, task)| Self::task_block(i + 1, task))
                .collect();
            sections.push(format!("{}\n{}", RESULTS_HEADER, blocks.join("\n")));
        }

        sections.join("\n\n")
    }

    fn task_block(n: usize, task: &Task) -> String {
        // Only terminal states are reported
        let status = match task.status {
            TaskStatus::Success => TaskStatus::Success,
            _ => TaskStatus::Failed,
        };
        format!(
            "## Task {}: {}\nStatus: {}\nAgent: {}\nResult: {}",
            n,
            single_line(&task.title),
            status,
            task.display_agent(),
            task.output().trim_end()
        )
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RunState;

    fn run(show_thinking: bool, thinking: Option<&str>, tasks: Vec<Task>) -> ManagerRun {
        ManagerRun {
            manager: "manager".to_string(),
            request: "req".to_string(),
            state: RunState::Completed,
            plan_text: String::new(),
            thinking: thinking.map(str::to_string),
            show_thinking,
            tasks,
            synthesis: "Here is the combined answer.".to_string(),
        }
    }

    fn tasks() -> Vec<Task> {
        let mut a = Task::planned(1, "Find policy", "find", "rag");
        a.succeed("rag", "Policy says 25 days.\nSee section 4.");
        let mut b = Task::planned(2, "Astrology", "stars", "astrologer");
        b.fail(None, "no agent available");
        let mut c = Task::planned(3, "Empty", "x", "");
        c.fail(None, "no agent available");
        vec![a, b, c]
    }

    #[test]
    fn test_full_layout() {
        let text = ResponseFormatter::format(&run(true, Some("Split in three."), tasks()));
        let expected = "Here is the combined answer.\n\n\
# Thinking Process\nSplit in three.\n\n\
# Task Results\n\
## Task 1: Find policy\nStatus: success\nAgent: rag\nResult: Policy says 25 days.\nSee section 4.\n\
## Task 2: Astrology\nStatus: failed\nAgent: astrologer\nResult: no agent available\n\
## Task 3: Empty\nStatus: failed\nAgent: none\nResult: no agent available";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_thinking_hidden_when_disabled_or_empty() {
        let text = ResponseFormatter::format(&run(false, Some("secret plan"), tasks()));
        assert!(!text.contains(THINKING_HEADER));
        assert!(!text.contains("secret plan"));

        let text = ResponseFormatter::format(&run(true, Some("   "), tasks()));
        assert!(!text.contains(THINKING_HEADER));

        let text = ResponseFormatter::format(&run(true, None, tasks()));
        assert!(!text.contains(THINKING_HEADER));
    }

    #[test]
    fn test_block_count_matches_tasks() {
        let text = ResponseFormatter::format(&run(true, None, tasks()));
        assert_eq!(text.matches("## Task ").count(), 3);
        let first = text.find("## Task 1:").unwrap();
        let second = text.find("## Task 2:").unwrap();
        let third = text.find("## Task 3:").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_sections_omittable() {
        let mut r = run(true, None, Vec::new());
        assert_eq!(ResponseFormatter::format(&r), "Here is the combined answer.");

        r.synthesis.clear();
        r.tasks = tasks();
        assert!(ResponseFormatter::format(&r).starts_with(RESULTS_HEADER));
    }

    #[test]
    fn test_multiline_title_flattened() {
        let mut t = Task::planned(1, "Two\nlines", "x", "a");
        t.succeed("a", "ok");
        let text = ResponseFormatter::format(&run(false, None, vec![t]));
        assert!(text.contains("## Task 1: Two lines\n"));
    }
}
