//! Bounded prompt assembly for the generation call. Only the most recent
//! turns and the accumulated fact summary are included, never the full
//! history, to bound cost and latency.

use frontdesk_core::governance::CaptureGoal;
use frontdesk_core::memory::ConversationMemory;

/// Recent-turn window included in every generation prompt.
pub const MAX_CONTEXT_TURNS: usize = 6;

const ACTION_SCHEMA: &str = r#"Respond with JSON only, matching exactly:
{
  "utterance": "<what to say next, one or two short sentences>",
  "action": {"kind": "continue"}
          | {"kind": "ask_field", "field": "<field id>"}
          | {"kind": "book"}
          | {"kind": "escalate", "reason": "<why>"}
          | {"kind": "close"},
  "facts": [{"field": "<field id>", "value": "<value>", "confidence": 0.0-1.0}]
}"#;

pub fn build_decision_prompt(
    memory: &ConversationMemory,
    company_context: &str,
    capture_target: Option<&CaptureGoal>,
) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("You are the phone front desk for a service-trade business.\n");
    prompt.push_str(company_context);
    prompt.push('\n');

    let facts = memory.fact_summary();
    if facts.is_empty() {
        prompt.push_str("\nNo facts captured yet.\n");
    } else {
        prompt.push_str("\nFacts captured so far:\n");
        prompt.push_str(&facts);
        prompt.push('\n');
    }

    let window_start = memory.turns.len().saturating_sub(MAX_CONTEXT_TURNS);
    if window_start > 0 {
        prompt.push_str(&format!("\n({} earlier turns omitted)\n", window_start));
    }
    prompt.push_str("\nRecent conversation:\n");
    for turn in &memory.turns[window_start..] {
        prompt.push_str(&format!("Caller: {}\n", turn.caller_input.raw));
        prompt.push_str(&format!("Agent: {}\n", turn.response_text));
    }

    if let Some(goal) = capture_target {
        prompt.push_str(&format!(
            "\nPriority: the `{}` field is still missing. Work it into your next question.\n",
            goal.field
        ));
    }

    prompt.push('\n');
    prompt.push_str(ACTION_SCHEMA);
    prompt
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use frontdesk_core::domain::call::{CallId, CompanyId};
    use frontdesk_core::domain::turn::{CallerInput, HandlerChoice, HandlerKind};
    use frontdesk_core::governance::GovernanceConfig;
    use frontdesk_core::memory::ConversationMemory;

    use super::{build_decision_prompt, MAX_CONTEXT_TURNS};

    fn memory_with_turns(count: usize) -> ConversationMemory {
        let mut memory = ConversationMemory::new(
            CallId("CA-1".to_string()),
            CompanyId("co-1".to_string()),
            None,
            &GovernanceConfig::default().capture,
            Utc::now(),
        );
        for n in 1..=count {
            memory.start_turn(n as u32, Utc::now()).expect("open turn");
            let builder = memory.open_turn_mut().expect("turn open");
            builder.set_caller_input(CallerInput::from_raw(format!("utterance {n}"), 1.0));
            builder.set_routing(HandlerChoice::new(HandlerKind::Llm));
            memory.commit_turn(format!("reply {n}"), 10).expect("commit");
        }
        memory
    }

    #[test]
    fn prompt_includes_only_the_recent_turn_window() {
        let memory = memory_with_turns(MAX_CONTEXT_TURNS + 4);
        let prompt = build_decision_prompt(&memory, "Acme Plumbing, 24/7.", None);

        assert!(prompt.contains("utterance 10"));
        assert!(!prompt.contains("utterance 1\n"), "oldest turns must be omitted");
        assert!(prompt.contains("4 earlier turns omitted"));
        assert!(prompt.contains("Respond with JSON only"));
    }

    #[test]
    fn capture_target_is_called_out() {
        let memory = memory_with_turns(1);
        let goal = GovernanceConfig::default().capture.must[0].clone();
        let prompt = build_decision_prompt(&memory, "Acme.", Some(&goal));
        assert!(prompt.contains("`caller_name` field is still missing"));
    }
}
