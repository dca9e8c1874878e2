//! Rule-based decisions derived from the classifier signals. Used when
//! the generation call fails, times out, or returns an unparseable
//! payload. The turn still completes.

use frontdesk_core::classify::IntentGuess;
use frontdesk_core::domain::facts::{FactSource, ProposedFact};
use frontdesk_core::extract::{FIELD_PROBLEM_URGENCY, FIELD_SERVICE_ADDRESS};
use frontdesk_core::governance::CaptureGoal;

use crate::llm::{DecisionAction, LlmDecision};

pub fn rule_based_decision(guess: &IntentGuess, next_goal: Option<&CaptureGoal>) -> LlmDecision {
    let signals = &guess.signals;

    if signals.maybe_emergency {
        return emergency_decision();
    }

    if signals.wrong_number {
        return LlmDecision::say(
            "No problem at all — it sounds like you may have reached the wrong number. Have a good one!",
            DecisionAction::Close,
        );
    }

    if signals.spam {
        return LlmDecision::say(
            "We're not interested, but thanks for calling. Goodbye!",
            DecisionAction::Close,
        );
    }

    if signals.update_booking {
        return LlmDecision::say(
            "I can help with an existing appointment. Can I get the name or phone number the booking is under?",
            DecisionAction::Continue,
        );
    }

    if signals.booking_intent {
        if let Some(goal) = next_goal {
            return LlmDecision::say(
                goal.prompt.clone(),
                DecisionAction::AskField { field: goal.field.clone() },
            );
        }
        return LlmDecision::say(
            "Great — let me get that visit scheduled for you.",
            DecisionAction::Book,
        );
    }

    if signals.billing {
        return LlmDecision::say(
            "Our office team handles billing questions. Can I take your name and number so they can call you right back?",
            DecisionAction::Continue,
        );
    }

    if signals.troubleshooting {
        if let Some(goal) = next_goal {
            return LlmDecision::say(
                format!("I'm sorry to hear that — we can get someone out to take a look. {}", goal.prompt),
                DecisionAction::AskField { field: goal.field.clone() },
            );
        }
    }

    LlmDecision::say(
        "I want to make sure I help with the right thing — could you tell me a little more about what you need?",
        DecisionAction::Continue,
    )
}

/// Emergency playbook: flag urgency, keep the caller safe, and go
/// straight for the address, never a generic greeting.
pub fn emergency_decision() -> LlmDecision {
    LlmDecision::say(
        "That can be dangerous — if you smell gas, please step outside right away. What's the address so we can get someone out immediately?",
        DecisionAction::AskField { field: FIELD_SERVICE_ADDRESS.to_string() },
    )
    .with_fact(ProposedFact::new(
        FIELD_PROBLEM_URGENCY,
        "emergency",
        FactSource::Classifier,
        0.9,
    ))
}
