//! Cheap, local turn classifier. Runs on every caller utterance before any
//! external call and acts as a safety net independent of the LLM decision.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Emergency,
    WrongNumber,
    Spam,
    BookingRequest,
    UpdateBooking,
    Billing,
    Troubleshooting,
    InfoRequest,
    Unknown,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::WrongNumber => "wrong_number",
            Self::Spam => "spam",
            Self::BookingRequest => "booking_request",
            Self::UpdateBooking => "update_booking",
            Self::Billing => "billing",
            Self::Troubleshooting => "troubleshooting",
            Self::InfoRequest => "info_request",
            Self::Unknown => "unknown",
        }
    }
}

/// Boolean signal map produced alongside the intent guess. Downstream
/// fallback rules branch on these rather than on the single guess.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSignals {
    pub maybe_emergency: bool,
    pub wrong_number: bool,
    pub spam: bool,
    pub booking_intent: bool,
    pub update_booking: bool,
    pub billing: bool,
    pub troubleshooting: bool,
    pub info_request: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentGuess {
    pub intent: IntentKind,
    pub confidence: f32,
    pub signals: IntentSignals,
    pub matched_keywords: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierConfig {
    pub emergency_keywords: Vec<String>,
    pub wrong_number_keywords: Vec<String>,
    pub spam_keywords: Vec<String>,
    pub booking_keywords: Vec<String>,
    pub update_keywords: Vec<String>,
    pub billing_keywords: Vec<String>,
    pub troubleshooting_keywords: Vec<String>,
    pub info_keywords: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            emergency_keywords: keywords(&[
                "smell gas",
                "gas leak",
                "smelling gas",
                "carbon monoxide",
                "flooding",
                "burst pipe",
                "pipe burst",
                "sewage backup",
                "sparking",
                "sparks",
                "smoke",
                "on fire",
                "electrical burning",
            ]),
            wrong_number_keywords: keywords(&[
                "wrong number",
                "who is this",
                "didn't call",
                "did not call",
                "never called",
                "who am i speaking",
            ]),
            spam_keywords: keywords(&[
                "extended warranty",
                "special offer",
                "limited time",
                "free quote for solar",
                "survey",
                "press 1",
            ]),
            booking_keywords: keywords(&[
                "book",
                "appointment",
                "schedule",
                "come out",
                "send someone",
                "send a tech",
                "technician",
                "get someone out",
                "set up a visit",
                "estimate",
            ]),
            update_keywords: keywords(&[
                "reschedule",
                "cancel my appointment",
                "change my appointment",
                "move my appointment",
                "running late",
                "push it back",
            ]),
            billing_keywords: keywords(&[
                "bill",
                "invoice",
                "charged",
                "charge",
                "refund",
                "payment",
                "paid",
            ]),
            troubleshooting_keywords: keywords(&[
                "not working",
                "stopped working",
                "won't turn on",
                "wont turn on",
                "broken",
                "leaking",
                "no hot water",
                "no heat",
                "no cooling",
                "making a noise",
                "error code",
                "keeps tripping",
            ]),
            info_keywords: keywords(&[
                "hours",
                "are you open",
                "how much",
                "price",
                "pricing",
                "cost",
                "do you service",
                "service area",
                "warranty on",
                "licensed",
            ]),
        }
    }
}

fn keywords(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|keyword| (*keyword).to_string()).collect()
}

#[derive(Clone, Debug, Default)]
pub struct TurnClassifier {
    config: ClassifierConfig,
}

impl TurnClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Scan cleaned caller text for the fixed signal categories and return
    /// an intent guess. Purely local string work; no allocation beyond the
    /// matched-keyword list.
    pub fn classify(&self, cleaned: &str) -> IntentGuess {
        let mut matched_keywords = Vec::new();
        let mut matches_in = |keyword_list: &[String]| -> usize {
            let mut count = 0;
            for keyword in keyword_list {
                if cleaned.contains(keyword.as_str()) {
                    matched_keywords.push(keyword.clone());
                    count += 1;
                }
            }
            count
        };

        let emergency = matches_in(&self.config.emergency_keywords);
        let wrong_number = matches_in(&self.config.wrong_number_keywords);
        let spam = matches_in(&self.config.spam_keywords);
        let booking = matches_in(&self.config.booking_keywords);
        let update = matches_in(&self.config.update_keywords);
        let billing = matches_in(&self.config.billing_keywords);
        let troubleshooting = matches_in(&self.config.troubleshooting_keywords);
        let info = matches_in(&self.config.info_keywords);

        let signals = IntentSignals {
            maybe_emergency: emergency > 0,
            wrong_number: wrong_number > 0,
            spam: spam > 0,
            booking_intent: booking > 0,
            update_booking: update > 0,
            billing: billing > 0,
            troubleshooting: troubleshooting > 0,
            info_request: info > 0,
        };

        // Category priority is fixed: safety first, then scripted closes,
        // then revenue-bearing intents, then informational ones.
        let (intent, hits) = if emergency > 0 {
            (IntentKind::Emergency, emergency)
        } else if wrong_number > 0 {
            (IntentKind::WrongNumber, wrong_number)
        } else if spam > 0 {
            (IntentKind::Spam, spam)
        } else if update > 0 {
            (IntentKind::UpdateBooking, update)
        } else if booking > 0 {
            (IntentKind::BookingRequest, booking)
        } else if billing > 0 {
            (IntentKind::Billing, billing)
        } else if troubleshooting > 0 {
            (IntentKind::Troubleshooting, troubleshooting)
        } else if info > 0 {
            (IntentKind::InfoRequest, info)
        } else {
            (IntentKind::Unknown, 0)
        };

        IntentGuess {
            intent,
            confidence: confidence_for(intent, hits),
            signals,
            matched_keywords,
        }
    }
}

fn confidence_for(intent: IntentKind, hits: usize) -> f32 {
    if intent == IntentKind::Unknown {
        return 0.2;
    }
    let base = match intent {
        IntentKind::Emergency | IntentKind::WrongNumber | IntentKind::Spam => 0.8,
        IntentKind::BookingRequest | IntentKind::UpdateBooking => 0.7,
        _ => 0.6,
    };
    let bonus = 0.1 * hits.saturating_sub(1).min(2) as f32;
    (base + bonus).min(0.95)
}

#[cfg(test)]
mod tests {
    use super::{IntentKind, TurnClassifier};

    #[test]
    fn gas_smell_raises_the_emergency_signal() {
        let classifier = TurnClassifier::default();
        let guess = classifier.classify("hi yes i smell gas in my basement");

        assert!(guess.signals.maybe_emergency);
        assert_eq!(guess.intent, IntentKind::Emergency);
        assert!(guess.confidence >= 0.8);
    }

    #[test]
    fn wrong_number_wins_over_weaker_signals() {
        let classifier = TurnClassifier::default();
        let guess = classifier.classify("sorry wrong number who is this");

        assert!(guess.signals.wrong_number);
        assert_eq!(guess.intent, IntentKind::WrongNumber);
    }

    #[test]
    fn booking_language_is_detected_with_troubleshooting_context() {
        let classifier = TurnClassifier::default();
        let guess =
            classifier.classify("my water heater is leaking can you send someone out today");

        assert!(guess.signals.booking_intent);
        assert!(guess.signals.troubleshooting);
        assert_eq!(guess.intent, IntentKind::BookingRequest);
        assert!(guess.confidence >= 0.7);
    }

    #[test]
    fn emergency_outranks_booking_language() {
        let classifier = TurnClassifier::default();
        let guess = classifier.classify("there is a gas leak please send someone");
        assert_eq!(guess.intent, IntentKind::Emergency);
    }

    #[test]
    fn small_talk_is_unknown_with_low_confidence() {
        let classifier = TurnClassifier::default();
        let guess = classifier.classify("uh hello");

        assert_eq!(guess.intent, IntentKind::Unknown);
        assert!(guess.confidence < 0.5);
        assert!(guess.matched_keywords.is_empty());
    }

    #[test]
    fn multiple_hits_in_one_category_raise_confidence() {
        let classifier = TurnClassifier::default();
        let single = classifier.classify("i need an appointment");
        let double = classifier.classify("i need to book an appointment");
        assert!(double.confidence > single.confidence);
    }
}
