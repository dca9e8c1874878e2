//! Deterministic field extraction from one caller utterance. Produces
//! proposed fact writes; governance decides what actually lands.

use crate::domain::facts::{FactSource, ProposedFact};
use crate::domain::turn::CallerInput;

pub const FIELD_CALLER_NAME: &str = "caller_name";
pub const FIELD_CALLBACK_NUMBER: &str = "callback_number";
pub const FIELD_SERVICE_ADDRESS: &str = "service_address";
pub const FIELD_PROBLEM_SUMMARY: &str = "problem_summary";
pub const FIELD_PROBLEM_URGENCY: &str = "problem_urgency";
pub const FIELD_TIME_PREFERENCE: &str = "time_preference";
pub const FIELD_ACCESS_NOTES: &str = "access_notes";

const NAME_MARKERS: [&str; 4] = ["my name is", "this is", "name's", "i'm"];

const STREET_SUFFIXES: [&str; 16] = [
    "street", "st", "avenue", "ave", "road", "rd", "drive", "dr", "lane", "ln", "boulevard",
    "blvd", "court", "ct", "way", "circle",
];

const TIME_PATTERNS: [&str; 16] = [
    "right now",
    "as soon as possible",
    "asap",
    "today",
    "tonight",
    "tomorrow morning",
    "tomorrow afternoon",
    "tomorrow",
    "this morning",
    "this afternoon",
    "this evening",
    "this week",
    "next week",
    "monday",
    "saturday",
    "weekend",
];

const PROBLEM_MARKERS: [&str; 10] = [
    "not working",
    "stopped working",
    "won't turn on",
    "wont turn on",
    "broken",
    "leaking",
    "no hot water",
    "no heat",
    "making a noise",
    "keeps tripping",
];

#[derive(Clone, Debug, Default)]
pub struct FieldExtractor;

impl FieldExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, input: &CallerInput) -> Vec<ProposedFact> {
        let cleaned = input.cleaned.as_str();
        let mut proposed = Vec::new();

        if let Some(name) = extract_name(&input.raw, cleaned) {
            proposed.push(ProposedFact::new(FIELD_CALLER_NAME, name, FactSource::Extraction, 0.85));
        }
        if let Some(number) = extract_phone_number(&input.raw) {
            proposed.push(ProposedFact::new(
                FIELD_CALLBACK_NUMBER,
                number,
                FactSource::Extraction,
                0.95,
            ));
        }
        if let Some(address) = extract_address(&input.raw) {
            proposed.push(ProposedFact::new(
                FIELD_SERVICE_ADDRESS,
                address,
                FactSource::Extraction,
                0.8,
            ));
        }
        if let Some(problem) = extract_problem(cleaned) {
            proposed.push(ProposedFact::new(
                FIELD_PROBLEM_SUMMARY,
                problem,
                FactSource::Extraction,
                0.6,
            ));
        }
        if let Some(preference) = extract_time_preference(cleaned) {
            proposed.push(ProposedFact::new(
                FIELD_TIME_PREFERENCE,
                preference,
                FactSource::Extraction,
                0.8,
            ));
        }

        proposed
    }
}

fn extract_name(raw: &str, cleaned: &str) -> Option<String> {
    let marker = NAME_MARKERS.iter().find(|marker| cleaned.contains(**marker))?;
    // Locate the marker in the raw text case-insensitively so the captured
    // tokens keep their original casing.
    let lower_raw = raw.to_lowercase();
    let marker_start = lower_raw.find(marker)?;
    let after = &raw[marker_start + marker.len()..];

    let tokens = after
        .split_whitespace()
        .map(|token| token.trim_matches(|character: char| !character.is_alphabetic()))
        .take_while(|token| {
            !token.is_empty() && token.chars().next().is_some_and(char::is_uppercase)
        })
        .take(2)
        .collect::<Vec<_>>();

    if tokens.is_empty() {
        return None;
    }
    Some(tokens.join(" "))
}

fn extract_phone_number(raw: &str) -> Option<String> {
    let mut digits = String::new();
    let mut best: Option<String> = None;
    for character in raw.chars() {
        if character.is_ascii_digit() {
            digits.push(character);
        } else if !matches!(character, ' ' | '-' | '(' | ')' | '.') {
            promote_candidate(&mut best, &mut digits);
        }
    }
    promote_candidate(&mut best, &mut digits);
    best
}

fn promote_candidate(best: &mut Option<String>, digits: &mut String) {
    // North-American numbers only: 10 digits, or 11 with a leading 1.
    let candidate = match digits.len() {
        10 => Some(digits.clone()),
        11 if digits.starts_with('1') => Some(digits[1..].to_string()),
        _ => None,
    };
    if let Some(candidate) = candidate {
        if best.is_none() {
            *best = Some(format!(
                "({}) {}-{}",
                &candidate[0..3],
                &candidate[3..6],
                &candidate[6..10]
            ));
        }
    }
    digits.clear();
}

fn extract_address(raw: &str) -> Option<String> {
    let tokens = raw.split_whitespace().collect::<Vec<_>>();
    let start = tokens.iter().position(|token| {
        token.len() <= 6 && !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit())
    })?;

    // Street suffix must appear within a short window after the number.
    let window_end = (start + 6).min(tokens.len());
    let suffix_index = (start + 1..window_end).find(|index| {
        let normalized = tokens[*index]
            .trim_matches(|character: char| !character.is_alphanumeric())
            .to_lowercase();
        STREET_SUFFIXES.contains(&normalized.as_str())
    })?;

    let address = tokens[start..=suffix_index]
        .iter()
        .map(|token| token.trim_matches(|character: char| matches!(character, ',' | '.')))
        .collect::<Vec<_>>()
        .join(" ");
    Some(address)
}

fn extract_problem(cleaned: &str) -> Option<String> {
    PROBLEM_MARKERS.iter().any(|marker| cleaned.contains(marker)).then(|| {
        let mut summary = cleaned.to_string();
        if summary.len() > 160 {
            summary.truncate(160);
        }
        summary
    })
}

fn extract_time_preference(cleaned: &str) -> Option<String> {
    TIME_PATTERNS
        .iter()
        .find(|pattern| cleaned.contains(**pattern))
        .map(|pattern| (*pattern).to_string())
}
