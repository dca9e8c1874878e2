use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::IntentKind;
use crate::domain::booking::AppointmentId;
use crate::domain::call::{CallId, CompanyId};
use crate::routing::SourceKind;

/// Terminal disposition of a completed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    BookingCreated,
    Escalated,
    InfoProvided,
    WrongNumber,
    Spam,
    Abandoned,
}

impl CallOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BookingCreated => "booking_created",
            Self::Escalated => "escalated",
            Self::InfoProvided => "info_provided",
            Self::WrongNumber => "wrong_number",
            Self::Spam => "spam",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Durable record emitted at call end; the input to the rollup job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: CallId,
    pub company_id: CompanyId,
    pub caller_phone: Option<String>,
    pub outcome: CallOutcome,
    pub intent: IntentKind,
    pub tier_used: Option<SourceKind>,
    pub appointment_id: Option<AppointmentId>,
    pub turn_count: u32,
    pub facts_captured: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}
