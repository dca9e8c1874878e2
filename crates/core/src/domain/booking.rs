use serde::{Deserialize, Serialize};

use crate::domain::call::CompanyId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

/// Booking progress for one call. `locked` engages after an explicit
/// consent signal when the company config says so; from then on only the
/// booking and escalation handlers may commit extracted fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingState {
    pub consent_given_at_turn: Option<u32>,
    pub locked: bool,
    pub appointment_id: Option<AppointmentId>,
}

impl BookingState {
    pub fn consent_given(&self) -> bool {
        self.consent_given_at_turn.is_some()
    }
}

/// Normalized fields handed to the external booking collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub company_id: CompanyId,
    pub caller_name: String,
    pub callback_number: String,
    pub service_address: String,
    pub problem_summary: String,
    pub time_preference: String,
    pub access_notes: Option<String>,
}
