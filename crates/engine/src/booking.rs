//! Booking readiness and the external booking boundary.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use frontdesk_core::domain::booking::{AppointmentId, BookingRequest};
use frontdesk_core::extract::{
    FIELD_ACCESS_NOTES, FIELD_CALLBACK_NUMBER, FIELD_CALLER_NAME, FIELD_PROBLEM_SUMMARY,
    FIELD_SERVICE_ADDRESS, FIELD_TIME_PREFERENCE,
};
use frontdesk_core::memory::ConversationMemory;

/// Booking may trigger only when every one of these is captured. The time
/// preference may be as vague as "this week"; vague is still a value.
pub const MUST_FIELDS: [&str; 5] = [
    FIELD_CALLER_NAME,
    FIELD_CALLBACK_NUMBER,
    FIELD_SERVICE_ADDRESS,
    FIELD_PROBLEM_SUMMARY,
    FIELD_TIME_PREFERENCE,
];

pub fn booking_ready(memory: &ConversationMemory) -> bool {
    MUST_FIELDS.iter().all(|field| memory.fact_value(field).is_some())
}

/// Assemble the normalized request from captured facts. `None` while any
/// must field is missing.
pub fn booking_request_from(memory: &ConversationMemory) -> Option<BookingRequest> {
    Some(BookingRequest {
        company_id: memory.company_id.clone(),
        caller_name: memory.fact_value(FIELD_CALLER_NAME)?.to_string(),
        callback_number: memory.fact_value(FIELD_CALLBACK_NUMBER)?.to_string(),
        service_address: memory.fact_value(FIELD_SERVICE_ADDRESS)?.to_string(),
        problem_summary: memory.fact_value(FIELD_PROBLEM_SUMMARY)?.to_string(),
        time_preference: memory.fact_value(FIELD_TIME_PREFERENCE)?.to_string(),
        access_notes: memory.fact_value(FIELD_ACCESS_NOTES).map(str::to_string),
    })
}

#[async_trait]
pub trait BookingClient: Send + Sync {
    async fn create_appointment(&self, request: &BookingRequest) -> Result<AppointmentId>;
}

/// Test double: succeeds with sequential ids, or fails while poisoned.
#[derive(Default)]
pub struct ScriptedBookingClient {
    created: Mutex<Vec<BookingRequest>>,
    fail_with: Mutex<Option<String>>,
}

impl ScriptedBookingClient {
    pub async fn fail_next_with(&self, reason: impl Into<String>) {
        *self.fail_with.lock().await = Some(reason.into());
    }

    pub async fn created(&self) -> Vec<BookingRequest> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl BookingClient for ScriptedBookingClient {
    async fn create_appointment(&self, request: &BookingRequest) -> Result<AppointmentId> {
        if let Some(reason) = self.fail_with.lock().await.take() {
            anyhow::bail!(reason);
        }
        let mut created = self.created.lock().await;
        created.push(request.clone());
        Ok(AppointmentId(format!("apt-{:04}", created.len())))
    }
}
