//! Overdue reminder emails drafted by an external generative-text API.
//!
//! Generation runs outside the tracker lock and never touches booking
//! state. Failures are rendered as the reminder text itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::engine::ReminderRequest;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const MISSING_KEY_TEXT: &str = "Error: API key is not configured. Please contact an administrator.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderError {
    /// No API key configured.
    MissingCredential,
    Http(String),
    InvalidResponse(String),
}

impl fmt::Display for ReminderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredential => write!(f, "API key is not configured"),
            Self::Http(e) => write!(f, "{e}"),
            Self::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl std::error::Error for ReminderError {}

impl From<reqwest::Error> for ReminderError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

#[async_trait]
pub trait ReminderGenerator: Send + Sync {
    async fn generate(
        &self,
        equipment_name: &str,
        user_email: &str,
        due_date: NaiveDate,
    ) -> Result<String, ReminderError>;
}

pub fn build_prompt(equipment_name: &str, user_email: &str, due_date: NaiveDate) -> String {
    format!(
        "Generate a polite but firm reminder email to the user with email \"{user_email}\" \
         about their overdue equipment loan from \"Trim Media\".\n\
         \n\
         Details:\n\
         - Equipment: {equipment_name}\n\
         - Due Date: {due}\n\
         \n\
         The email should:\n\
         1. Start with a friendly but professional greeting.\n\
         2. Clearly state which equipment is overdue and when it was due.\n\
         3. Politely request its immediate return.\n\
         4. Provide information on how to return the equipment (e.g., \"Please return it to the front desk as soon as possible.\").\n\
         5. End with a professional closing from \"The Trim Media Team\".\n\
         \n\
         Format the output as a simple text email body. Do not include subject line headers or any markdown.",
        due = due_date.format("%-m/%-d/%Y"),
    )
}

// ── Gemini HTTP client ───────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [PartOut<'a>; 1],
}

#[derive(Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartIn>,
}

#[derive(Deserialize)]
struct PartIn {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// `generateContent` client for the Gemini REST API.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl ReminderGenerator for GeminiClient {
    async fn generate(
        &self,
        equipment_name: &str,
        user_email: &str,
        due_date: NaiveDate,
    ) -> Result<String, ReminderError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(ReminderError::MissingCredential);
        };
        let prompt = build_prompt(equipment_name, user_email, due_date);
        let body = GenerateRequest {
            contents: [Content {
                parts: [PartOut { text: &prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&bytes)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(ReminderError::Http(message));
        }
        parse_text(&bytes)
    }
}

fn parse_text(body: &[u8]) -> Result<String, ReminderError> {
    let decoded: GenerateResponse =
        serde_json::from_slice(body).map_err(|e| ReminderError::InvalidResponse(e.to_string()))?;
    let text: String = decoded
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ReminderError::InvalidResponse("no text in response".into()));
    }
    Ok(text)
}

/// Reminder text for `request`. Never fails: errors become the text.
pub async fn generate_reminder_email(generator: &dyn ReminderGenerator, request: &ReminderRequest) -> String {
    match generator
        .generate(&request.equipment_name, &request.user_email, request.due_date)
        .await
    {
        Ok(text) => {
            metrics::counter!(crate::observability::REMINDERS_TOTAL, "status" => "ok").increment(1);
            text
        }
        Err(ReminderError::MissingCredential) => {
            tracing::error!("reminder API key not set");
            metrics::counter!(crate::observability::REMINDERS_TOTAL, "status" => "unconfigured")
                .increment(1);
            MISSING_KEY_TEXT.to_string()
        }
        Err(e) => {
            tracing::error!("error generating reminder for {}: {e}", request.booking_id);
            metrics::counter!(crate::observability::REMINDERS_TOTAL, "status" => "error").increment(1);
            format!("Failed to generate email. Error: {e}")
        }
    }
}

// ── In-flight tracking ───────────────────────────────────

/// Runs reminder generation per booking. A newer request for the same
/// booking aborts the older one.
pub struct ReminderDesk {
    generator: Arc<dyn ReminderGenerator>,
    in_flight: Arc<DashMap<String, (u64, AbortHandle)>>,
    seq: AtomicU64,
}

impl ReminderDesk {
    pub fn new(generator: Arc<dyn ReminderGenerator>) -> Self {
        Self {
            generator,
            in_flight: Arc::new(DashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Generate the reminder for `request`. Returns `None` if a newer request
    /// for the same booking superseded this one before it finished.
    pub async fn request(&self, request: ReminderRequest) -> Option<String> {
        let ticket = self.seq.fetch_add(1, Ordering::Relaxed);
        let booking_id = request.booking_id.clone();
        let generator = self.generator.clone();
        let handle = tokio::spawn(async move {
            generate_reminder_email(generator.as_ref(), &request).await
        });

        if let Some((_, older)) = self
            .in_flight
            .insert(booking_id.clone(), (ticket, handle.abort_handle()))
        {
            older.abort();
            tracing::debug!("superseded reminder for {booking_id}");
        }
        let _entry = InFlightEntry {
            in_flight: &self.in_flight,
            booking_id: &booking_id,
            ticket,
            task: handle.abort_handle(),
        };

        match handle.await {
            Ok(text) => Some(text),
            Err(e) if e.is_cancelled() => {
                metrics::counter!(crate::observability::REMINDERS_TOTAL, "status" => "superseded")
                    .increment(1);
                None
            }
            Err(e) => {
                tracing::error!("reminder task for {booking_id} failed: {e}");
                Some(format!("Failed to generate email. Error: {e}"))
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Releases a request's slot when `request` finishes or its caller goes away.
/// A dropped caller also aborts the generation task.
struct InFlightEntry<'a> {
    in_flight: &'a DashMap<String, (u64, AbortHandle)>,
    booking_id: &'a str,
    ticket: u64,
    task: AbortHandle,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.task.abort();
        self.in_flight.remove_if(self.booking_id, |_, (t, _)| *t == self.ticket);
    }
}
