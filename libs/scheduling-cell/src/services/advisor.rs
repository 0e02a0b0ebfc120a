// libs/scheduling-cell/src/services/advisor.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::Urgency;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Advisor transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Advisor returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Advisor response was not usable: {0}")]
    Malformed(String),
}

/// One baseline candidate as the advisor sees it. `slot_id` is its 1-based
/// position in the baseline list.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryCandidate {
    pub slot_id: u32,
    pub doctor_id: Uuid,
    pub doctor_name: Option<String>,
    pub doctor_specialty: Option<String>,
    pub room_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub baseline_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRequest {
    pub clinic_id: Uuid,
    pub reason: Option<String>,
    pub urgency: Urgency,
    pub duration_minutes: i64,
    pub candidates: Vec<AdvisoryCandidate>,
    pub insights: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryRecommendation {
    pub slot_id: u32,
    pub score: Option<f64>,
    pub rationale: String,
}

/// Proposed order, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryProposal {
    pub recommendations: Vec<AdvisoryRecommendation>,
}

impl AdvisoryProposal {
    pub fn order(&self) -> Vec<u32> {
        self.recommendations.iter().map(|r| r.slot_id).collect()
    }
}

/// Optional external re-ranker. Implementations may fail or stall; the
/// ranking engine bounds and validates whatever they return.
#[async_trait]
pub trait RankingAdvisor: Send + Sync {
    async fn propose(&self, request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisorError>;
}

/// Re-ranks through a local Ollama server (`/api/generate`).
pub struct OllamaRankingAdvisor {
    http_client: Client,
    base_url: String,
    model: String,
}

impl OllamaRankingAdvisor {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http_client: Client::new(),
            base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
        }
    }

    /// `None` when no Ollama endpoint is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        config.is_advisor_configured().then(|| Self::new(config))
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl RankingAdvisor for OllamaRankingAdvisor {
    #[instrument(skip(self, request), fields(candidates = request.candidates.len()))]
    async fn propose(&self, request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisorError> {
        let payload = json!({
            "model": self.model,
            "prompt": render_prompt(request),
            "stream": false
        });
        debug!("Sending ranking prompt to Ollama model {}", self.model);

        let response = self
            .http_client
            .post(self.endpoint())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            error!("Ollama error ({}): {}", status, body);
            return Err(AdvisorError::Status { status, body });
        }

        let data: Value = response.json().await?;
        let text = data["response"]
            .as_str()
            .ok_or_else(|| AdvisorError::Malformed("payload has no text output".to_string()))?;

        parse_advisor_response(text)
    }
}

pub fn render_prompt(request: &AdvisoryRequest) -> String {
    let mut prompt = String::from(
        "You are the scheduling assistant of a veterinary clinic. Rank the appointment \
         slots below from most to least suitable for this visit.\n\n",
    );

    let _ = writeln!(prompt, "Visit reason: {}", request.reason.as_deref().unwrap_or("not given"));
    let _ = writeln!(prompt, "Urgency: {}", request.urgency);
    let _ = writeln!(prompt, "Duration: {} minutes", request.duration_minutes);

    if !request.insights.is_empty() {
        prompt.push_str("\nWhat past bookings tell us:\n");
        for insight in &request.insights {
            let _ = writeln!(prompt, "- {}", insight);
        }
    }

    prompt.push_str("\nAvailable slots:\n");
    for candidate in &request.candidates {
        let doctor = match (&candidate.doctor_name, &candidate.doctor_specialty) {
            (Some(name), Some(specialty)) => format!("{} ({})", name, specialty),
            (Some(name), None) => name.clone(),
            _ => candidate.doctor_id.to_string(),
        };
        let _ = writeln!(
            prompt,
            "- slot_id: {} | doctor: {} | room_id: {} | start: {} | end: {} | baseline_score: {:.3}",
            candidate.slot_id,
            doctor,
            candidate.room_id,
            candidate.start_time.to_rfc3339(),
            candidate.end_time.to_rfc3339(),
            candidate.baseline_score
        );
    }

    prompt.push_str(
        "\nReturn every slot_id exactly once, best first, as JSON only:\n\
         {\"recommendations\": [{\"slot_id\": 1, \"score\": 0.9, \"rationale\": \"...\"}]}",
    );
    prompt
}

/// Reads `{"recommendations": [...]}` out of model output, tolerating prose
/// around the JSON object.
pub fn parse_advisor_response(raw: &str) -> Result<AdvisoryProposal, AdvisorError> {
    let text = raw.trim();
    let parsed: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
                return Err(AdvisorError::Malformed("no JSON object in output".to_string()));
            };
            if end < start {
                return Err(AdvisorError::Malformed("no JSON object in output".to_string()));
            }
            serde_json::from_str(&text[start..=end])
                .map_err(|e| AdvisorError::Malformed(format!("embedded JSON is malformed: {}", e)))?
        }
    };

    let items = parsed
        .get("recommendations")
        .and_then(Value::as_array)
        .ok_or_else(|| AdvisorError::Malformed("missing 'recommendations' array".to_string()))?;

    let mut recommendations = Vec::with_capacity(items.len());
    for item in items {
        let Some(object) = item.as_object() else {
            debug!("Skipping non-object recommendation: {}", item);
            continue;
        };
        let Some(slot_id) = object
            .get("slot_id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
        else {
            debug!("Skipping recommendation without integer slot_id: {}", item);
            continue;
        };

        recommendations.push(AdvisoryRecommendation {
            slot_id,
            score: object.get("score").and_then(Value::as_f64),
            rationale: object
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
        });
    }

    if recommendations.is_empty() {
        return Err(AdvisorError::Malformed("no usable recommendations".to_string()));
    }

    Ok(AdvisoryProposal { recommendations })
}
