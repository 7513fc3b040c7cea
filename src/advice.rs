//! Mentoring advice: prompt construction and the generative-AI backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::{messages, GeminiSettings};
use crate::profile::{FeatureContribution, RiskLevel, StudentProfile};
use crate::retry::{is_retryable_http_error, is_retryable_network_error, retry_async, RetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum AdviceError {
    #[error("Advice service is not configured")]
    NotConfigured,
    #[error("Advice request failed: {0}")]
    Http(reqwest::Error),
    #[error("Advice service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Advice service returned no text")]
    EmptyResponse,
}

impl From<reqwest::Error> for AdviceError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs must never reach logs or responses.
        AdviceError::Http(err.without_url())
    }
}

impl AdviceError {
    fn is_retryable(&self) -> bool {
        match self {
            AdviceError::Http(err) => is_retryable_network_error(err),
            AdviceError::Status { status, .. } => is_retryable_http_error(*status),
            _ => false,
        }
    }
}

#[async_trait]
pub trait AdviceGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AdviceError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// What came back from an advice request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdviceOutcome {
    Generated(String),
    Unavailable,
    Empty,
    Failed(String),
}

impl AdviceOutcome {
    /// A failed request may succeed on retry, so its message is not worth keeping.
    pub fn is_failure(&self) -> bool {
        matches!(self, AdviceOutcome::Failed(_))
    }

    /// The text shown to the user.
    pub fn into_message(self) -> String {
        match self {
            AdviceOutcome::Generated(text) => text,
            AdviceOutcome::Unavailable => messages::ADVICE_UNAVAILABLE.to_string(),
            AdviceOutcome::Empty => messages::NO_ADVICE.to_string(),
            AdviceOutcome::Failed(reason) => format!("Could not generate advice: {reason}"),
        }
    }
}

pub async fn request_advice(generator: &dyn AdviceGenerator, prompt: &str) -> AdviceOutcome {
    if !generator.is_available() {
        return AdviceOutcome::Unavailable;
    }
    match generator.generate(prompt).await {
        Ok(text) if !text.trim().is_empty() => AdviceOutcome::Generated(text),
        Ok(_) => AdviceOutcome::Empty,
        Err(err) => {
            tracing::error!("Advice generation failed: {err}");
            AdviceOutcome::Failed(err.to_string())
        }
    }
}

/// Generate advice, turning any failure into a message the user can read.
pub async fn advice_or_message(generator: &dyn AdviceGenerator, prompt: &str) -> String {
    request_advice(generator, prompt).await.into_message()
}

pub struct UnavailableAdvisor;

#[async_trait]
impl AdviceGenerator for UnavailableAdvisor {
    async fn generate(&self, _prompt: &str) -> Result<String, AdviceError> {
        Err(AdviceError::NotConfigured)
    }

    fn is_available(&self) -> bool {
        false
    }
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
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiAdvisor {
    client: Client,
    settings: GeminiSettings,
    retry: RetryConfig,
}

impl GeminiAdvisor {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            settings,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, AdviceError> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let resp = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdviceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = resp.json().await?;
        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .find(|text| !text.is_empty())
            .ok_or(AdviceError::EmptyResponse)
    }
}

#[async_trait]
impl AdviceGenerator for GeminiAdvisor {
    async fn generate(&self, prompt: &str) -> Result<String, AdviceError> {
        retry_async(&self.retry, "gemini generateContent", AdviceError::is_retryable, || {
            self.generate_once(prompt)
        })
        .await
    }
}

fn education_level(level: u32) -> &'static str {
    match level {
        0 => "None",
        1 => "Primary (4th grade)",
        2 => "5th to 9th grade",
        3 => "Secondary",
        4 => "Higher education",
        _ => "N/A",
    }
}

fn job_type(job: &str) -> &'static str {
    match job {
        "teacher" => "Teacher",
        "health" => "Health care",
        "services" => "Civil services",
        "at_home" => "At home",
        "other" => "Other",
        _ => "N/A",
    }
}

fn yes_no(value: &str) -> &'static str {
    match value {
        "yes" => "Yes",
        "no" => "No",
        _ => "N/A",
    }
}

fn area(address: &str) -> &'static str {
    match address {
        "U" => "urban",
        "R" => "rural",
        _ => "unknown",
    }
}

/// The model's view of a student, passed into the prompt when available.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext {
    pub risk: RiskLevel,
    pub confidence: f64,
}

pub fn build_prompt(
    profile: &StudentProfile,
    risk: Option<RiskContext>,
    factors: &[FeatureContribution],
) -> String {
    let mut prompt = String::from(
        "**Persona:** You are an expert, empathetic and highly motivational student mentor. \
         Be encouraging and constructive, and use the specific details below to make the \
         advice personal and actionable.\n\n\
         **Task:** Based on the student's profile, provide personalized mentoring advice in \
         Markdown using exactly these sections:\n\
         ### 1. Overall Assessment\n\
         ### 2. Key Strengths to Celebrate\n\
         ### 3. Areas for Strategic Focus\n\
         ### 4. Actionable Steps & Strategies\n\
         ### 5. Recommended Resources\n\n",
    );

    prompt.push_str("### Student Context\n");
    prompt.push_str(&format!(
        "- **Demographics:** Age {}. Home area: {}.\n",
        profile.age,
        area(&profile.address)
    ));
    prompt.push_str("- **Family Background:**\n");
    prompt.push_str(&format!(
        "  - Mother's Education: {}.\n  - Father's Education: {}.\n",
        education_level(profile.medu),
        education_level(profile.fedu)
    ));
    prompt.push_str(&format!(
        "  - Mother's Job: {}.\n  - Father's Job: {}.\n",
        job_type(&profile.mjob),
        job_type(&profile.fjob)
    ));
    prompt.push_str(&format!(
        "  - Family Relationship Quality: {}/5.\n",
        profile.famrel
    ));
    prompt.push_str("- **Academic Profile:**\n");
    prompt.push_str(&format!(
        "  - Recent Grades (G1, G2): {}/20, {}/20.\n  - Past Failures: {}.\n",
        profile.g1, profile.g2, profile.failures
    ));
    prompt.push_str(&format!(
        "  - Weekly Study Time: {} (1: <2 hrs, 2: 2-5 hrs, 3: 5-10 hrs, 4: >10 hrs).\n",
        profile.studytime
    ));
    prompt.push_str(&format!(
        "  - Wants to pursue higher education: {}.\n  - Absences: {}.\n",
        yes_no(&profile.higher),
        profile.absences
    ));
    prompt.push_str("- **Social & Lifestyle:**\n");
    prompt.push_str(&format!(
        "  - Goes out with friends: {}/5.\n  - In a romantic relationship: {}.\n",
        profile.goout,
        yes_no(&profile.romantic)
    ));
    prompt.push_str(&format!(
        "  - Weekday & Weekend Alcohol Consumption: {}/5 and {}/5.\n",
        profile.dalc, profile.walc
    ));

    if let Some(context) = risk {
        prompt.push_str(&format!(
            "\n### Model Assessment\n- Risk level: {} ({:.0}% confidence).\n- Estimated final grade: {}/20.\n",
            context.risk.as_str(),
            context.confidence * 100.0,
            context.risk.estimated_grade()
        ));
    }

    if !factors.is_empty() {
        prompt.push_str("\n### Key Factors\n");
        for factor in factors {
            let direction = if factor.importance >= 0.0 {
                "increases"
            } else {
                "reduces"
            };
            prompt.push_str(&format!(
                "- {} {} risk ({:+.3}).\n",
                factor.feature, direction, factor.importance
            ));
        }
    }

    if let Some(request) = profile
        .custom_prompt
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
    {
        prompt.push_str(&format!(
            "\n**Additional Guidance:** Please also address the user's specific request: '{request}'\n"
        ));
    }
    prompt
}
