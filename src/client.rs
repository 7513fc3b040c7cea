//! HTTP client for the mentor API, used by the terminal wizard.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::cache::{cache_key, TtlCache};
use crate::config::{endpoints, CACHE_MAX_ENTRIES, CACHE_TTL, USER_HEADER};
use crate::data::GradeAverages;
use crate::profile::{AssessmentResult, FeatureContribution, FieldMap, RiskLevel};
use crate::store::{AssessmentRecord, ProfileSummary, SavedProfile};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Invalid server URL {0}")]
    InvalidUrl(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            ClientError::Network(err) => err.status().map(|s| s.as_u16()),
            ClientError::Decode(_) | ClientError::InvalidUrl(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub models_loaded: bool,
    pub time: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct ExplainBody {
    explanation: Vec<FeatureContribution>,
}

#[derive(Deserialize)]
struct AdviceBody {
    advice: String,
}

pub struct MentorClient {
    http: Client,
    base_url: String,
    user: Option<String>,
    cache: Mutex<TtlCache<String, AssessmentResult>>,
}

impl MentorClient {
    pub fn new(base_url: impl Into<String>, user: Option<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(90))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user,
            cache: Mutex::new(TtlCache::new(CACHE_TTL, CACHE_MAX_ENTRIES)),
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `/api/profiles/{name}` plus any trailing segments, each percent-encoded.
    fn profile_url(&self, name: &str, rest: &[&str]) -> Result<Url, ClientError> {
        let invalid = || ClientError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(endpoints::PROFILES.split('/').filter(|s| !s.is_empty()))
            .push(name)
            .extend(rest);
        Ok(url)
    }

    fn with_user(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => builder.header(USER_HEADER, user),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        let resp = self.with_user(builder).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(api_error(status, &text))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let resp = self.send(builder).await?;
        resp.json::<T>()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Served from the local cache when the same fields were assessed recently.
    pub async fn predict(&self, fields: &FieldMap) -> Result<AssessmentResult, ClientError> {
        let key = cache_key(endpoints::PREDICT, fields)
            .map_err(|err| ClientError::Decode(err.to_string()))?;
        if let Some(hit) = self.cache.lock().ok().and_then(|mut cache| cache.get(&key)) {
            tracing::debug!("prediction served from client cache");
            return Ok(hit);
        }

        let result: AssessmentResult = self
            .send_json(self.http.post(self.url(endpoints::PREDICT)).json(fields))
            .await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    pub async fn explain(&self, fields: &FieldMap) -> Result<Vec<FeatureContribution>, ClientError> {
        let body: ExplainBody = self
            .send_json(self.http.post(self.url(endpoints::EXPLAIN)).json(fields))
            .await?;
        Ok(body.explanation)
    }

    pub async fn advice(&self, fields: &FieldMap) -> Result<String, ClientError> {
        let body: AdviceBody = self
            .send_json(self.http.post(self.url(endpoints::ADVICE)).json(fields))
            .await?;
        Ok(body.advice)
    }

    pub async fn grade_averages(&self) -> Result<GradeAverages, ClientError> {
        self.send_json(self.http.get(self.url(endpoints::GRADE_AVERAGES)))
            .await
    }

    pub async fn generate_pdf(&self, result: &AssessmentResult) -> Result<Vec<u8>, ClientError> {
        let body = json!({
            "predicted_grade": result.prediction,
            "risk_category": result.risk_category,
            "confidence": result.confidence,
            "risk_descriptor": result.risk_descriptor,
            "mentoring_advice": result.mentoring_advice,
            "shap_values": result.shap_values,
        });
        let resp = self
            .send(self.http.post(self.url(endpoints::GENERATE_PDF)).json(&body))
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.send_json(self.http.get(self.url(endpoints::HEALTH))).await
    }

    pub async fn save_profile(
        &self,
        name: &str,
        fields: &FieldMap,
        assessment: Option<&AssessmentResult>,
    ) -> Result<SavedProfile, ClientError> {
        let body = json!({ "student_data": fields, "assessment": assessment });
        self.send_json(self.http.put(self.profile_url(name, &[])?).json(&body))
            .await
    }

    pub async fn load_profile(&self, name: &str) -> Result<SavedProfile, ClientError> {
        self.send_json(self.http.get(self.profile_url(name, &[])?))
            .await
    }

    pub async fn list_profiles(&self) -> Result<Vec<ProfileSummary>, ClientError> {
        self.send_json(self.http.get(self.url(endpoints::PROFILES)))
            .await
    }

    pub async fn delete_profile(&self, name: &str) -> Result<(), ClientError> {
        self.send(self.http.delete(self.profile_url(name, &[])?))
            .await?;
        Ok(())
    }

    pub async fn save_assessment(
        &self,
        name: &str,
        result: &AssessmentResult,
    ) -> Result<AssessmentRecord, ClientError> {
        let url = self.profile_url(name, &["assessment"])?;
        self.send_json(self.http.post(url).json(result)).await
    }

    pub async fn list_assessments(
        &self,
        risk: Option<RiskLevel>,
        limit: u32,
    ) -> Result<Vec<AssessmentRecord>, ClientError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(risk) = risk {
            query.push(("risk", risk.as_str().to_string()));
        }
        self.send_json(self.http.get(self.url(endpoints::ASSESSMENTS)).query(&query))
            .await
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

fn api_error(status: StatusCode, text: &str) -> ClientError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ClientError::Api {
            status: status.as_u16(),
            kind: body.status,
            message: body.error,
        },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            kind: "error".to_string(),
            message: status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        },
    }
}
