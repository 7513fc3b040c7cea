//! HTTP routes and the shared application state.

use std::path::Path;
use std::sync::{Arc, Mutex};

use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::advice::{
    advice_or_message, build_prompt, request_advice, AdviceGenerator, GeminiAdvisor,
    RiskContext, UnavailableAdvisor,
};
use crate::cache::{cache_key, TtlCache};
use crate::charts::ChartSet;
use crate::config::{
    endpoints, Config, RATE_LIMIT_PDF_PER_MINUTE, RATE_LIMIT_PREDICT_PER_MINUTE,
    USER_HEADER,
};
use crate::data::load_data;
use crate::error::AppError;
use crate::form::fields_from_json;
use crate::limits::{identity, RateLimiter};
use crate::markdown;
use crate::model::RiskModel;
use crate::profile::{AssessmentResult, RiskLevel, StudentProfile};
use crate::report::{filename, Report, ReportRequest};
use crate::store::{ProfileStore, StoreError};
use crate::validation::validate_student_data;

const EXPLANATION_FEATURES: usize = 10;
const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 200;

pub struct AppState {
    pub config: Config,
    pub model: Option<Arc<RiskModel>>,
    pub advisor: Arc<dyn AdviceGenerator>,
    pub store: ProfileStore,
    pub cache: Mutex<TtlCache<String, AssessmentResult>>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        config: Config,
        model: Option<RiskModel>,
        advisor: Arc<dyn AdviceGenerator>,
        store: ProfileStore,
    ) -> Self {
        let cache = TtlCache::new(config.cache_ttl, config.cache_max_entries);
        Self {
            model: model.map(Arc::new),
            advisor,
            store,
            cache: Mutex::new(cache),
            limiter: RateLimiter::default(),
            config,
        }
    }

    /// Load or train the model, pick the advice backend and open the store.
    pub async fn from_config(config: Config) -> Result<Self, StoreError> {
        let model_path = config.model_path.clone();
        let dataset_path = config.dataset_path.clone();
        let model = tokio::task::spawn_blocking(move || load_model(&model_path, &dataset_path))
            .await
            .unwrap_or_else(|err| {
                tracing::error!("Model loading task failed: {err}");
                None
            });

        let advisor: Arc<dyn AdviceGenerator> = match &config.gemini {
            Some(settings) => {
                tracing::info!("Gemini model '{}' configured", settings.model);
                Arc::new(GeminiAdvisor::new(settings.clone()))
            }
            None => Arc::new(UnavailableAdvisor),
        };

        let store = ProfileStore::connect(&config.database_url).await?;
        Ok(Self::new(config, model, advisor, store))
    }

    fn model(&self) -> Result<&RiskModel, AppError> {
        self.model.as_deref().ok_or(AppError::ModelNotLoaded)
    }

    fn enforce(&self, req: &HttpRequest, bucket: &str, limit: u32) -> Result<(), AppError> {
        let value_of = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
        let peer = req.peer_addr().map(|addr| addr.ip().to_string());
        let key = identity(
            value_of(USER_HEADER),
            value_of(header::AUTHORIZATION.as_str()),
            peer.as_deref(),
        );
        if self.limiter.check(bucket, &key, limit) {
            Ok(())
        } else {
            Err(AppError::RateLimited)
        }
    }

    fn enforce_default(&self, req: &HttpRequest, bucket: &str) -> Result<(), AppError> {
        self.enforce(req, bucket, self.config.rate_limit_per_minute)
    }
}

/// Prefer the saved artifact; otherwise train from the dataset and save the
/// result. Without either the server runs with no model.
pub fn load_model(model_path: &Path, dataset_path: &Path) -> Option<RiskModel> {
    if model_path.exists() {
        match RiskModel::load(model_path) {
            Ok(model) => {
                tracing::info!("Loaded pre-trained model from {}", model_path.display());
                return Some(model);
            }
            Err(err) => tracing::error!("Could not load model artifact: {err}"),
        }
    }

    if !dataset_path.exists() {
        tracing::error!(
            "No model artifact at {} and no dataset at {}",
            model_path.display(),
            dataset_path.display()
        );
        return None;
    }

    let trained = load_data(dataset_path)
        .map_err(|err| err.to_string())
        .and_then(|students| RiskModel::train(&students).map_err(|err| err.to_string()));
    match trained {
        Ok(model) => {
            if let Err(err) = model.save(model_path) {
                tracing::warn!("Trained model could not be saved: {err}");
            }
            Some(model)
        }
        Err(err) => {
            tracing::error!("Model training failed: {err}");
            None
        }
    }
}

fn signed_in_user(req: &HttpRequest) -> Result<String, AppError> {
    req.headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|email| email.contains('@'))
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

fn student_profile(body: &Value) -> Result<StudentProfile, AppError> {
    let fields = fields_from_json(body)?;
    validate_student_data(&fields)
}

/// Run the model and ask for advice. The flag is false when the advice
/// request failed and the result should not be cached.
async fn assess(
    state: &AppState,
    profile: &StudentProfile,
) -> Result<(AssessmentResult, bool), AppError> {
    let model = state.model()?;
    let prediction = model.predict(profile);
    let shap_values = model.explain(profile, EXPLANATION_FEATURES);

    let prompt = build_prompt(
        profile,
        Some(RiskContext {
            risk: prediction.risk,
            confidence: prediction.confidence,
        }),
        &shap_values,
    );
    let outcome = request_advice(state.advisor.as_ref(), &prompt).await;
    let cacheable = !outcome.is_failure();
    let mentoring_advice = outcome.into_message();

    let charts = ChartSet::build(
        profile,
        prediction.risk,
        &prediction.probabilities,
        &shap_values,
        model.grade_averages(),
    );

    let result = AssessmentResult {
        prediction: prediction.risk.estimated_grade(),
        risk_category: prediction.risk,
        risk_descriptor: prediction.risk.descriptor().to_string(),
        confidence: prediction.confidence,
        probabilities: prediction.probabilities,
        shap_values,
        advice_html: markdown::to_html(&mentoring_advice),
        mentoring_advice,
        charts: Some(charts),
        status: "success".to_string(),
    };
    Ok((result, cacheable))
}

async fn homepage() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(include_str!("homepage.html"))
}

async fn firebase_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(&state.config.firebase)
}

async fn predict(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    state.enforce(&req, "predict", RATE_LIMIT_PREDICT_PER_MINUTE)?;
    let profile = student_profile(&body)?;
    state.model()?;

    let key = cache_key(endpoints::PREDICT, &profile)
        .map_err(|err| AppError::Internal(err.to_string()))?;
    let cached = state
        .cache
        .lock()
        .map_err(|_| AppError::Internal("prediction cache lock poisoned".into()))?
        .get(&key);
    if let Some(result) = cached {
        tracing::debug!("Serving cached assessment");
        return Ok(HttpResponse::Ok().json(result));
    }

    let (result, cacheable) = assess(&state, &profile).await?;
    tracing::info!(
        risk = %result.risk_category,
        confidence = result.confidence,
        "Assessment complete"
    );
    if cacheable {
        if let Ok(mut cache) = state.cache.lock() {
            cache.insert(key, result.clone());
        }
    }
    Ok(HttpResponse::Ok().json(result))
}

async fn explain(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "explain")?;
    let profile = student_profile(&body)?;
    let explanation = state.model()?.explain(&profile, EXPLANATION_FEATURES);
    Ok(HttpResponse::Ok().json(json!({ "explanation": explanation })))
}

async fn advice(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "advice")?;
    let profile = student_profile(&body)?;

    let (context, factors) = match state.model.as_deref() {
        Some(model) => {
            let prediction = model.predict(&profile);
            let context = RiskContext {
                risk: prediction.risk,
                confidence: prediction.confidence,
            };
            (Some(context), model.explain(&profile, EXPLANATION_FEATURES))
        }
        None => (None, Vec::new()),
    };
    let prompt = build_prompt(&profile, context, &factors);
    let advice = advice_or_message(state.advisor.as_ref(), &prompt).await;
    Ok(HttpResponse::Ok().json(json!({
        "advice_html": markdown::to_html(&advice),
        "advice": advice,
    })))
}

async fn grade_averages(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let averages = state
        .model
        .as_deref()
        .and_then(RiskModel::grade_averages)
        .ok_or_else(|| AppError::NotFound("Grade averages".into()))?;
    Ok(HttpResponse::Ok().json(averages))
}

async fn model_info(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.model()?.info()))
}

async fn healthz(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "ok": true,
        "models_loaded": state.model.is_some(),
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn status(state: web::Data<AppState>) -> HttpResponse {
    let loaded = state.model.is_some();
    HttpResponse::Ok().json(json!({
        "pipeline": loaded,
        "label_encoder": loaded,
        "risk_explainer": loaded,
        "advice": state.advisor.is_available(),
    }))
}

async fn generate_pdf(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ReportRequest>,
) -> Result<HttpResponse, AppError> {
    state.enforce(&req, "pdf", RATE_LIMIT_PDF_PER_MINUTE)?;
    let report = Report::from_request(body.into_inner())?;
    let now = Utc::now();
    Ok(HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename(now))],
        })
        .body(report.render_pdf(now)))
}

async fn list_profiles(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "profiles")?;
    let user = signed_in_user(&req)?;
    Ok(HttpResponse::Ok().json(state.store.list_profiles(&user).await?))
}

async fn get_profile(
    state: web::Data<AppState>,
    req: HttpRequest,
    name: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "profiles")?;
    let user = signed_in_user(&req)?;
    Ok(HttpResponse::Ok().json(state.store.load_profile(&user, &name).await?))
}

async fn put_profile(
    state: web::Data<AppState>,
    req: HttpRequest,
    name: web::Path<String>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "profiles")?;
    let user = signed_in_user(&req)?;
    let profile = student_profile(&body)?;
    let assessment: Option<AssessmentResult> = match body.get("assessment") {
        Some(Value::Null) | None => None,
        Some(value) => Some(
            serde_json::from_value(value.clone())
                .map_err(|err| AppError::Validation(format!("Invalid assessment: {err}")))?,
        ),
    };
    let saved = state
        .store
        .save_profile(&user, &name, &profile, assessment.as_ref())
        .await?;
    tracing::info!(profile = %saved.name, "Profile saved");
    Ok(HttpResponse::Ok().json(saved))
}

async fn delete_profile(
    state: web::Data<AppState>,
    req: HttpRequest,
    name: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "profiles")?;
    let user = signed_in_user(&req)?;
    state.store.delete_profile(&user, &name).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn save_assessment(
    state: web::Data<AppState>,
    req: HttpRequest,
    name: web::Path<String>,
    body: web::Json<AssessmentResult>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "profiles")?;
    let user = signed_in_user(&req)?;
    let record = state.store.save_assessment(&user, &name, &body).await?;
    Ok(HttpResponse::Created().json(record))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    risk: Option<String>,
    limit: Option<u32>,
}

async fn list_assessments(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    state.enforce_default(&req, "profiles")?;
    let user = signed_in_user(&req)?;
    let risk = match query.risk.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Some(raw.parse::<RiskLevel>().map_err(AppError::Validation)?),
        None => None,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(HttpResponse::Ok().json(state.store.list_assessments(&user, risk, limit).await?))
}

/// Register every route; shared by `run` and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::Validation(format!("Invalid JSON body: {err}")).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .route("/", web::get().to(homepage))
    .route(endpoints::FIREBASE_CONFIG, web::get().to(firebase_config))
    .route(endpoints::PREDICT, web::post().to(predict))
    .route(endpoints::EXPLAIN, web::post().to(explain))
    .route(endpoints::ADVICE, web::post().to(advice))
    .route(endpoints::GRADE_AVERAGES, web::get().to(grade_averages))
    .route(endpoints::MODEL_INFO, web::get().to(model_info))
    .route(endpoints::HEALTH, web::get().to(healthz))
    .route(endpoints::STATUS, web::get().to(status))
    .route(endpoints::GENERATE_PDF, web::post().to(generate_pdf))
    .route(endpoints::PROFILES, web::get().to(list_profiles))
    .service(
        web::resource(format!("{}/{{name}}", endpoints::PROFILES))
            .route(web::get().to(get_profile))
            .route(web::put().to(put_profile))
            .route(web::delete().to(delete_profile)),
    )
    .route(
        &format!("{}/{{name}}/assessment", endpoints::PROFILES),
        web::post().to(save_assessment),
    )
    .route(endpoints::ASSESSMENTS, web::get().to(list_assessments));
}

pub async fn run(state: AppState) -> std::io::Result<()> {
    let bind = (state.config.host.clone(), state.config.port);
    let state = web::Data::new(state);
    tracing::info!("Starting AI Student Mentor on http://{}:{}", bind.0, bind.1);

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}
