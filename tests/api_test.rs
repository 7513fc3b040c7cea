use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use async_trait::async_trait;
use serde_json::{json, Value};

use student_mentor::advice::{AdviceError, AdviceGenerator, UnavailableAdvisor};
use student_mentor::config::{messages, Config, FirebaseConfig};
use student_mentor::data::load_from_reader;
use student_mentor::model::RiskModel;
use student_mentor::server::{configure, AppState};
use student_mentor::store::ProfileStore;

const HEADER: &str = "school;sex;age;address;famsize;Pstatus;Medu;Fedu;Mjob;Fjob;reason;guardian;traveltime;studytime;failures;schoolsup;famsup;paid;activities;nursery;higher;internet;romantic;famrel;freetime;goout;Dalc;Walc;health;absences;G1;G2;G3";
const USER: &str = "mentor@example.com";

struct FixedAdvisor;

#[async_trait]
impl AdviceGenerator for FixedAdvisor {
    async fn generate(&self, _prompt: &str) -> Result<String, AdviceError> {
        Ok("**Study** a little every day.".to_string())
    }
}

/// Fails the first request, then answers normally.
#[derive(Default)]
struct FlakyAdvisor {
    calls: AtomicUsize,
}

#[async_trait]
impl AdviceGenerator for FlakyAdvisor {
    async fn generate(&self, _prompt: &str) -> Result<String, AdviceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(AdviceError::EmptyResponse)
        } else {
            Ok("Recovered advice.".to_string())
        }
    }
}

fn dataset(rows: usize) -> String {
    let mut csv = format!("{HEADER}\n");
    for i in 0..rows {
        let g1 = (i * 7 % 21) as u32;
        let g2 = (g1 + (i % 3) as u32).min(20);
        let g3 = (g1 + g2) / 2;
        let failures = if g3 < 10 { 2 } else { 0 };
        let absences = if g3 < 10 { 16 } else { 3 };
        csv.push_str(&format!(
            "GP;{sex};{age};U;GT3;T;{medu};2;other;services;course;mother;1;2;{failures};no;yes;no;yes;yes;yes;yes;no;4;3;3;1;1;3;{absences};{g1};{g2};{g3}\n",
            sex = if i % 2 == 0 { "F" } else { "M" },
            age = 15 + (i % 4),
            medu = i % 5,
        ));
    }
    csv
}

fn student() -> Value {
    json!({
        "school": "GP", "sex": "F", "age": 17, "address": "U", "famsize": "GT3",
        "Pstatus": "T", "Medu": 4, "Fedu": 3, "Mjob": "teacher", "Fjob": "services",
        "reason": "course", "guardian": "mother", "traveltime": 1, "studytime": 2,
        "failures": 0, "schoolsup": "no", "famsup": "yes", "paid": "no",
        "activities": "yes", "nursery": "yes", "higher": "yes", "internet": "yes",
        "romantic": "no", "famrel": 4, "freetime": 3, "goout": 3, "Dalc": 1,
        "Walc": 1, "health": 4, "absences": 4, "G1": 12, "G2": 13
    })
}

async fn state_with(
    config: Config,
    with_model: bool,
    advisor: Arc<dyn AdviceGenerator>,
) -> AppState {
    let model = if with_model {
        let students = load_from_reader(dataset(60).as_bytes()).unwrap();
        Some(RiskModel::train(&students).unwrap())
    } else {
        None
    };
    let store = ProfileStore::connect("sqlite::memory:").await.unwrap();
    AppState::new(config, model, advisor, store)
}

async fn state(with_model: bool) -> AppState {
    state_with(Config::default(), with_model, Arc::new(FixedAdvisor)).await
}

fn pdf_request() -> Value {
    json!({ "predicted_grade": 8, "risk_category": "high" })
}

#[actix_web::test]
async fn predict_returns_a_full_assessment() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/predict")
        .set_json(student())
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "success");
    let risk = body["risk_category"].as_str().unwrap();
    assert!(["low", "medium", "high"].contains(&risk));
    let confidence = body["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(body["shap_values"].as_array().unwrap().len() <= 10);
    assert_eq!(body["mentoring_advice"], "**Study** a little every day.");
    assert!(body["advice_html"].as_str().unwrap().contains("<strong>Study</strong>"));
    assert_eq!(body["charts"]["shap"]["type"], "bar");

    let again = test::TestRequest::post()
        .uri("/api/predict")
        .set_json(student())
        .to_request();
    let cached: Value = test::call_and_read_body_json(&app, again).await;
    assert_eq!(cached, body);
}

#[actix_web::test]
async fn invalid_fields_are_rejected() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    let mut data = student();
    data["age"] = json!(99);
    let req = test::TestRequest::post()
        .uri("/api/predict")
        .set_json(data)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("Age"));

    let req = test::TestRequest::post()
        .uri("/api/predict")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn missing_model_is_reported() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(false).await))
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/predict")
        .set_json(student())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], messages::MODEL_NOT_LOADED);

    let health: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/healthz").to_request())
            .await;
    assert_eq!(health["ok"], true);
    assert_eq!(health["models_loaded"], false);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/get-grade-averages").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn status_and_averages_reflect_the_model() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    let status: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/status").to_request())
            .await;
    assert_eq!(status["pipeline"], true);
    assert_eq!(status["advice"], true);

    let averages: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/get-grade-averages").to_request(),
    )
    .await;
    assert!(averages["G1"].as_f64().is_some());
    assert!(averages["G2"].as_f64().is_some());

    let info: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/model/info").to_request(),
    )
    .await;
    assert_eq!(info["training_rows"], 48);
    assert_eq!(info["holdout_rows"], 12);
}

#[actix_web::test]
async fn pdf_report_is_an_attachment() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(false).await))
            .configure(configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/generate-pdf")
        .set_json(json!({
            "predicted_grade": 12,
            "risk_category": "medium",
            "confidence": 0.8,
            "mentoring_advice": "Keep a weekly study plan.",
            "shap_values": [{"feature": "Failures (Past)", "importance": 0.4}]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("student_report_"));
    let body = test::read_body(resp).await;
    assert!(body.starts_with(b"%PDF-1.4"));

    let req = test::TestRequest::post()
        .uri("/generate-pdf")
        .set_json(json!({ "confidence": 0.5 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["error"],
        "Missing required fields: predicted_grade, risk_category"
    );
}

#[actix_web::test]
async fn profiles_require_a_signed_in_user() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(false).await))
            .configure(configure),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/profiles").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "unauthorized");
}

#[actix_web::test]
async fn profile_lifecycle_with_history() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    let assessment: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/predict")
            .set_json(student())
            .to_request(),
    )
    .await;
    let risk = assessment["risk_category"].as_str().unwrap().to_string();

    let saved: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::put()
            .uri("/api/profiles/spring")
            .insert_header(("X-User-Email", USER))
            .set_json(json!({ "student_data": student() }))
            .to_request(),
    )
    .await;
    assert_eq!(saved["name"], "spring");
    assert_eq!(saved["profile"]["age"], 17);
    assert!(saved["assessment"].is_null());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/profiles/spring/assessment")
            .insert_header(("X-User-Email", USER))
            .set_json(&assessment)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let listed: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/profiles")
            .insert_header(("X-User-Email", USER))
            .to_request(),
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["risk_category"], risk.as_str());

    let history: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/assessments?risk={risk}&limit=5"))
            .insert_header(("X-User-Email", USER))
            .to_request(),
    )
    .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["profile_name"], "spring");

    let other_user: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/api/profiles")
            .insert_header(("X-User-Email", "someone@example.com"))
            .to_request(),
    )
    .await;
    assert!(other_user.as_array().unwrap().is_empty());

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri("/api/profiles/spring")
            .insert_header(("X-User-Email", USER))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/profiles/spring")
            .insert_header(("X-User-Email", USER))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn explain_returns_top_factors() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/explain")
            .set_json(student())
            .to_request(),
    )
    .await;
    let factors = body["explanation"].as_array().unwrap();
    assert!(!factors.is_empty());
    assert!(factors.len() <= 10);
    let magnitudes: Vec<f64> = factors
        .iter()
        .map(|f| f["importance"].as_f64().unwrap().abs())
        .collect();
    assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]));
    assert!(factors[0]["feature"].as_str().is_some());
}

#[actix_web::test]
async fn advice_renders_markdown() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/advice")
            .set_json(student())
            .to_request(),
    )
    .await;
    assert_eq!(body["advice"], "**Study** a little every day.");
    assert!(body["advice_html"].as_str().unwrap().contains("<strong>Study</strong>"));
}

#[actix_web::test]
async fn advice_without_a_backend_explains_why() {
    let state = state_with(Config::default(), false, Arc::new(UnavailableAdvisor)).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure),
    )
    .await;

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post()
            .uri("/api/advice")
            .set_json(student())
            .to_request(),
    )
    .await;
    assert_eq!(body["advice"], messages::ADVICE_UNAVAILABLE);

    let status: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/status").to_request())
            .await;
    assert_eq!(status["advice"], false);
    assert_eq!(status["pipeline"], false);
}

#[actix_web::test]
async fn failed_advice_is_not_cached() {
    let state = state_with(Config::default(), true, Arc::new(FlakyAdvisor::default())).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure),
    )
    .await;

    let predict = || {
        test::TestRequest::post()
            .uri("/api/predict")
            .set_json(student())
            .to_request()
    };
    let first: Value = test::call_and_read_body_json(&app, predict()).await;
    assert!(first["mentoring_advice"]
        .as_str()
        .unwrap()
        .starts_with("Could not generate advice"));

    let second: Value = test::call_and_read_body_json(&app, predict()).await;
    assert_eq!(second["mentoring_advice"], "Recovered advice.");

    let third: Value = test::call_and_read_body_json(&app, predict()).await;
    assert_eq!(third, second);
}

#[actix_web::test]
async fn firebase_config_is_served() {
    let config = Config {
        firebase: FirebaseConfig {
            api_key: Some("web-key".into()),
            project_id: Some("mentor-demo".into()),
            ..FirebaseConfig::default()
        },
        ..Config::default()
    };
    let state = state_with(config, false, Arc::new(FixedAdvisor)).await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure),
    )
    .await;

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/firebase-config").to_request(),
    )
    .await;
    assert_eq!(body["apiKey"], "web-key");
    assert_eq!(body["projectId"], "mentor-demo");
}

#[actix_web::test]
async fn homepage_keeps_drafts_with_an_expiry() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(false).await))
            .configure(configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    let page = std::str::from_utf8(&body).unwrap();
    assert!(page.contains("saved_at: Date.now()"));
    assert!(page.contains("DRAFT_TTL_MS = 24 * 60 * 60 * 1000"));
    assert!(page.contains("/api/predict"));
}

#[actix_web::test]
async fn predictions_are_limited_per_minute() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(true).await))
            .configure(configure),
    )
    .await;

    for _ in 0..30 {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/predict")
                .set_json(student())
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/predict")
            .set_json(student())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "rate_limited");
    assert_eq!(body["error"], messages::RATE_LIMITED);
}

#[actix_web::test]
async fn pdf_downloads_are_limited_per_minute() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(false).await))
            .configure(configure),
    )
    .await;

    for _ in 0..5 {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/generate-pdf")
                .set_json(pdf_request())
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/generate-pdf")
            .set_json(pdf_request())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "rate_limited");

    // A different user has a separate allowance.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/generate-pdf")
            .insert_header(("X-User-Email", USER))
            .set_json(pdf_request())
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn long_profile_names_are_rejected() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(false).await))
            .configure(configure),
    )
    .await;

    let name = "a".repeat(101);
    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/api/profiles/{name}"))
            .insert_header(("X-User-Email", USER))
            .set_json(json!({ "student_data": student() }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "validation_error");
    assert!(body["error"].as_str().unwrap().contains("maximum length of 100"));
}
