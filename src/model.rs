//! Risk classifier: label-encoded categoricals, standardized features and a
//! multinomial logistic regression fitted with linfa. The fitted parameters
//! are kept in a serializable artifact so a trained model can be shipped and
//! loaded at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_logistic::MultiLogisticRegression;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::{grade_averages, GradeAverages, LabelledStudent};
use crate::profile::{
    display_name, is_categorical, FeatureContribution, Probabilities, RiskLevel, StudentProfile,
    CATEGORICAL_FIELDS, FEATURE_COLUMNS,
};

pub const ALGORITHM: &str = "Multinomial Logistic Regression";
const MAX_ITERATIONS: u64 = 200;
const REGULARIZATION: f64 = 0.1;
/// Every n-th row is held out for evaluation.
const HOLDOUT_STRIDE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Training failed: {0}")]
    Training(String),
    #[error("Need at least two risk classes to train, found {0}")]
    TooFewClasses(usize),
    #[error("Model artifact I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Model artifact is invalid: {0}")]
    Artifact(#[from] serde_json::Error),
}

/// Maps each categorical value to its index in the sorted list of values seen
/// during training. Unseen values encode to 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: BTreeMap<String, Vec<String>>,
}

impl LabelEncoder {
    pub fn fit(profiles: &[&StudentProfile]) -> Self {
        let mut classes = BTreeMap::new();
        for field in CATEGORICAL_FIELDS {
            let mut values: Vec<String> = profiles
                .iter()
                .filter_map(|p| p.categorical(field))
                .map(str::to_string)
                .collect();
            values.sort();
            values.dedup();
            classes.insert(field.to_string(), values);
        }
        Self { classes }
    }

    pub fn encode(&self, field: &str, value: &str) -> f64 {
        self.classes
            .get(field)
            .and_then(|values| values.binary_search_by(|v| v.as_str().cmp(value)).ok())
            .unwrap_or(0) as f64
    }

    pub fn classes(&self, field: &str) -> &[String] {
        self.classes.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Scaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let std = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < 1e-12 { 1.0 } else { s });
        Self { mean, std }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.std
    }

    pub fn transform_row(&self, row: &Array1<f64>) -> Array1<f64> {
        (row - &self.mean) / &self.std
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub algorithm: String,
    pub accuracy: f64,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub features: Vec<String>,
    pub classes: Vec<RiskLevel>,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub risk: RiskLevel,
    pub confidence: f64,
    pub probabilities: Probabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskModel {
    encoder: LabelEncoder,
    scaler: Scaler,
    /// `n_features x n_classes`
    weights: Array2<f64>,
    intercept: Array1<f64>,
    classes: Vec<RiskLevel>,
    grade_averages: Option<GradeAverages>,
    info: ModelInfo,
}

pub fn calculate_accuracy(predictions: &[RiskLevel], targets: &[RiskLevel]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets.iter())
        .filter(|(pred, actual)| pred == actual)
        .count() as f64
        / targets.len() as f64
}

fn raw_features(encoder: &LabelEncoder, profile: &StudentProfile) -> Array1<f64> {
    FEATURE_COLUMNS
        .iter()
        .map(|column| {
            if is_categorical(column) {
                encoder.encode(column, profile.categorical(column).unwrap_or_default())
            } else {
                profile.numeric(column).unwrap_or(0.0)
            }
        })
        .collect()
}

fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));
    let exp = logits.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

impl RiskModel {
    pub fn train(students: &[LabelledStudent]) -> Result<Self, ModelError> {
        let mut seen: Vec<RiskLevel> = students.iter().map(|s| s.risk).collect();
        seen.sort();
        seen.dedup();
        if seen.len() < 2 {
            return Err(ModelError::TooFewClasses(seen.len()));
        }

        let profiles: Vec<&StudentProfile> = students.iter().map(|s| &s.profile).collect();
        let encoder = LabelEncoder::fit(&profiles);

        let use_holdout = students.len() >= HOLDOUT_STRIDE * 2;
        let is_holdout = |i: usize| use_holdout && i % HOLDOUT_STRIDE == HOLDOUT_STRIDE - 1;
        let (train, holdout): (Vec<_>, Vec<_>) = students
            .iter()
            .enumerate()
            .partition(|(i, _)| !is_holdout(*i));

        let features = |rows: &[(usize, &LabelledStudent)]| -> Array2<f64> {
            let mut x = Array2::zeros((rows.len(), FEATURE_COLUMNS.len()));
            for (r, (_, student)) in rows.iter().enumerate() {
                x.row_mut(r).assign(&raw_features(&encoder, &student.profile));
            }
            x
        };

        let train_x = features(&train);
        let scaler = Scaler::fit(&train_x);
        let train_y: Array1<usize> = train.iter().map(|(_, s)| s.risk.index()).collect();

        tracing::info!(
            rows = train.len(),
            classes = seen.len(),
            "Training {} model",
            ALGORITHM
        );
        let dataset = Dataset::new(scaler.transform(&train_x), train_y);
        let fitted = MultiLogisticRegression::default()
            .max_iterations(MAX_ITERATIONS)
            .alpha(REGULARIZATION)
            .fit(&dataset)
            .map_err(|err| ModelError::Training(err.to_string()))?;

        let classes: Vec<RiskLevel> = fitted
            .classes()
            .iter()
            .filter_map(|index| RiskLevel::from_index(*index))
            .collect();

        let mut model = Self {
            encoder,
            scaler,
            weights: fitted.params().clone(),
            intercept: fitted.intercept().clone(),
            classes,
            grade_averages: grade_averages(students),
            info: ModelInfo {
                algorithm: ALGORITHM.to_string(),
                accuracy: 0.0,
                training_rows: train.len(),
                holdout_rows: holdout.len(),
                features: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
                classes: Vec::new(),
                trained_at: Utc::now(),
            },
        };
        model.info.classes = model.classes.clone();

        let evaluation = if holdout.is_empty() { &train } else { &holdout };
        let predicted: Vec<RiskLevel> = evaluation
            .iter()
            .map(|(_, s)| model.predict(&s.profile).risk)
            .collect();
        let actual: Vec<RiskLevel> = evaluation.iter().map(|(_, s)| s.risk).collect();
        model.info.accuracy = calculate_accuracy(&predicted, &actual);

        tracing::info!("Model trained, accuracy {:.2}%", model.info.accuracy * 100.0);
        Ok(model)
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn grade_averages(&self) -> Option<GradeAverages> {
        self.grade_averages
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    fn standardized(&self, profile: &StudentProfile) -> Array1<f64> {
        self.scaler
            .transform_row(&raw_features(&self.encoder, profile))
    }

    pub fn predict(&self, profile: &StudentProfile) -> Prediction {
        let z = self.standardized(profile);
        let logits = z.dot(&self.weights) + &self.intercept;
        let probs = softmax(&logits);

        let mut probabilities = Probabilities::default();
        let mut best = (self.classes.first().copied().unwrap_or(RiskLevel::Medium), 0.0);
        for (level, p) in self.classes.iter().zip(probs.iter()) {
            probabilities.set(*level, *p);
            if *p > best.1 {
                best = (*level, *p);
            }
        }
        Prediction {
            risk: best.0,
            confidence: best.1.clamp(0.0, 1.0),
            probabilities,
        }
    }

    /// Per-feature contributions to the High-risk logit, largest magnitude
    /// first. For a linear model on standardized inputs the SHAP value of
    /// feature j is `w_j * z_j`.
    pub fn explain(&self, profile: &StudentProfile, top: usize) -> Vec<FeatureContribution> {
        let Some(column) = self.classes.iter().position(|c| *c == RiskLevel::High) else {
            tracing::warn!("model has no high-risk class; explanation unavailable");
            return Vec::new();
        };
        let z = self.standardized(profile);
        let weights = self.weights.column(column);

        let mut contributions: Vec<FeatureContribution> = FEATURE_COLUMNS
            .iter()
            .zip(z.iter().zip(weights.iter()))
            .map(|(name, (value, weight))| FeatureContribution {
                feature: display_name(name).to_string(),
                importance: value * weight,
            })
            .collect();
        contributions.sort_by(|a, b| {
            b.importance
                .abs()
                .partial_cmp(&a.importance.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        contributions.truncate(top);
        contributions
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_vec(self)?;
        std::fs::write(path, body).map_err(io_err)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::load_from_reader;
    use crate::data::tests::synthetic_csv;
    use tempfile::tempdir;

    fn trained() -> (RiskModel, Vec<LabelledStudent>) {
        let students = load_from_reader(synthetic_csv(200).as_bytes()).unwrap();
        (RiskModel::train(&students).unwrap(), students)
    }

    fn student_with_grades(students: &[LabelledStudent], risk: RiskLevel) -> StudentProfile {
        students
            .iter()
            .find(|s| s.risk == risk)
            .map(|s| s.profile.clone())
            .unwrap()
    }

    #[test]
    fn accuracy_counts_matches() {
        let predictions = [RiskLevel::High, RiskLevel::Low, RiskLevel::Low, RiskLevel::Medium];
        let targets = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low, RiskLevel::Medium];
        assert_eq!(calculate_accuracy(&predictions, &targets), 0.75);
        assert_eq!(calculate_accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn label_encoder_sorts_classes_and_defaults_unknown() {
        let students = load_from_reader(synthetic_csv(10).as_bytes()).unwrap();
        let profiles: Vec<&StudentProfile> = students.iter().map(|s| &s.profile).collect();
        let encoder = LabelEncoder::fit(&profiles);
        assert_eq!(encoder.classes("school"), ["GP".to_string(), "MS".to_string()]);
        assert_eq!(encoder.encode("school", "MS"), 1.0);
        assert_eq!(encoder.encode("school", "XX"), 0.0);
    }

    #[test]
    fn probabilities_form_a_distribution() {
        let (model, students) = trained();
        let prediction = model.predict(&students[0].profile);
        let p = prediction.probabilities;
        assert!((p.high + p.medium + p.low - 1.0).abs() < 1e-9);
        assert!(prediction.confidence >= 1.0 / 3.0);
        assert_eq!(prediction.confidence, p.get(prediction.risk));
    }

    #[test]
    fn separable_data_is_learned() {
        let (model, students) = trained();
        assert!(model.info().accuracy > 0.7, "accuracy {}", model.info().accuracy);
        let struggling = student_with_grades(&students, RiskLevel::High);
        let thriving = student_with_grades(&students, RiskLevel::Low);
        assert!(
            model.predict(&struggling).probabilities.high
                > model.predict(&thriving).probabilities.high
        );
    }

    #[test]
    fn explanation_is_sorted_and_bounded() {
        let (model, students) = trained();
        let explanation = model.explain(&students[3].profile, 10);
        assert_eq!(explanation.len(), 10);
        for pair in explanation.windows(2) {
            assert!(pair[0].importance.abs() >= pair[1].importance.abs());
        }
    }

    #[test]
    fn single_class_data_is_rejected() {
        let students: Vec<LabelledStudent> = load_from_reader(synthetic_csv(40).as_bytes())
            .unwrap()
            .into_iter()
            .filter(|s| s.risk == RiskLevel::High)
            .collect();
        assert!(matches!(
            RiskModel::train(&students),
            Err(ModelError::TooFewClasses(1))
        ));
    }

    #[test]
    fn artifact_round_trips_through_disk() {
        let (model, students) = trained();
        let dir = tempdir().unwrap();
        let path = dir.path().join("models/risk_model.json");
        model.save(&path).unwrap();
        let loaded = RiskModel::load(&path).unwrap();
        let profile = &students[7].profile;
        let (a, b) = (loaded.predict(profile), model.predict(profile));
        assert_eq!(a.risk, b.risk);
        assert!((a.confidence - b.confidence).abs() < 1e-9);
        assert_eq!(loaded.info().training_rows, model.info().training_rows);
    }
}
