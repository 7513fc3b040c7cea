use serde::{Deserialize, Serialize};

use crate::data::GradeAverages;
use crate::profile::{FeatureContribution, Probabilities, RiskLevel, StudentProfile};

pub const POSITIVE_COLOR: &str = "rgba(220, 53, 69, 0.8)";
pub const NEGATIVE_COLOR: &str = "rgba(40, 167, 69, 0.8)";
pub const STUDENT_COLOR: &str = "rgba(54, 162, 235, 1)";
pub const AVERAGE_COLOR: &str = "rgba(201, 203, 207, 1)";

fn risk_color(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::High => "rgba(220, 53, 69, 0.8)",
        RiskLevel::Medium => "rgba(255, 193, 7, 0.8)",
        RiskLevel::Low => "rgba(40, 167, 69, 0.8)",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataset {
    pub label: String,
    pub data: Vec<f64>,
    pub background_color: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
}

/// Chart.js configuration: `{type, data: {labels, datasets}, options}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub data: ChartData,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSet {
    pub shap: ChartSpec,
    pub grades: ChartSpec,
    pub probabilities: ChartSpec,
}

impl ChartSet {
    pub fn build(
        profile: &StudentProfile,
        risk: RiskLevel,
        probabilities: &Probabilities,
        shap_values: &[FeatureContribution],
        averages: Option<GradeAverages>,
    ) -> Self {
        Self {
            shap: shap_chart(shap_values),
            grades: grade_chart(profile, risk.estimated_grade(), averages),
            probabilities: probability_chart(probabilities),
        }
    }
}

/// Horizontal bars, one per factor; red pushes towards high risk, green away.
pub fn shap_chart(contributions: &[FeatureContribution]) -> ChartSpec {
    let colors = contributions
        .iter()
        .map(|c| {
            let color = if c.importance >= 0.0 {
                POSITIVE_COLOR
            } else {
                NEGATIVE_COLOR
            };
            color.to_string()
        })
        .collect();
    ChartSpec {
        kind: ChartKind::Bar,
        data: ChartData {
            labels: contributions.iter().map(|c| c.feature.clone()).collect(),
            datasets: vec![ChartDataset {
                label: "Impact on risk".to_string(),
                data: contributions.iter().map(|c| c.importance).collect(),
                background_color: colors,
                border_color: None,
            }],
        },
        options: serde_json::json!({ "indexAxis": "y", "plugins": { "legend": { "display": false } } }),
    }
}

pub fn grade_chart(
    profile: &StudentProfile,
    predicted_g3: u32,
    averages: Option<GradeAverages>,
) -> ChartSpec {
    let labels = vec![
        "G1".to_string(),
        "G2".to_string(),
        "Predicted G3".to_string(),
    ];
    let mut datasets = vec![ChartDataset {
        label: "Student".to_string(),
        data: vec![profile.g1 as f64, profile.g2 as f64, predicted_g3 as f64],
        background_color: vec![STUDENT_COLOR.to_string()],
        border_color: Some(STUDENT_COLOR.to_string()),
    }];
    if let Some(avg) = averages {
        datasets.push(ChartDataset {
            label: "Class average".to_string(),
            data: vec![avg.g1, avg.g2, (avg.g1 + avg.g2) / 2.0],
            background_color: vec![AVERAGE_COLOR.to_string()],
            border_color: Some(AVERAGE_COLOR.to_string()),
        });
    }
    ChartSpec {
        kind: ChartKind::Line,
        data: ChartData { labels, datasets },
        options: serde_json::json!({ "scales": { "y": { "min": 0, "max": 20 } } }),
    }
}

pub fn probability_chart(probabilities: &Probabilities) -> ChartSpec {
    ChartSpec {
        kind: ChartKind::Bar,
        data: ChartData {
            labels: RiskLevel::ALL
                .iter()
                .map(|level| format!("{} risk", level.as_str()))
                .collect(),
            datasets: vec![ChartDataset {
                label: "Probability".to_string(),
                data: RiskLevel::ALL
                    .iter()
                    .map(|level| probabilities.get(*level))
                    .collect(),
                background_color: RiskLevel::ALL
                    .iter()
                    .map(|level| risk_color(*level).to_string())
                    .collect(),
                border_color: None,
            }],
        },
        options: serde_json::json!({ "scales": { "y": { "min": 0, "max": 1 } } }),
    }
}

/// Plain-text rendering of the first dataset as horizontal bars.
pub fn render_text(chart: &ChartSpec, width: usize) -> String {
    let Some(dataset) = chart.data.datasets.first() else {
        return String::new();
    };
    let max = dataset
        .data
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let label_width = chart
        .data
        .labels
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (label, value) in chart.data.labels.iter().zip(dataset.data.iter()) {
        let len = if max > 0.0 {
            ((value.abs() / max) * width as f64).round() as usize
        } else {
            0
        };
        let glyph = if *value < 0.0 { '-' } else { '#' };
        let bar: String = std::iter::repeat(glyph).take(len).collect();
        out.push_str(&format!("{label:<label_width$} |{bar:<width$}| {value:.3}\n"));
    }
    out
}
