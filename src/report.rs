//! Printable assessment summary rendered as a small PDF document.
//!
//! The writer emits PDF 1.4 directly: one Helvetica font, text-only content
//! streams, and a cross-reference table with exact byte offsets. Text is
//! limited to printable ASCII; anything else is replaced with `?`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::profile::FeatureContribution;

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN: u32 = 56;
const LINE_HEIGHT: u32 = 14;
const WRAP_COLUMNS: usize = 90;
const LINES_PER_PAGE: usize = ((PAGE_HEIGHT - 2 * MARGIN) / LINE_HEIGHT) as usize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportRequest {
    #[serde(default)]
    pub predicted_grade: Option<Value>,
    #[serde(default)]
    pub risk_category: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub risk_descriptor: Option<String>,
    #[serde(default)]
    pub mentoring_advice: Option<String>,
    #[serde(default)]
    pub shap_values: Vec<FeatureContribution>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub predicted_grade: String,
    pub risk_category: String,
    pub confidence: f64,
    pub risk_descriptor: String,
    pub mentoring_advice: String,
    pub shap_values: Vec<FeatureContribution>,
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Report {
    pub fn from_request(request: ReportRequest) -> Result<Self, AppError> {
        let predicted_grade = request.predicted_grade.as_ref().and_then(scalar_text);
        let risk_category = request
            .risk_category
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        let mut missing = Vec::new();
        if predicted_grade.is_none() {
            missing.push("predicted_grade");
        }
        if risk_category.is_none() {
            missing.push("risk_category");
        }
        let (Some(predicted_grade), Some(risk_category)) = (predicted_grade, risk_category) else {
            return Err(AppError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        };

        Ok(Self {
            predicted_grade,
            risk_category,
            confidence: request.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
            risk_descriptor: request.risk_descriptor.unwrap_or_default(),
            mentoring_advice: request.mentoring_advice.unwrap_or_default(),
            shap_values: request.shap_values,
        })
    }

    fn lines(&self, generated_at: DateTime<Utc>) -> Vec<String> {
        let mut lines = vec![
            "Student Risk Assessment Report".to_string(),
            format!("Generated {}", generated_at.format("%Y-%m-%d %H:%M UTC")),
            String::new(),
            format!("Predicted final grade: {}/20", self.predicted_grade),
            format!(
                "Risk category: {} ({:.1}% confidence)",
                self.risk_category,
                self.confidence * 100.0
            ),
        ];
        if !self.risk_descriptor.is_empty() {
            lines.extend(wrap(&self.risk_descriptor, WRAP_COLUMNS));
        }

        if !self.shap_values.is_empty() {
            lines.push(String::new());
            lines.push("Key factors".to_string());
            for factor in &self.shap_values {
                let effect = if factor.importance >= 0.0 {
                    "raises risk"
                } else {
                    "lowers risk"
                };
                lines.push(format!(
                    "  {:<32} {:+.3}  {}",
                    factor.feature, factor.importance, effect
                ));
            }
        }

        if !self.mentoring_advice.trim().is_empty() {
            lines.push(String::new());
            lines.push("Mentoring advice".to_string());
            for paragraph in self.mentoring_advice.lines() {
                let plain = paragraph.trim().trim_start_matches('#').trim().replace("**", "");
                if plain.is_empty() {
                    lines.push(String::new());
                } else {
                    lines.extend(wrap(&plain, WRAP_COLUMNS));
                }
            }
        }
        lines
    }

    pub fn render_pdf(&self, generated_at: DateTime<Utc>) -> Vec<u8> {
        let lines = self.lines(generated_at);
        let pages: Vec<&[String]> = lines.chunks(LINES_PER_PAGE).collect();
        write_pdf(&pages)
    }
}

pub fn filename(generated_at: DateTime<Utc>) -> String {
    format!("student_report_{}.pdf", generated_at.format("%Y%m%d_%H%M%S"))
}

/// Greedy word wrap; words longer than `width` are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..width).collect());
        }
        let word: String = word.into_iter().collect();
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn pdf_text(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn content_stream(lines: &[String]) -> String {
    let mut stream = format!(
        "BT\n/F1 11 Tf\n{LINE_HEIGHT} TL\n{MARGIN} {} Td\n",
        PAGE_HEIGHT - MARGIN
    );
    for line in lines {
        stream.push_str(&format!("({}) Tj T*\n", pdf_text(line)));
    }
    stream.push_str("ET\n");
    stream
}

fn write_pdf(pages: &[&[String]]) -> Vec<u8> {
    let empty: [String; 0] = [];
    let pages: Vec<&[String]> = if pages.is_empty() {
        vec![&empty[..]]
    } else {
        pages.to_vec()
    };

    // 1 catalog, 2 page tree, 3 font, then a (page, content) pair per page.
    let page_id = |i: usize| 4 + 2 * i;
    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", page_id(i))).collect();

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        ),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];
    for (i, lines) in pages.iter().enumerate() {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            page_id(i) + 1
        ));
        let stream = content_stream(lines);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{stream}endstream",
            stream.len()
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }
    let xref = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for offset in offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        objects.len() + 1
    ));
    out.into_bytes()
}
