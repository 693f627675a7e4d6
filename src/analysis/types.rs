// src/analysis/types.rs — Typed analysis results and score weighting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::infra::errors::DeskError;

/// The four evaluated aspects of a counseling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Questioning,
    AnxietyHandling,
    Closing,
    Flow,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Questioning,
        Category::AnxietyHandling,
        Category::Closing,
        Category::Flow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Questioning => "questioning",
            Category::AnxietyHandling => "anxiety_handling",
            Category::Closing => "closing",
            Category::Flow => "flow",
        }
    }

    /// Weight in the full-analysis overall score. Sums to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Category::Questioning => 0.25,
            Category::AnxietyHandling => 0.25,
            Category::Closing => 0.30,
            Category::Flow => 0.20,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "questioning" => Ok(Category::Questioning),
            "anxiety_handling" | "anxiety" => Ok(Category::AnxietyHandling),
            "closing" => Ok(Category::Closing),
            "flow" => Ok(Category::Flow),
            other => Err(DeskError::Validation(format!(
                "unknown analysis category '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Full,
    Quick,
    Specific,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Full => "full",
            AnalysisType::Quick => "quick",
            AnalysisType::Specific => "specific",
        }
    }

    /// Rough wall-clock estimate shown to clients while polling.
    pub fn estimated_secs(&self) -> i64 {
        match self {
            AnalysisType::Full => 180,
            AnalysisType::Quick => 60,
            AnalysisType::Specific => 120,
        }
    }
}

impl FromStr for AnalysisType {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(AnalysisType::Full),
            "quick" => Ok(AnalysisType::Quick),
            "specific" => Ok(AnalysisType::Specific),
            other => Err(DeskError::Validation(format!(
                "unknown analysis type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestioningResult {
    pub score: f64,
    pub open_question_ratio: f64,
    pub customer_talk_time_ratio: f64,
    pub question_diversity: u32,
    pub effective_questions: Vec<String>,
    pub improvements: Vec<String>,
}

impl Default for QuestioningResult {
    fn default() -> Self {
        Self {
            score: 5.0,
            open_question_ratio: 0.5,
            customer_talk_time_ratio: 0.5,
            question_diversity: 5,
            effective_questions: Vec::new(),
            improvements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnxietyHandlingResult {
    pub score: f64,
    pub anxiety_points_identified: Vec<String>,
    pub empathy_expressions: u32,
    pub solution_specificity: f64,
    pub anxiety_resolution_confirmed: bool,
    pub improvements: Vec<String>,
}

impl Default for AnxietyHandlingResult {
    fn default() -> Self {
        Self {
            score: 5.0,
            anxiety_points_identified: Vec::new(),
            empathy_expressions: 0,
            solution_specificity: 0.5,
            anxiety_resolution_confirmed: false,
            improvements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosingResult {
    pub score: f64,
    pub timing_appropriateness: f64,
    pub urgency_creation: f64,
    pub limitation_usage: f64,
    pub price_presentation_method: String,
    pub objection_handling: Vec<String>,
    pub contract_probability: f64,
    pub improvements: Vec<String>,
}

impl Default for ClosingResult {
    fn default() -> Self {
        Self {
            score: 5.0,
            timing_appropriateness: 0.5,
            urgency_creation: 0.5,
            limitation_usage: 0.5,
            price_presentation_method: "standard".into(),
            objection_handling: Vec::new(),
            contract_probability: 0.5,
            improvements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub score: f64,
    pub logical_structure: f64,
    pub smooth_transitions: f64,
    pub customer_pace_consideration: f64,
    pub key_point_emphasis: f64,
    pub session_satisfaction_prediction: f64,
    pub improvements: Vec<String>,
}

impl Default for FlowResult {
    fn default() -> Self {
        Self {
            score: 5.0,
            logical_structure: 0.5,
            smooth_transitions: 0.5,
            customer_pace_consideration: 0.5,
            key_point_emphasis: 0.5,
            session_satisfaction_prediction: 0.5,
            improvements: Vec::new(),
        }
    }
}

/// Full structured result stored on a completed analysis task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub overall_score: f64,
    pub questioning: QuestioningResult,
    pub anxiety_handling: AnxietyHandlingResult,
    pub closing: ClosingResult,
    pub flow: FlowResult,
    /// Categories that were actually sent to the model.
    pub analyzed_categories: Vec<Category>,
    pub session_summary: String,
    pub key_strengths: Vec<String>,
    pub critical_improvements: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn score_of(&self, category: Category) -> f64 {
        match category {
            Category::Questioning => self.questioning.score,
            Category::AnxietyHandling => self.anxiety_handling.score,
            Category::Closing => self.closing.score,
            Category::Flow => self.flow.score,
        }
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Declared weighted combination of the four category scores.
pub fn weighted_overall(
    questioning: f64,
    anxiety_handling: f64,
    closing: f64,
    flow: f64,
) -> f64 {
    round2(
        questioning * Category::Questioning.weight()
            + anxiety_handling * Category::AnxietyHandling.weight()
            + closing * Category::Closing.weight()
            + flow * Category::Flow.weight(),
    )
}

/// Plain mean used by quick and specific analyses.
pub fn mean_overall(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    round2(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Recompute the overall score a result should carry for its analysis type.
pub fn expected_overall(result: &AnalysisResult, kind: AnalysisType) -> f64 {
    match kind {
        AnalysisType::Full => weighted_overall(
            result.questioning.score,
            result.anxiety_handling.score,
            result.closing.score,
            result.flow.score,
        ),
        AnalysisType::Quick | AnalysisType::Specific => {
            let scores: Vec<f64> = result
                .analyzed_categories
                .iter()
                .map(|c| result.score_of(*c))
                .collect();
            mean_overall(&scores)
        }
    }
}
