// src/analysis/parser.rs — Lenient JSON extraction and clamped result mapping

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::types::{
    AnxietyHandlingResult, Category, ClosingResult, FlowResult, QuestioningResult,
};
use crate::infra::errors::DeskError;

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json|JSON)?\s*").expect("fence pattern"))
}

fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("trailing comma pattern"))
}

/// Parse a model reply into a JSON object, repairing common damage first
/// when the direct parse fails.
pub fn parse_json_response(raw: &str) -> Result<Value, DeskError> {
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(v);
    }
    let repaired = repair_json(raw);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(_) => Err(DeskError::Parse("response is not a JSON object".into())),
        Err(e) => {
            let preview: String = raw.chars().take(200).collect();
            tracing::warn!(error = %e, preview = %preview, "Model response unparseable after repair");
            Err(DeskError::Parse(e.to_string()))
        }
    }
}

/// Strip code fences and surrounding prose, drop trailing commas, and close
/// any brackets left open by a truncated reply.
pub fn repair_json(raw: &str) -> String {
    let mut s = fence_open().replace_all(raw, "").replace("```", "");
    s = s.trim().to_string();

    match s.find('{') {
        Some(start) => s = s[start..].to_string(),
        None => s.insert(0, '{'),
    }
    if let Some(end) = s.rfind('}') {
        // drop prose after a complete object
        if balance(&s[..=end]).is_empty() {
            s.truncate(end + 1);
        }
    }

    let mut s = s.trim_end().trim_end_matches(',').to_string();
    for closer in balance(&s).into_iter().rev() {
        s = s.trim_end().trim_end_matches(',').to_string();
        s.push(closer);
    }
    trailing_comma().replace_all(&s, "$1").into_owned()
}

/// Closers still owed at the end of `s`, outermost first. Ignores brackets
/// inside string literals.
fn balance(s: &str) -> Vec<char> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    stack
}

fn num(v: &Value, key: &str) -> Option<f64> {
    let n = match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn score(v: &Value, key: &str, default: f64) -> f64 {
    num(v, key).unwrap_or(default).clamp(1.0, 10.0)
}

fn ratio(v: &Value, key: &str, default: f64) -> f64 {
    num(v, key).unwrap_or(default).clamp(0.0, 1.0)
}

fn count(v: &Value, key: &str, default: u32) -> u32 {
    num(v, key)
        .map(|n| n.round().clamp(0.0, u32::MAX as f64) as u32)
        .unwrap_or(default)
}

fn flag(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn text(v: &Value, key: &str, default: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// A list of strings; a bare string becomes a one-element list.
pub fn strings(v: &Value, key: &str) -> Vec<String> {
    match v.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|i| match i {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

pub fn questioning(v: &Value) -> QuestioningResult {
    let d = QuestioningResult::default();
    QuestioningResult {
        score: score(v, "score", d.score),
        open_question_ratio: ratio(v, "open_question_ratio", d.open_question_ratio),
        customer_talk_time_ratio: ratio(v, "customer_talk_time_ratio", d.customer_talk_time_ratio),
        question_diversity: count(v, "question_diversity", d.question_diversity),
        effective_questions: strings(v, "effective_questions"),
        improvements: strings(v, "improvements"),
    }
}

pub fn anxiety_handling(v: &Value) -> AnxietyHandlingResult {
    let d = AnxietyHandlingResult::default();
    AnxietyHandlingResult {
        score: score(v, "score", d.score),
        anxiety_points_identified: strings(v, "anxiety_points_identified"),
        empathy_expressions: count(v, "empathy_expressions", d.empathy_expressions),
        solution_specificity: ratio(v, "solution_specificity", d.solution_specificity),
        anxiety_resolution_confirmed: flag(v, "anxiety_resolution_confirmed"),
        improvements: strings(v, "improvements"),
    }
}

pub fn closing(v: &Value) -> ClosingResult {
    let d = ClosingResult::default();
    ClosingResult {
        score: score(v, "score", d.score),
        timing_appropriateness: ratio(v, "timing_appropriateness", d.timing_appropriateness),
        urgency_creation: ratio(v, "urgency_creation", d.urgency_creation),
        limitation_usage: ratio(v, "limitation_usage", d.limitation_usage),
        price_presentation_method: text(v, "price_presentation_method", &d.price_presentation_method),
        objection_handling: strings(v, "objection_handling"),
        contract_probability: ratio(v, "contract_probability", d.contract_probability),
        improvements: strings(v, "improvements"),
    }
}

pub fn flow(v: &Value) -> FlowResult {
    let d = FlowResult::default();
    FlowResult {
        score: score(v, "score", d.score),
        logical_structure: ratio(v, "logical_structure", d.logical_structure),
        smooth_transitions: ratio(v, "smooth_transitions", d.smooth_transitions),
        customer_pace_consideration: ratio(
            v,
            "customer_pace_consideration",
            d.customer_pace_consideration,
        ),
        key_point_emphasis: ratio(v, "key_point_emphasis", d.key_point_emphasis),
        session_satisfaction_prediction: ratio(
            v,
            "session_satisfaction_prediction",
            d.session_satisfaction_prediction,
        ),
        improvements: strings(v, "improvements"),
    }
}

/// Per-category scores from a quick-analysis reply (`<category>_score`).
pub fn quick_score(v: &Value, category: Category) -> f64 {
    score(v, &format!("{}_score", category.as_str()), 5.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        let v = parse_json_response(r#"{"score": 8}"#).unwrap();
        assert_eq!(v["score"], json!(8));
    }

    #[test]
    fn test_repair_fenced_with_trailing_comma() {
        let raw = "Here you go:\n```json\n{\"score\": 7.5, \"improvements\": [\"a\", \"b\",],}\n```\nThanks!";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["score"], json!(7.5));
        assert_eq!(v["improvements"], json!(["a", "b"]));
    }

    #[test]
    fn test_repair_truncated_reply() {
        let raw = r#"{"score": 6, "improvements": ["close earlier", "ask {more}""#;
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["improvements"][1], json!("ask {more}"));

        let missing_open = r#""score": 4, "improvements": []}"#;
        assert_eq!(parse_json_response(missing_open).unwrap()["score"], json!(4));
    }

    #[test]
    fn test_unparseable_is_parse_error() {
        let err = parse_json_response("I cannot evaluate this transcript.").unwrap_err();
        assert_eq!(err.code(), "ANALYSIS_PARSE_ERROR");
        assert!(parse_json_response("[1, 2]").is_err());
    }

    #[test]
    fn test_values_are_clamped() {
        let q = questioning(&json!({
            "score": 14,
            "open_question_ratio": 1.8,
            "customer_talk_time_ratio": -0.2,
            "question_diversity": "7",
            "effective_questions": "どのような点が気になりますか？"
        }));
        assert_eq!(q.score, 10.0);
        assert_eq!(q.open_question_ratio, 1.0);
        assert_eq!(q.customer_talk_time_ratio, 0.0);
        assert_eq!(q.question_diversity, 7);
        assert_eq!(q.effective_questions.len(), 1);

        let c = closing(&json!({"score": 0}));
        assert_eq!(c.score, 1.0);
        assert_eq!(c.price_presentation_method, "standard");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let f = flow(&json!({}));
        assert_eq!(f, FlowResult::default());
        let a = anxiety_handling(&json!({"anxiety_resolution_confirmed": "true"}));
        assert!(a.anxiety_resolution_confirmed);
        assert_eq!(quick_score(&json!({"closing_score": 6.5}), Category::Closing), 6.5);
    }

    #[test]
    fn test_non_finite_strings_take_defaults() {
        let d = FlowResult::default();
        let f = flow(&json!({"score": "NaN", "logical_structure": "inf"}));
        assert_eq!(f.score, d.score);
        assert_eq!(f.logical_structure, d.logical_structure);
        assert_eq!(quick_score(&json!({"flow_score": "-inf"}), Category::Flow), 5.0);
    }
}
