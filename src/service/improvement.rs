// src/service/improvement.rs — Coaching suggestions, success patterns and performance trends
//
// Suggestions are rule-based: each rule watches one metric of a weak
// category. Nothing here calls the model.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::analyses;
use super::dashboard::{category_averages, label};
use crate::analysis::types::round2;
use crate::analysis::{AnalysisResult, Category};
use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource};
use crate::db::store::{SessionScores, HIGH_SCORE};
use crate::domain::{ts, Role};
use crate::infra::errors::DeskError;

/// Categories scoring below this get suggestions.
const SUGGESTION_SCORE: f64 = 7.0;
const DEFAULT_SUGGESTIONS: usize = 10;
const MAX_SUGGESTIONS: usize = 20;
const PRIORITY_ACTIONS: usize = 3;
const DEFAULT_WINDOW_DAYS: i64 = 30;
const MIN_WINDOW_DAYS: i64 = 7;
const MAX_WINDOW_DAYS: i64 = 365;
/// Share of high-scoring sessions that must excel in a category for it to count as a pattern.
const PATTERN_SHARE: f64 = 0.7;
/// Percent change beyond which a trend is improving or declining.
const TREND_BAND: f64 = 5.0;
const IMPROVEMENT_MARGIN: f64 = 0.5;
const ATTENTION_SCORE: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub category: Category,
    pub priority: Priority,
    pub title: String,
    pub description: String,
    pub expected_impact: f64,
    pub success_rate: f64,
}

struct Rule {
    category: Category,
    applies: fn(&AnalysisResult) -> bool,
    priority: Priority,
    title: &'static str,
    description: &'static str,
    expected_impact: f64,
    success_rate: f64,
}

const RULES: &[Rule] = &[
    Rule {
        category: Category::Questioning,
        applies: |r| r.questioning.open_question_ratio < 0.6,
        priority: Priority::High,
        title: "オープンクエスチョンの活用を増やす",
        description: "「はい・いいえ」で終わらない質問で顧客の本音を引き出しましょう。",
        expected_impact: 8.5,
        success_rate: 0.85,
    },
    Rule {
        category: Category::Questioning,
        applies: |r| r.questioning.customer_talk_time_ratio < 0.5,
        priority: Priority::Medium,
        title: "顧客の発話時間を増やす",
        description: "顧客に多く話してもらうほどニーズと不安を深く理解できます。",
        expected_impact: 7.8,
        success_rate: 0.75,
    },
    Rule {
        category: Category::Questioning,
        applies: |r| r.questioning.question_diversity < 5,
        priority: Priority::Medium,
        title: "質問のバリエーションを増やす",
        description: "異なる角度から質問し、顧客のニーズを多面的に把握しましょう。",
        expected_impact: 7.2,
        success_rate: 0.70,
    },
    Rule {
        category: Category::AnxietyHandling,
        applies: |r| r.anxiety_handling.anxiety_points_identified.len() < 3,
        priority: Priority::High,
        title: "不安要素をより詳細に特定する",
        description: "潜在的な不安も含めて、顧客の不安要素を丁寧に洗い出しましょう。",
        expected_impact: 8.8,
        success_rate: 0.90,
    },
    Rule {
        category: Category::AnxietyHandling,
        applies: |r| r.anxiety_handling.empathy_expressions < 3,
        priority: Priority::High,
        title: "共感表現を増やす",
        description: "不安の一つひとつに共感を示し、信頼関係を築きましょう。",
        expected_impact: 8.2,
        success_rate: 0.85,
    },
    Rule {
        category: Category::AnxietyHandling,
        applies: |r| r.anxiety_handling.solution_specificity < 0.7,
        priority: Priority::Medium,
        title: "より具体的な解決策を提示する",
        description: "抽象的な説明を避け、具体的で分かりやすい解決策を示しましょう。",
        expected_impact: 7.9,
        success_rate: 0.80,
    },
    Rule {
        category: Category::Closing,
        applies: |r| r.closing.timing_appropriateness < 0.7,
        priority: Priority::High,
        title: "クロージングのタイミングを改善する",
        description: "顧客の準備が整ったことを確かめてからクロージングに入りましょう。",
        expected_impact: 9.2,
        success_rate: 0.82,
    },
    Rule {
        category: Category::Closing,
        applies: |r| r.closing.urgency_creation < 0.6,
        priority: Priority::Medium,
        title: "適切な緊急性を演出する",
        description: "押し付けにならない範囲で、決断を後押しする理由を伝えましょう。",
        expected_impact: 7.5,
        success_rate: 0.75,
    },
    Rule {
        category: Category::Closing,
        applies: |r| r.closing.limitation_usage < 0.6,
        priority: Priority::Medium,
        title: "限定性を効果的に活用する",
        description: "期間や枠の限定を誠実に伝え、特別感を演出しましょう。",
        expected_impact: 7.8,
        success_rate: 0.78,
    },
    Rule {
        category: Category::Flow,
        applies: |r| r.flow.logical_structure < 0.7,
        priority: Priority::Medium,
        title: "より論理的な構成にする",
        description: "カウンセリングの流れを整理し、筋道の通った構成にしましょう。",
        expected_impact: 7.6,
        success_rate: 0.72,
    },
    Rule {
        category: Category::Flow,
        applies: |r| r.flow.smooth_transitions < 0.7,
        priority: Priority::Low,
        title: "話題転換をスムーズにする",
        description: "話題を変えるときは一言添えて、自然な流れを保ちましょう。",
        expected_impact: 6.8,
        success_rate: 0.68,
    },
];

/// Suggestions for the weak categories of one result, highest priority first
/// and, within a priority, highest expected impact first.
pub fn suggest(result: &AnalysisResult, focus: Option<Category>) -> Vec<Suggestion> {
    let mut out: Vec<Suggestion> = RULES
        .iter()
        .filter(|rule| focus.map_or(true, |f| f == rule.category))
        .filter(|rule| result.analyzed_categories.contains(&rule.category))
        .filter(|rule| result.score_of(rule.category) < SUGGESTION_SCORE)
        .filter(|rule| (rule.applies)(result))
        .map(|rule| Suggestion {
            category: rule.category,
            priority: rule.priority,
            title: rule.title.to_string(),
            description: rule.description.to_string(),
            expected_impact: rule.expected_impact,
            success_rate: rule.success_rate,
        })
        .collect();
    out.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.expected_impact.total_cmp(&a.expected_impact))
    });
    out
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuggestionQuery {
    pub focus_category: Option<Category>,
    pub max_suggestions: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImprovementPlan {
    pub analysis_id: String,
    pub overall_score: f64,
    pub suggestions: Vec<Suggestion>,
    /// The first high-priority suggestions, for the top of the coaching sheet.
    pub priority_actions: Vec<Suggestion>,
    pub success_patterns: SuccessPatterns,
}

pub async fn suggestions(
    ctx: &AppContext,
    caller: &Principal,
    analysis_id: &str,
    query: SuggestionQuery,
) -> Result<ImprovementPlan, DeskError> {
    let max = query.max_suggestions.unwrap_or(DEFAULT_SUGGESTIONS);
    if !(1..=MAX_SUGGESTIONS).contains(&max) {
        return Err(DeskError::Validation(format!(
            "max_suggestions must be between 1 and {MAX_SUGGESTIONS}"
        )));
    }
    let outcome = analyses::result(ctx, caller, analysis_id).await?;

    let mut suggestions = suggest(&outcome.result, query.focus_category);
    suggestions.truncate(max);
    let priority_actions = suggestions
        .iter()
        .filter(|s| s.priority == Priority::High)
        .take(PRIORITY_ACTIONS)
        .cloned()
        .collect();

    let aid = analysis_id.to_string();
    let clinic_id = ctx
        .store
        .call(move |s| {
            let task = s.get_analysis(&aid)?;
            let session = match task.and_then(|t| t.session_id) {
                Some(sid) => s.get_session(&sid)?,
                None => None,
            };
            Ok(session.map(|session| session.clinic_id))
        })
        .await?;
    let since = ts(Utc::now() - Duration::days(DEFAULT_WINDOW_DAYS));
    let window = since.clone();
    let results = ctx
        .store
        .call(move |s| Ok(s.high_score_results(clinic_id.as_deref(), None, &window)?))
        .await?;

    Ok(ImprovementPlan {
        analysis_id: outcome.task_id,
        overall_score: outcome.result.overall_score,
        suggestions,
        priority_actions,
        success_patterns: detect_patterns(&results, DEFAULT_WINDOW_DAYS),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessPattern {
    pub category: Category,
    pub name: String,
    pub description: String,
    /// Share of high-scoring sessions that also excelled in this category.
    pub success_rate: f64,
    pub usage_frequency: usize,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuccessPatterns {
    pub patterns: Vec<SuccessPattern>,
    pub total_patterns: usize,
    pub average_success_rate: f64,
    pub average_effectiveness: f64,
    pub period_days: i64,
    pub sessions_considered: usize,
}

fn pattern_meta(category: Category) -> Option<(&'static str, &'static str, f64)> {
    match category {
        Category::Questioning => Some((
            "効果的な質問技法",
            "オープンクエスチョンと深掘り質問を組み合わせている",
            8.5,
        )),
        Category::AnxietyHandling => Some((
            "共感的な不安対応",
            "十分な共感を示したうえで具体的な解決策を提示している",
            8.3,
        )),
        Category::Closing => Some((
            "適切なタイミングでのクロージング",
            "顧客の準備状況を見極めてからクロージングしている",
            8.7,
        )),
        Category::Flow => None,
    }
}

/// Patterns shared by high-scoring sessions: a category counts when at least
/// [`PATTERN_SHARE`] of them also scored high in it.
pub fn detect_patterns(results: &[AnalysisResult], period_days: i64) -> SuccessPatterns {
    let mut patterns = Vec::new();
    if !results.is_empty() {
        for category in Category::ALL {
            let Some((name, description, effectiveness)) = pattern_meta(category) else {
                continue;
            };
            let excelled = results
                .iter()
                .filter(|r| r.score_of(category) >= HIGH_SCORE)
                .count();
            let share = excelled as f64 / results.len() as f64;
            if share >= PATTERN_SHARE {
                patterns.push(SuccessPattern {
                    category,
                    name: name.to_string(),
                    description: description.to_string(),
                    success_rate: round2(share),
                    usage_frequency: excelled,
                    effectiveness,
                });
            }
        }
    }
    let mean = |f: fn(&SuccessPattern) -> f64| {
        if patterns.is_empty() {
            0.0
        } else {
            round2(patterns.iter().map(f).sum::<f64>() / patterns.len() as f64)
        }
    };
    SuccessPatterns {
        total_patterns: patterns.len(),
        average_success_rate: mean(|p| p.success_rate),
        average_effectiveness: mean(|p| p.effectiveness),
        period_days,
        sessions_considered: results.len(),
        patterns,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatternQuery {
    /// Admins may pick any clinic or none; staff default to their own.
    pub clinic_id: Option<String>,
    pub counselor_id: Option<String>,
    pub days: Option<i64>,
}

fn window_days(days: Option<i64>) -> Result<i64, DeskError> {
    let days = days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if !(MIN_WINDOW_DAYS..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(DeskError::Validation(format!(
            "days must be between {MIN_WINDOW_DAYS} and {MAX_WINDOW_DAYS}"
        )));
    }
    Ok(days)
}

pub async fn success_patterns(
    ctx: &AppContext,
    caller: &Principal,
    query: PatternQuery,
) -> Result<SuccessPatterns, DeskError> {
    let clinic_id = match caller.role {
        Role::Admin => query.clinic_id,
        _ => query.clinic_id.or_else(|| caller.clinic_id.clone()),
    };
    let res = clinic_id.as_deref().map(Resource::clinic).unwrap_or_default();
    authorize(caller, Action::ViewSuccessPatterns, &res)?;
    let days = window_days(query.days)?;

    let since = ts(Utc::now() - Duration::days(days));
    let counselor_id = query.counselor_id;
    let results = ctx
        .store
        .call(move |s| {
            Ok(s.high_score_results(clinic_id.as_deref(), counselor_id.as_deref(), &since)?)
        })
        .await?;
    Ok(detect_patterns(&results, days))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceTrend {
    pub counselor_id: String,
    pub period_days: i64,
    pub total_sessions: usize,
    pub first_session_date: Option<String>,
    pub last_session_date: Option<String>,
    pub early_average: f64,
    pub recent_average: f64,
    /// Percent change from the early half to the recent half.
    pub improvement_rate: f64,
    pub direction: TrendDirection,
    pub key_improvements: Vec<String>,
    pub areas_needing_attention: Vec<String>,
    pub recommendations: Vec<String>,
}

fn mean_score(sessions: &[SessionScores]) -> f64 {
    let scores: Vec<f64> = sessions.iter().filter_map(|s| s.overall_score).collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn half_averages(sessions: &[SessionScores]) -> BTreeMap<Category, f64> {
    let results: Vec<AnalysisResult> = sessions.iter().filter_map(|s| s.result.clone()).collect();
    category_averages(&results)
}

/// Compare the earlier half of a counselor's sessions (oldest first) with the
/// recent half.
pub fn trend(counselor_id: &str, sessions: &[SessionScores], period_days: i64) -> PerformanceTrend {
    let (early, recent) = sessions.split_at(sessions.len() / 2);
    let early_average = mean_score(early);
    let recent_average = mean_score(recent);
    let improvement_rate = if early_average > 0.0 {
        (recent_average - early_average) / early_average * 100.0
    } else {
        0.0
    };
    let direction = if improvement_rate > TREND_BAND {
        TrendDirection::Improving
    } else if improvement_rate < -TREND_BAND {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };

    let early_by_category = half_averages(early);
    let recent_by_category = half_averages(recent);
    let key_improvements = recent_by_category
        .iter()
        .filter(|(c, now)| {
            early_by_category
                .get(*c)
                .is_some_and(|before| **now > before + IMPROVEMENT_MARGIN)
        })
        .map(|(c, _)| label(*c).to_string())
        .collect();
    let areas_needing_attention = recent_by_category
        .iter()
        .filter(|(_, score)| **score < ATTENTION_SCORE)
        .map(|(c, _)| label(*c).to_string())
        .collect();

    let recommendations = match direction {
        TrendDirection::Declining => vec!["スキル向上トレーニングの実施".to_string()],
        TrendDirection::Improving => vec!["現在の成功パターンの維持".to_string()],
        TrendDirection::Stable => vec![],
    };

    PerformanceTrend {
        counselor_id: counselor_id.to_string(),
        period_days,
        total_sessions: sessions.len(),
        first_session_date: sessions.first().map(|s| s.session_date.clone()),
        last_session_date: sessions.last().map(|s| s.session_date.clone()),
        early_average: round2(early_average),
        recent_average: round2(recent_average),
        improvement_rate: round2(improvement_rate),
        direction,
        key_improvements,
        areas_needing_attention,
        recommendations,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrendQuery {
    pub days: Option<i64>,
}

pub async fn performance_trend(
    ctx: &AppContext,
    caller: &Principal,
    counselor_id: &str,
    query: TrendQuery,
) -> Result<PerformanceTrend, DeskError> {
    let cid = counselor_id.to_string();
    let user = ctx
        .store
        .call(move |s| {
            s.get_user(&cid)?
                .ok_or_else(|| DeskError::not_found("user", &cid).into())
        })
        .await?;
    let res = Resource {
        clinic_id: user.clinic_id.as_deref(),
        owner_id: Some(&user.id),
    };
    authorize(caller, Action::ViewCounselorDashboard, &res)?;
    let days = window_days(query.days)?;

    let since = ts(Utc::now() - Duration::days(days));
    let cid = user.id.clone();
    let sessions = ctx
        .store
        .call(move |s| Ok(s.counselor_session_scores(&cid, &since)?))
        .await?;
    tracing::debug!(counselor_id = %user.id, sessions = sessions.len(), "Computing performance trend");
    Ok(trend(&user.id, &sessions, days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{AnxietyHandlingResult, ClosingResult, FlowResult, QuestioningResult};

    fn result(scores: [f64; 4]) -> AnalysisResult {
        AnalysisResult {
            overall_score: 0.0,
            questioning: QuestioningResult {
                score: scores[0],
                open_question_ratio: 0.8,
                customer_talk_time_ratio: 0.6,
                question_diversity: 6,
                ..Default::default()
            },
            anxiety_handling: AnxietyHandlingResult {
                score: scores[1],
                anxiety_points_identified: vec!["価格".into(), "痛み".into(), "効果".into()],
                empathy_expressions: 4,
                solution_specificity: 0.8,
                ..Default::default()
            },
            closing: ClosingResult {
                score: scores[2],
                timing_appropriateness: 0.8,
                urgency_creation: 0.7,
                limitation_usage: 0.7,
                ..Default::default()
            },
            flow: FlowResult {
                score: scores[3],
                logical_structure: 0.8,
                smooth_transitions: 0.8,
                ..Default::default()
            },
            analyzed_categories: Category::ALL.to_vec(),
            session_summary: String::new(),
            key_strengths: vec![],
            critical_improvements: vec![],
            analyzed_at: Utc::now(),
        }
    }

    fn titles(suggestions: &[Suggestion]) -> Vec<&str> {
        suggestions.iter().map(|s| s.title.as_str()).collect()
    }

    #[test]
    fn test_strong_categories_get_no_suggestions() {
        let mut r = result([7.0, 8.0, 9.0, 7.5]);
        r.questioning.open_question_ratio = 0.1;
        r.closing.timing_appropriateness = 0.1;
        assert!(suggest(&r, None).is_empty());
    }

    #[test]
    fn test_suggestions_ranked_by_priority_then_impact() {
        let mut r = result([5.0, 5.0, 5.0, 5.0]);
        r.questioning.customer_talk_time_ratio = 0.3;
        r.anxiety_handling.empathy_expressions = 1;
        r.closing.timing_appropriateness = 0.5;
        r.flow.smooth_transitions = 0.5;
        r.flow.logical_structure = 0.5;
        let suggestions = suggest(&r, None);
        assert_eq!(
            titles(&suggestions),
            vec![
                "クロージングのタイミングを改善する",
                "共感表現を増やす",
                "顧客の発話時間を増やす",
                "より論理的な構成にする",
                "話題転換をスムーズにする",
            ]
        );
        assert_eq!(suggestions[0].priority, Priority::High);
        assert_eq!(suggestions[4].priority, Priority::Low);
    }

    #[test]
    fn test_focus_and_unanalyzed_categories() {
        let mut r = result([5.0, 5.0, 9.0, 9.0]);
        r.questioning.question_diversity = 2;
        r.anxiety_handling.anxiety_points_identified.clear();
        let focused = suggest(&r, Some(Category::AnxietyHandling));
        assert_eq!(titles(&focused), vec!["不安要素をより詳細に特定する"]);

        r.analyzed_categories = vec![Category::AnxietyHandling];
        assert_eq!(titles(&suggest(&r, None)), vec!["不安要素をより詳細に特定する"]);
    }

    #[test]
    fn test_detect_patterns() {
        let results = vec![
            result([9.0, 8.5, 7.0, 9.0]),
            result([8.0, 8.0, 9.0, 9.0]),
            result([8.5, 6.0, 7.5, 9.0]),
        ];
        let found = detect_patterns(&results, 30);
        assert_eq!(found.total_patterns, 1);
        let pattern = &found.patterns[0];
        assert_eq!(pattern.category, Category::Questioning);
        assert_eq!(pattern.name, "効果的な質問技法");
        assert_eq!(pattern.success_rate, 1.0);
        assert_eq!(pattern.usage_frequency, 3);
        assert_eq!(found.average_effectiveness, 8.5);
        assert_eq!(found.sessions_considered, 3);

        let none = detect_patterns(&[], 7);
        assert_eq!(none.total_patterns, 0);
        assert_eq!(none.average_success_rate, 0.0);
        assert_eq!(none.period_days, 7);
    }

    fn session(score: Option<f64>, categories: Option<[f64; 4]>) -> SessionScores {
        SessionScores {
            session_date: ts(Utc::now()),
            overall_score: score,
            result: categories.map(result),
        }
    }

    #[test]
    fn test_trend_improving() {
        let sessions = vec![
            session(Some(6.0), Some([6.0, 5.0, 7.0, 7.0])),
            session(None, None),
            session(Some(8.0), Some([8.0, 5.2, 7.0, 7.0])),
            session(Some(8.0), None),
        ];
        let t = trend("u1", &sessions, 30);
        assert_eq!(t.total_sessions, 4);
        assert_eq!(t.early_average, 6.0);
        assert_eq!(t.recent_average, 8.0);
        assert_eq!(t.improvement_rate, 33.33);
        assert_eq!(t.direction, TrendDirection::Improving);
        assert_eq!(t.key_improvements, vec!["質問技法".to_string()]);
        assert_eq!(t.areas_needing_attention, vec!["不安対応".to_string()]);
        assert_eq!(t.recommendations, vec!["現在の成功パターンの維持".to_string()]);
    }

    #[test]
    fn test_trend_declining_and_empty() {
        let sessions = vec![session(Some(8.0), None), session(Some(7.0), None)];
        let t = trend("u1", &sessions, 30);
        assert_eq!(t.improvement_rate, -12.5);
        assert_eq!(t.direction, TrendDirection::Declining);

        let t = trend("u1", &[], 30);
        assert_eq!(t.direction, TrendDirection::Stable);
        assert_eq!(t.improvement_rate, 0.0);
        assert_eq!(t.early_average, 0.0);
        assert!(t.recommendations.is_empty());
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(window_days(None).unwrap(), 30);
        assert!(window_days(Some(6)).is_err());
        assert!(window_days(Some(366)).is_err());
    }
}
