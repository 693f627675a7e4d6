// src/service/dashboard.rs — Role-filtered dashboard aggregates
//
// Everything is recomputed per request from the store; there is no cache.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::types::round2;
use crate::analysis::{AnalysisResult, Category};
use crate::app::AppContext;
use crate::authz::{authorize, Action, Principal, Resource, Scope};
use crate::db::store::{CounselorScore, DailyPoint, KpiSummary, PipelineCounts};
use crate::domain::{ts, Role};
use crate::infra::errors::DeskError;

const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 365;
const TOP_COUNSELORS: u32 = 5;
const RECENT_SESSIONS: u32 = 10;
const MAX_RECOMMENDATIONS: usize = 5;
const WEAK_SCORE: f64 = 6.0;
const STRONG_SCORE: f64 = 8.0;
const OPERATIONS_WINDOW_DAYS: i64 = 7;
const STALE_UPLOAD_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutiveQuery {
    /// Admin only; managers are pinned to their clinic.
    pub clinic_id: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveDashboard {
    pub clinic_id: Option<String>,
    pub period_days: i64,
    pub since: String,
    pub kpis: KpiSummary,
    pub score_trend: Vec<DailyPoint>,
    pub top_counselors: Vec<CounselorScore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentSession {
    pub session_id: String,
    pub session_date: String,
    pub overall_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounselorDashboard {
    pub counselor_id: String,
    pub name: String,
    pub total_sessions: i64,
    pub scored_sessions: i64,
    pub average_score: Option<f64>,
    pub category_averages: BTreeMap<String, f64>,
    pub recent_sessions: Vec<RecentSession>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleUpload {
    pub recording_id: String,
    pub clinic_id: String,
    pub customer_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationsDashboard {
    pub pipeline: PipelineCounts,
    pub daily_volume: Vec<DailyPoint>,
    pub average_transcription_secs: Option<f64>,
    pub task_error_rate: f64,
    pub stale_uploads: Vec<StaleUpload>,
}

pub(crate) fn label(category: Category) -> &'static str {
    match category {
        Category::Questioning => "質問技法",
        Category::AnxietyHandling => "不安対応",
        Category::Closing => "クロージング",
        Category::Flow => "トーク流れ",
    }
}

/// Mean score per category over the results that covered it.
pub fn category_averages(results: &[AnalysisResult]) -> BTreeMap<Category, f64> {
    let mut out = BTreeMap::new();
    for category in Category::ALL {
        let scores: Vec<f64> = results
            .iter()
            .filter(|r| r.analyzed_categories.contains(&category))
            .map(|r| r.score_of(category))
            .collect();
        if !scores.is_empty() {
            out.insert(category, round2(scores.iter().sum::<f64>() / scores.len() as f64));
        }
    }
    out
}

/// Coaching hints: weak categories first, then strong ones, then the overall verdict.
pub fn recommendations(averages: &BTreeMap<Category, f64>, overall: Option<f64>) -> Vec<String> {
    let mut out = Vec::new();
    for (category, score) in averages {
        if *score < WEAK_SCORE {
            out.push(format!("{}の向上に重点的に取り組むことを推奨", label(*category)));
        }
    }
    for (category, score) in averages {
        if *score >= STRONG_SCORE {
            out.push(format!("{}は優秀です。この水準を維持してください", label(*category)));
        }
    }
    match overall {
        Some(avg) if avg < WEAK_SCORE => out.push("基本スキルの見直しと集中的なトレーニングを推奨".into()),
        Some(avg) if avg >= STRONG_SCORE => {
            out.push("優秀なパフォーマンスです。メンタリングの役割も検討してください".into())
        }
        _ => {}
    }
    out.truncate(MAX_RECOMMENDATIONS);
    out
}

pub async fn executive(
    ctx: &AppContext,
    caller: &Principal,
    query: ExecutiveQuery,
) -> Result<ExecutiveDashboard, DeskError> {
    let clinic_id = match caller.role {
        Role::Admin => query.clinic_id,
        _ => caller.clinic_id.clone(),
    };
    let res = clinic_id.as_deref().map(Resource::clinic).unwrap_or_default();
    authorize(caller, Action::ViewExecutiveDashboard, &res)?;

    let days = query.days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, MAX_WINDOW_DAYS);
    let since = ts(Utc::now() - Duration::days(days));
    let clinic = clinic_id.clone();
    let window = since.clone();
    let (kpis, score_trend, top_counselors) = ctx
        .store
        .call(move |s| {
            let clinic = clinic.as_deref();
            Ok((
                s.kpi_summary(clinic, &window)?,
                s.daily_trend(clinic, &window)?,
                s.top_counselors(clinic, &window, TOP_COUNSELORS)?,
            ))
        })
        .await?;
    Ok(ExecutiveDashboard {
        clinic_id,
        period_days: days,
        since,
        kpis,
        score_trend,
        top_counselors,
    })
}

pub async fn counselor(
    ctx: &AppContext,
    caller: &Principal,
    counselor_id: &str,
) -> Result<CounselorDashboard, DeskError> {
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

    let cid = user.id.clone();
    let ((total, scored, average), recent, results) = ctx
        .store
        .call(move |s| {
            Ok((
                s.counselor_totals(&cid)?,
                s.recent_scored_sessions(&cid, RECENT_SESSIONS)?,
                s.counselor_analysis_results(&cid)?,
            ))
        })
        .await?;
    let average = average.map(round2);
    let averages = category_averages(&results);
    let recommendations = recommendations(&averages, average);

    Ok(CounselorDashboard {
        counselor_id: user.id,
        name: user.name,
        total_sessions: total,
        scored_sessions: scored,
        average_score: average,
        category_averages: averages
            .into_iter()
            .map(|(c, v)| (c.as_str().to_string(), v))
            .collect(),
        recent_sessions: recent
            .into_iter()
            .map(|s| RecentSession {
                session_id: s.id,
                session_date: s.session_date,
                overall_score: s.overall_score,
            })
            .collect(),
        recommendations,
    })
}

pub async fn operations(ctx: &AppContext, caller: &Principal) -> Result<OperationsDashboard, DeskError> {
    authorize(caller, Action::ViewOperationsDashboard, &Resource::none())?;
    let now = Utc::now();
    let since = ts(now - Duration::days(OPERATIONS_WINDOW_DAYS));
    let stale_before = ts(now - Duration::hours(STALE_UPLOAD_HOURS));

    ctx.store
        .call(move |s| {
            let stale = s.stale_pending_recordings(&stale_before, None)?;
            Ok(OperationsDashboard {
                pipeline: s.pipeline_counts()?,
                daily_volume: s.daily_trend(None, &since)?,
                average_transcription_secs: s.transcription_stats(&Scope::All)?.average_processing_secs,
                task_error_rate: round2(s.task_error_rate(&since)?),
                stale_uploads: stale
                    .into_iter()
                    .map(|r| StaleUpload {
                        recording_id: r.id,
                        clinic_id: r.clinic_id,
                        customer_id: r.customer_id,
                        created_at: r.created_at,
                    })
                    .collect(),
            })
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{
        AnxietyHandlingResult, ClosingResult, FlowResult, QuestioningResult,
    };

    fn result(scores: [f64; 4], categories: &[Category]) -> AnalysisResult {
        AnalysisResult {
            overall_score: 0.0,
            questioning: QuestioningResult {
                score: scores[0],
                ..Default::default()
            },
            anxiety_handling: AnxietyHandlingResult {
                score: scores[1],
                ..Default::default()
            },
            closing: ClosingResult {
                score: scores[2],
                ..Default::default()
            },
            flow: FlowResult {
                score: scores[3],
                ..Default::default()
            },
            analyzed_categories: categories.to_vec(),
            session_summary: String::new(),
            key_strengths: vec![],
            critical_improvements: vec![],
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_averages_skip_unanalyzed() {
        let results = vec![
            result([5.0, 7.0, 9.0, 6.0], &Category::ALL),
            result([7.0, 1.0, 1.0, 1.0], &[Category::Questioning]),
        ];
        let avg = category_averages(&results);
        assert_eq!(avg[&Category::Questioning], 6.0);
        assert_eq!(avg[&Category::AnxietyHandling], 7.0);
        assert_eq!(avg[&Category::Closing], 9.0);
        assert_eq!(avg[&Category::Flow], 6.0);
    }

    #[test]
    fn test_recommendations() {
        let mut avg = BTreeMap::new();
        avg.insert(Category::Questioning, 5.5);
        avg.insert(Category::Closing, 8.5);
        avg.insert(Category::Flow, 6.5);
        let recs = recommendations(&avg, Some(5.9));
        assert_eq!(
            recs,
            vec![
                "質問技法の向上に重点的に取り組むことを推奨".to_string(),
                "クロージングは優秀です。この水準を維持してください".to_string(),
                "基本スキルの見直しと集中的なトレーニングを推奨".to_string(),
            ]
        );
        assert!(recommendations(&BTreeMap::new(), None).is_empty());
    }
}
