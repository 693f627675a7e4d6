// src/api/handlers.rs

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::api::{auth, types::*};
use crate::app::AppContext;
use crate::auth::{NewUser, TokenPair};
use crate::db::store::{AnalysisStats, CustomerPatch, SessionPatch, TranscriptionStats};
use crate::domain::{AnalysisTask, Clinic, Customer, Recording, TranscriptionTask, User};
use crate::service::analyses::{self, AnalysisOutcome, AnalysisQuery, BatchAccepted, BatchAnalysis, StartAnalysis};
use crate::service::clinics::{self, ClinicPatch, NewClinic};
use crate::service::customers::{self, CustomerQuery, NewCustomer};
use crate::service::dashboard::{
    self, CounselorDashboard, ExecutiveDashboard, ExecutiveQuery, OperationsDashboard,
};
use crate::service::improvement::{
    self, ImprovementPlan, PatternQuery, PerformanceTrend, SuccessPatterns, SuggestionQuery, TrendQuery,
};
use crate::service::recordings::{self, CompletedRecording, RecordingQuery, UploadRequest, UploadSlot};
use crate::service::sessions::{self, NewSession, SessionQuery, SessionView};
use crate::service::transcriptions::{
    self, StartTranscription, TranscriptionQuery, TranscriptionResult,
};
use crate::service::{Page, TaskAccepted};
use crate::storage::PresignedRequest;

type ApiResult<T> = Result<Json<T>, ApiError>;
type Accepted<T> = Result<(StatusCode, Json<T>), ApiError>;

/// GET /api/v1/health — Simple health check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─── Auth ───────────────────────────────────────────────────────────────────

/// POST /api/v1/auth/login
pub async fn login(
    State(ctx): State<AppContext>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let (tokens, user) = crate::auth::login(&ctx, &body.email, &body.password).await?;
    Ok(Json(LoginResponse { tokens, user }))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(ctx): State<AppContext>,
    Json(body): Json<RefreshRequest>,
) -> ApiResult<TokenPair> {
    Ok(Json(crate::auth::refresh(&ctx, &body.refresh_token).await?))
}

/// POST /api/v1/auth/register — admins register anyone, managers counselors.
pub async fn register(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    let user = crate::auth::register(&ctx, &caller, body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/v1/auth/me
pub async fn me(State(ctx): State<AppContext>, headers: HeaderMap) -> ApiResult<User> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(crate::auth::me(&ctx, &caller).await?))
}

/// POST /api/v1/auth/change-password
pub async fn change_password(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult<MessageResponse> {
    let caller = auth::principal(&ctx, &headers)?;
    crate::auth::change_password(&ctx, &caller, &body.current_password, &body.new_password).await?;
    Ok(MessageResponse::new("password changed"))
}

/// POST /api/v1/auth/logout — tokens are stateless; the client drops them.
pub async fn logout(State(ctx): State<AppContext>, headers: HeaderMap) -> ApiResult<MessageResponse> {
    let caller = auth::principal(&ctx, &headers)?;
    tracing::info!(user_id = %caller.user_id, "User logged out");
    Ok(MessageResponse::new("logged out"))
}

/// POST /api/v1/auth/password-reset-request
pub async fn password_reset_request(
    State(ctx): State<AppContext>,
    Json(body): Json<ResetRequest>,
) -> Result<(StatusCode, Json<ResetRequested>), ApiError> {
    let reset_token = crate::auth::request_password_reset(&ctx, &body.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ResetRequested {
            message: "if the account exists, a reset link has been issued".into(),
            reset_token,
        }),
    ))
}

/// POST /api/v1/auth/password-reset-confirm
pub async fn password_reset_confirm(
    State(ctx): State<AppContext>,
    Json(body): Json<ResetConfirm>,
) -> ApiResult<MessageResponse> {
    crate::auth::confirm_password_reset(&ctx, &body.token, &body.new_password).await?;
    Ok(MessageResponse::new("password reset"))
}

// ─── Clinics ────────────────────────────────────────────────────────────────

pub async fn list_clinics(State(ctx): State<AppContext>, headers: HeaderMap) -> ApiResult<Vec<Clinic>> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(clinics::list(&ctx, &caller).await?))
}

pub async fn create_clinic(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<NewClinic>,
) -> Result<(StatusCode, Json<Clinic>), ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok((StatusCode::CREATED, Json(clinics::create(&ctx, &caller, body).await?)))
}

pub async fn get_clinic(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Clinic> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(clinics::get(&ctx, &caller, &id).await?))
}

pub async fn update_clinic(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ClinicPatch>,
) -> ApiResult<Clinic> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(clinics::update(&ctx, &caller, &id, body).await?))
}

// ─── Customers ──────────────────────────────────────────────────────────────

pub async fn list_customers(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<CustomerQuery>,
) -> ApiResult<Vec<Customer>> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(customers::list(&ctx, &caller, query).await?))
}

pub async fn create_customer(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<NewCustomer>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok((StatusCode::CREATED, Json(customers::create(&ctx, &caller, body).await?)))
}

pub async fn get_customer(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Customer> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(customers::get(&ctx, &caller, &id).await?))
}

pub async fn update_customer(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CustomerPatch>,
) -> ApiResult<Customer> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(customers::update(&ctx, &caller, &id, body).await?))
}

// ─── Sessions ───────────────────────────────────────────────────────────────

pub async fn list_sessions(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> ApiResult<Page<SessionView>> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(sessions::list(&ctx, &caller, query).await?))
}

pub async fn create_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<NewSession>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok((StatusCode::CREATED, Json(sessions::create(&ctx, &caller, body).await?)))
}

pub async fn get_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<SessionView> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(sessions::get(&ctx, &caller, &id).await?))
}

pub async fn update_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SessionPatch>,
) -> ApiResult<SessionView> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(sessions::update(&ctx, &caller, &id, body).await?))
}

pub async fn delete_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    sessions::delete(&ctx, &caller, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Recordings ─────────────────────────────────────────────────────────────

/// POST /api/v1/recordings — issue a presigned upload slot.
pub async fn create_upload(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadSlot>), ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok((StatusCode::CREATED, Json(recordings::create_upload(&ctx, &caller, body).await?)))
}

pub async fn list_recordings(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<RecordingQuery>,
) -> ApiResult<Page<Recording>> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(recordings::list(&ctx, &caller, query).await?))
}

pub async fn get_recording(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Recording> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(recordings::get(&ctx, &caller, &id).await?))
}

/// POST /api/v1/recordings/{id}/complete
pub async fn complete_upload(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<CompletedRecording> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(recordings::complete_upload(&ctx, &caller, &id).await?))
}

pub async fn recording_download(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<PresignedRequest> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(recordings::download_url(&ctx, &caller, &id).await?))
}

pub async fn delete_recording(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = auth::principal(&ctx, &headers)?;
    recordings::delete(&ctx, &caller, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Transcriptions ─────────────────────────────────────────────────────────

/// POST /api/v1/transcriptions — queue a transcription; poll for status.
pub async fn start_transcription(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<StartTranscription>,
) -> Accepted<TaskAccepted> {
    let caller = auth::principal(&ctx, &headers)?;
    let accepted = transcriptions::start(&ctx, &caller, body).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn list_transcriptions(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<TranscriptionQuery>,
) -> ApiResult<Page<TranscriptionTask>> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(transcriptions::list(&ctx, &caller, query).await?))
}

pub async fn transcription_stats(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> ApiResult<TranscriptionStats> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(transcriptions::stats(&ctx, &caller).await?))
}

pub async fn transcription_status(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<TranscriptionTask> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(transcriptions::status(&ctx, &caller, &id).await?))
}

pub async fn transcription_result(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<TranscriptionResult> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(transcriptions::result(&ctx, &caller, &id).await?))
}

pub async fn retry_transcription(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Accepted<TaskAccepted> {
    let caller = auth::principal(&ctx, &headers)?;
    let accepted = transcriptions::retry(&ctx, &caller, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

// ─── Analyses ───────────────────────────────────────────────────────────────

/// POST /api/v1/analyses — queue an analysis; poll for status.
pub async fn start_analysis(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<StartAnalysis>,
) -> Accepted<TaskAccepted> {
    let caller = auth::principal(&ctx, &headers)?;
    let accepted = analyses::start(&ctx, &caller, body).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn batch_analysis(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(body): Json<BatchAnalysis>,
) -> Accepted<BatchAccepted> {
    let caller = auth::principal(&ctx, &headers)?;
    let accepted = analyses::batch(&ctx, &caller, body).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn list_analyses(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<AnalysisQuery>,
) -> ApiResult<Page<AnalysisTask>> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(analyses::list(&ctx, &caller, query).await?))
}

pub async fn analysis_stats(State(ctx): State<AppContext>, headers: HeaderMap) -> ApiResult<AnalysisStats> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(analyses::stats(&ctx, &caller).await?))
}

pub async fn analysis_status(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<AnalysisTask> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(analyses::status(&ctx, &caller, &id).await?))
}

pub async fn analysis_result(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<AnalysisOutcome> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(analyses::result(&ctx, &caller, &id).await?))
}

pub async fn retry_analysis(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Accepted<TaskAccepted> {
    let caller = auth::principal(&ctx, &headers)?;
    let accepted = analyses::retry(&ctx, &caller, &id).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

// ─── Dashboards ─────────────────────────────────────────────────────────────

pub async fn executive_dashboard(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<ExecutiveQuery>,
) -> ApiResult<ExecutiveDashboard> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(dashboard::executive(&ctx, &caller, query).await?))
}

pub async fn operations_dashboard(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> ApiResult<OperationsDashboard> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(dashboard::operations(&ctx, &caller).await?))
}

pub async fn counselor_dashboard(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<CounselorDashboard> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(dashboard::counselor(&ctx, &caller, &id).await?))
}

// ─── Improvement ────────────────────────────────────────────────────────────

pub async fn analysis_suggestions(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<SuggestionQuery>,
) -> ApiResult<ImprovementPlan> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(improvement::suggestions(&ctx, &caller, &id, query).await?))
}

pub async fn success_patterns(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(query): Query<PatternQuery>,
) -> ApiResult<SuccessPatterns> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(improvement::success_patterns(&ctx, &caller, query).await?))
}

pub async fn performance_trend(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<PerformanceTrend> {
    let caller = auth::principal(&ctx, &headers)?;
    Ok(Json(improvement::performance_trend(&ctx, &caller, &id, query).await?))
}
