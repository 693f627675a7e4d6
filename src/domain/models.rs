// src/domain/models.rs — Row types for every persisted entity

use serde::{Deserialize, Serialize};

use super::status::{AnalysisStatus, SessionStatus, TranscriptionStatus, UploadStatus};
use super::Role;
use crate::analysis::types::{AnalysisResult, AnalysisType, Category};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clinic {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub clinic_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub clinic_id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub customer_id: String,
    pub counselor_id: String,
    /// Clinic of the customer at creation; drives manager visibility.
    pub clinic_id: String,
    pub session_date: String,
    pub duration_minutes: Option<i64>,
    pub status: SessionStatus,
    pub recording_id: Option<String>,
    pub transcription_text: Option<String>,
    pub overall_score: Option<f64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub customer_id: String,
    pub clinic_id: String,
    pub session_id: Option<String>,
    pub file_path: String,
    pub original_filename: Option<String>,
    pub content_type: String,
    pub file_size: Option<i64>,
    pub duration_secs: Option<f64>,
    pub upload_status: UploadStatus,
    pub session_date: String,
    pub created_by: String,
    pub metadata: serde_json::Value,
    pub uploaded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionTask {
    pub id: String,
    pub recording_id: String,
    pub session_id: Option<String>,
    pub status: TranscriptionStatus,
    pub progress: u8,
    pub language: String,
    pub temperature: f32,
    pub text: Option<String>,
    pub confidence: Option<f64>,
    pub detected_language: Option<String>,
    pub duration_secs: Option<f64>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub created_by: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub estimated_completion_at: Option<String>,
    pub processing_secs: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: String,
    pub transcription_id: String,
    pub session_id: Option<String>,
    pub analysis_type: AnalysisType,
    pub status: AnalysisStatus,
    pub progress: u8,
    pub focus_areas: Vec<Category>,
    pub custom_prompts: std::collections::BTreeMap<String, String>,
    pub overall_score: Option<f64>,
    pub result: Option<AnalysisResult>,
    pub tokens_used: u32,
    pub cost: f64,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub created_by: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub estimated_completion_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
