// src/pipeline/analyze.rs — Analysis job

use super::Pipeline;
use crate::analysis::AnalysisRequest;
use crate::domain::{AnalysisStatus, TranscriptionStatus};
use crate::infra::errors::DeskError;

/// Error code stored on a failed analysis task.
pub fn analysis_error_code(err: &DeskError) -> &'static str {
    match err {
        DeskError::Parse(_) => err.code(),
        _ => "ANALYSIS_ERROR",
    }
}

impl Pipeline {
    async fn set_stage(&self, id: &str, next: AnalysisStatus) -> Result<(), DeskError> {
        let id = id.to_string();
        self.store
            .call(move |s| s.set_analysis_status(&id, next))
            .await
    }

    pub(super) async fn analyze(&self, task_id: &str) -> Result<(), DeskError> {
        let id = task_id.to_string();
        let (task, transcription) = self
            .store
            .call(move |s| {
                let task = s
                    .get_analysis(&id)?
                    .ok_or_else(|| DeskError::not_found("analysis task", &id))?;
                let transcription = s
                    .get_transcription(&task.transcription_id)?
                    .ok_or_else(|| DeskError::not_found("transcription task", &task.transcription_id))?;
                Ok((task, transcription))
            })
            .await?;

        self.set_stage(task_id, AnalysisStatus::Preprocessing).await?;
        tracing::info!(
            task_id,
            analysis_type = task.analysis_type.as_str(),
            "Analysis started"
        );
        let transcript = match (&transcription.status, transcription.text.as_deref()) {
            (TranscriptionStatus::Completed, Some(text)) => text,
            _ => {
                return Err(DeskError::Conflict(format!(
                    "transcription '{}' has no completed text",
                    transcription.id
                )))
            }
        };
        let request = AnalysisRequest {
            analysis_type: task.analysis_type,
            focus_areas: task.focus_areas.clone(),
            custom_prompts: task.custom_prompts.clone(),
        };
        let output = self
            .analyzer
            .analyze(transcript, &request, |stage| self.set_stage(task_id, stage))
            .await?;

        let id = task_id.to_string();
        let score = output.result.overall_score;
        let tokens = output.tokens;
        self.store
            .call(move |s| s.complete_analysis(&id, &output.result, output.tokens, output.cost))
            .await?;
        tracing::info!(task_id, overall_score = score, tokens, "Analysis completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            analysis_error_code(&DeskError::Parse("eof".into())),
            "ANALYSIS_PARSE_ERROR"
        );
        assert_eq!(
            analysis_error_code(&DeskError::Provider {
                provider: "openai".into(),
                message: "HTTP 400".into(),
                retriable: false
            }),
            "ANALYSIS_ERROR"
        );
    }
}
