// src/pipeline/transcribe.rs — Transcription job

use std::time::Instant;

use super::Pipeline;
use crate::db::store::TranscriptionOutcome;
use crate::domain::TranscriptionStatus;
use crate::infra::errors::DeskError;
use crate::speech::{self, compress, TranscribeRequest, Transcript};
use crate::storage::keys;

pub const EMPTY_TRANSCRIPTION: &str = "EMPTY_TRANSCRIPTION";

/// Error code stored on a failed transcription task.
pub fn transcription_error_code(err: &DeskError) -> &'static str {
    match err {
        DeskError::FileTooLarge { .. } | DeskError::Storage(_) => err.code(),
        DeskError::Validation(msg) if msg.contains("no text") => EMPTY_TRANSCRIPTION,
        _ => "TRANSCRIPTION_ERROR",
    }
}

impl Pipeline {
    async fn set_status(&self, id: &str, next: TranscriptionStatus, progress: Option<u8>) -> Result<(), DeskError> {
        let id = id.to_string();
        self.store
            .call(move |s| s.set_transcription_status(&id, next, progress))
            .await
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), DeskError> {
        let id = id.to_string();
        self.store
            .call(move |s| s.set_transcription_progress(&id, progress))
            .await
    }

    pub(super) async fn transcribe(&self, task_id: &str) -> Result<(), DeskError> {
        let started = Instant::now();
        let id = task_id.to_string();
        let (task, recording) = self
            .store
            .call(move |s| {
                let task = s
                    .get_transcription(&id)?
                    .ok_or_else(|| DeskError::not_found("transcription task", &id))?;
                let recording = s
                    .get_recording(&task.recording_id)?
                    .ok_or_else(|| DeskError::not_found("recording", &task.recording_id))?;
                Ok((task, recording))
            })
            .await?;

        self.set_status(task_id, TranscriptionStatus::Processing, Some(10)).await?;
        tracing::info!(task_id, recording_id = %recording.id, "Transcription started");

        let mut audio = self.storage.download(&recording.file_path).await?;
        let mut content_type = recording.content_type.clone();
        let mut ext = keys::extension_for(&content_type).unwrap_or("webm");
        self.set_progress(task_id, 30).await?;

        let cfg = &self.config.transcription;
        let limit = cfg.max_upload_bytes;
        if audio.len() as u64 > limit {
            let Some(ffmpeg) = cfg.ffmpeg_path.as_deref() else {
                return Err(DeskError::FileTooLarge {
                    size: audio.len() as u64,
                    limit,
                });
            };
            audio = compress::compress_audio(ffmpeg, &audio, ext, limit).await?;
            content_type = "audio/ogg".into();
            ext = "ogg";
            self.set_progress(task_id, 40).await?;
        }

        let request = TranscribeRequest {
            audio,
            filename: format!("{}.{}", recording.id, ext),
            content_type,
            language: task.language.clone(),
            temperature: task.temperature,
        };
        self.set_progress(task_id, 50).await?;
        let transcript = self.transcribe_with_backoff(task_id, request).await?;
        self.set_progress(task_id, 90).await?;

        let segments = speech::to_segments(&transcript.segments);
        let outcome = TranscriptionOutcome {
            text: transcript.text.trim().to_string(),
            confidence: speech::overall_confidence(&segments),
            detected_language: transcript.language.clone(),
            duration_secs: transcript.duration.or(recording.duration_secs),
            segments,
            processing_secs: started.elapsed().as_secs_f64(),
        };
        if outcome.text.is_empty() {
            return Err(DeskError::Validation("transcription returned no text".into()));
        }

        let id = task_id.to_string();
        let done = self
            .store
            .call(move |s| s.complete_transcription(&id, &outcome))
            .await?;
        tracing::info!(
            task_id,
            confidence = done.confidence.unwrap_or_default(),
            processing_secs = done.processing_secs.unwrap_or_default(),
            "Transcription completed"
        );
        Ok(())
    }

    /// Call the speech API, sleeping in `retrying` between transient failures.
    async fn transcribe_with_backoff(
        &self,
        task_id: &str,
        request: TranscribeRequest,
    ) -> Result<Transcript, DeskError> {
        let mut attempt = 0;
        loop {
            match self.speech.transcribe(request.clone()).await {
                Ok(transcript) => return Ok(transcript),
                Err(e) if e.is_retriable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt, &e);
                    tracing::warn!(
                        task_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient speech API error, backing off: {}",
                        e
                    );
                    self.set_status(task_id, TranscriptionStatus::Retrying, None).await?;
                    tokio::time::sleep(delay).await;
                    self.set_status(task_id, TranscriptionStatus::Processing, None).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            transcription_error_code(&DeskError::FileTooLarge { size: 2, limit: 1 }),
            "FILE_TOO_LARGE"
        );
        assert_eq!(
            transcription_error_code(&DeskError::Storage("404".into())),
            "DOWNLOAD_ERROR"
        );
        assert_eq!(
            transcription_error_code(&DeskError::Validation("transcription returned no text".into())),
            EMPTY_TRANSCRIPTION
        );
        assert_eq!(
            transcription_error_code(&DeskError::RateLimited {
                provider: "whisper".into(),
                retry_after_ms: 10
            }),
            "TRANSCRIPTION_ERROR"
        );
    }
}
