// src/speech/whisper.rs — OpenAI Whisper transcription client

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::{SpeechToText, TranscribeRequest, Transcript};
use crate::infra::config::TranscriptionConfig;
use crate::infra::errors::DeskError;
use crate::provider::openai::{status_error, transport_error};

pub struct WhisperClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl WhisperClient {
    pub fn new(cfg: &TranscriptionConfig) -> Self {
        Self {
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

/// Parse a `verbose_json` response body.
pub fn parse_verbose_json(body: &str) -> Result<Transcript, DeskError> {
    serde_json::from_str(body).map_err(|e| DeskError::Provider {
        provider: "whisper".into(),
        message: format!("Failed to parse response: {e}"),
        retriable: false,
    })
}

#[async_trait]
impl SpeechToText for WhisperClient {
    fn id(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript, DeskError> {
        let file = Part::bytes(request.audio)
            .file_name(request.filename)
            .mime_str(&request.content_type)
            .map_err(|e| DeskError::Validation(format!("bad content type: {e}")))?;

        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", request.language)
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .text("temperature", request.temperature.to_string());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("whisper", e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("whisper", status, retry_after.as_deref(), &body));
        }

        let body = response.text().await.map_err(|e| transport_error("whisper", e))?;
        parse_verbose_json(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verbose_json() {
        let body = r#"{
            "task": "transcribe",
            "language": "japanese",
            "duration": 12.5,
            "text": "本日はよろしくお願いします。",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 4.2, "text": "本日は",
                 "avg_logprob": -0.21, "no_speech_prob": 0.01},
                {"id": 1, "seek": 0, "start": 4.2, "end": 12.5, "text": "よろしくお願いします。",
                 "avg_logprob": -0.05}
            ]
        }"#;
        let t = parse_verbose_json(body).unwrap();
        assert_eq!(t.language.as_deref(), Some("japanese"));
        assert_eq!(t.segments.len(), 2);
        assert_eq!(t.segments[1].avg_logprob, Some(-0.05));
        assert_eq!(t.duration, Some(12.5));
    }

    #[test]
    fn test_parse_plain_text_body_fails() {
        assert!(parse_verbose_json("hello").is_err());
    }
}
