// src/speech/compress.rs — Shrink oversize audio with ffmpeg

use std::path::Path;

use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::infra::errors::DeskError;

/// Arguments producing mono 16 kHz Opus at 32 kbit/s.
pub fn ffmpeg_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.display().to_string(),
        "-vn".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        "16000".into(),
        "-c:a".into(),
        "libopus".into(),
        "-b:a".into(),
        "32k".into(),
        output.display().to_string(),
    ]
}

/// Write `audio` to a temp file without blocking the runtime.
async fn stage_input(audio: &[u8], ext: &str) -> Result<NamedTempFile, DeskError> {
    let input = tempfile::Builder::new()
        .prefix("counseldesk-in-")
        .suffix(&format!(".{ext}"))
        .tempfile()?;
    tokio::fs::write(input.path(), audio).await?;
    Ok(input)
}

/// Re-encode `audio` and return the Ogg/Opus bytes. Fails with
/// `FileTooLarge` when the result still exceeds `limit`.
pub async fn compress_audio(
    ffmpeg: &Path,
    audio: &[u8],
    input_ext: &str,
    limit: u64,
) -> Result<Vec<u8>, DeskError> {
    let input = stage_input(audio, input_ext).await?;
    let output = tempfile::Builder::new()
        .prefix("counseldesk-out-")
        .suffix(".ogg")
        .tempfile()?;

    let result = Command::new(ffmpeg)
        .args(ffmpeg_args(input.path(), output.path()))
        .kill_on_drop(true)
        .output()
        .await?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(DeskError::Other(anyhow::anyhow!(
            "ffmpeg exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    let compressed = tokio::fs::read(output.path()).await?;
    tracing::info!(
        original_bytes = audio.len(),
        compressed_bytes = compressed.len(),
        "Compressed audio for transcription"
    );
    if compressed.len() as u64 > limit {
        return Err(DeskError::FileTooLarge {
            size: compressed.len() as u64,
            limit,
        });
    }
    Ok(compressed)
}
