// src/storage/keys.rs — Object keys and upload validation

use chrono::{DateTime, Utc};

use crate::infra::config::StorageConfig;
use crate::infra::errors::DeskError;

/// File extension for an allowed audio content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let base = content_type.split(';').next().unwrap_or("").trim();
    match base {
        "audio/webm" => Some("webm"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("mp4"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        _ => None,
    }
}

/// `{clinic_id}/{customer_id}/{YYYYMMDD}/{recording_id}.{ext}`
pub fn object_key(
    clinic_id: &str,
    customer_id: &str,
    session_date: DateTime<Utc>,
    recording_id: &str,
    ext: &str,
) -> String {
    format!(
        "{}/{}/{}/{}.{}",
        clinic_id,
        customer_id,
        session_date.format("%Y%m%d"),
        recording_id,
        ext
    )
}

/// Check content type against the allow-list and the declared size against
/// the upload ceiling. Returns the file extension to use.
pub fn validate_upload(
    cfg: &StorageConfig,
    content_type: &str,
    declared_size: Option<u64>,
) -> Result<&'static str, DeskError> {
    let base = content_type.split(';').next().unwrap_or("").trim();
    if !cfg.allowed_content_types.iter().any(|t| t == base) {
        return Err(DeskError::Validation(format!(
            "content type '{content_type}' is not allowed (allowed: {})",
            cfg.allowed_content_types.join(", ")
        )));
    }
    let ext = extension_for(base).ok_or_else(|| {
        DeskError::Validation(format!("no file extension known for '{content_type}'"))
    })?;
    if let Some(size) = declared_size {
        if size == 0 {
            return Err(DeskError::Validation("file size must be positive".into()));
        }
        if size > cfg.max_upload_bytes {
            return Err(DeskError::Validation(format!(
                "file size {size} exceeds the {} byte limit",
                cfg.max_upload_bytes
            )));
        }
    }
    Ok(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_key_layout() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        assert_eq!(
            object_key("clinic-1", "cust-9", date, "rec-42", "webm"),
            "clinic-1/cust-9/20240309/rec-42.webm"
        );
    }

    #[test]
    fn test_validate_upload() {
        let cfg = StorageConfig::default();
        assert_eq!(validate_upload(&cfg, "audio/webm", Some(1024)).unwrap(), "webm");
        assert_eq!(validate_upload(&cfg, "audio/webm;codecs=opus", None).unwrap(), "webm");
        assert_eq!(validate_upload(&cfg, "audio/mpeg", Some(10)).unwrap(), "mp3");
        assert!(validate_upload(&cfg, "video/mp4", Some(10)).is_err());
        assert!(validate_upload(&cfg, "audio/wav", Some(cfg.max_upload_bytes + 1)).is_err());
        assert!(validate_upload(&cfg, "audio/wav", Some(0)).is_err());
    }
}
