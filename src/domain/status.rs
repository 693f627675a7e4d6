// src/domain/status.rs — Status enums and the legal transitions between them
//
// Every status write in the store goes through `ensure_transition`, so an
// illegal jump (say, recorded -> analyzed) is rejected instead of persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::infra::errors::DeskError;

/// Shared behaviour for status enums persisted as TEXT.
pub trait Lifecycle: Copy + Eq + fmt::Debug + Sized + 'static {
    const ENTITY: &'static str;

    fn as_str(&self) -> &'static str;
    fn all() -> &'static [Self];
    fn can_transition_to(&self, next: Self) -> bool;

    fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|v| v.as_str() == s)
    }

    fn ensure_transition(&self, next: Self) -> Result<(), DeskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DeskError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.as_str().into(),
                to: next.as_str().into(),
            })
        }
    }
}

macro_rules! text_enum {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = DeskError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as Lifecycle>::parse(s).ok_or_else(|| {
                    DeskError::Validation(format!(
                        "unknown {} status '{}'",
                        <$ty as Lifecycle>::ENTITY,
                        s
                    ))
                })
            }
        }
    };
}

// ─── Session ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Recorded,
    Transcribing,
    Transcribed,
    Analyzing,
    Analyzed,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Position on the forward path; `Failed` has none.
    pub fn rank(&self) -> Option<u8> {
        match self {
            SessionStatus::Recorded => Some(0),
            SessionStatus::Transcribing => Some(1),
            SessionStatus::Transcribed => Some(2),
            SessionStatus::Analyzing => Some(3),
            SessionStatus::Analyzed => Some(4),
            SessionStatus::Completed => Some(5),
            SessionStatus::Failed => None,
        }
    }

    /// True when the session already sits at or past `target` on the forward
    /// path, so advancing to it would be a regression.
    pub fn is_at_or_past(&self, target: SessionStatus) -> bool {
        match (self.rank(), target.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Session is inside a pipeline stage (work queued or running).
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionStatus::Transcribing | SessionStatus::Analyzing)
    }
}

impl Lifecycle for SessionStatus {
    const ENTITY: &'static str = "session";

    fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Recorded => "recorded",
            SessionStatus::Transcribing => "transcribing",
            SessionStatus::Transcribed => "transcribed",
            SessionStatus::Analyzing => "analyzing",
            SessionStatus::Analyzed => "analyzed",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    fn all() -> &'static [Self] {
        &[
            SessionStatus::Recorded,
            SessionStatus::Transcribing,
            SessionStatus::Transcribed,
            SessionStatus::Analyzing,
            SessionStatus::Analyzed,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ]
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Recorded, Transcribing)
                | (Transcribing, Transcribed)
                | (Transcribed, Analyzing)
                | (Analyzing, Analyzed)
                | (Analyzed, Completed)
                // a retried task re-enters its stage
                | (Failed, Recorded)
                | (Failed, Transcribing)
                | (Failed, Analyzing)
                | (Recorded, Failed)
                | (Transcribing, Failed)
                | (Transcribed, Failed)
                | (Analyzing, Failed)
                | (Analyzed, Failed)
        )
    }
}

text_enum!(SessionStatus);

// ─── Recording upload ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Completed,
    Failed,
}

impl Lifecycle for UploadStatus {
    const ENTITY: &'static str = "recording";

    fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }

    fn all() -> &'static [Self] {
        &[
            UploadStatus::Pending,
            UploadStatus::Completed,
            UploadStatus::Failed,
        ]
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use UploadStatus::*;
        matches!((self, next), (Pending, Completed) | (Pending, Failed))
    }
}

text_enum!(UploadStatus);

// ─── Transcription task ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TranscriptionStatus::Pending
                | TranscriptionStatus::Processing
                | TranscriptionStatus::Retrying
        )
    }
}

impl Lifecycle for TranscriptionStatus {
    const ENTITY: &'static str = "transcription task";

    fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::Processing => "processing",
            TranscriptionStatus::Retrying => "retrying",
            TranscriptionStatus::Completed => "completed",
            TranscriptionStatus::Failed => "failed",
        }
    }

    fn all() -> &'static [Self] {
        &[
            TranscriptionStatus::Pending,
            TranscriptionStatus::Processing,
            TranscriptionStatus::Retrying,
            TranscriptionStatus::Completed,
            TranscriptionStatus::Failed,
        ]
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use TranscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Retrying, Processing)
                | (Retrying, Failed)
                | (Pending, Failed)
                | (Failed, Pending)
        )
    }
}

text_enum!(TranscriptionStatus);

// ─── Analysis task ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Preprocessing,
    Analyzing,
    GeneratingSuggestions,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }

    /// Progress percentage reported when a task enters this stage.
    pub fn progress(&self) -> u8 {
        match self {
            AnalysisStatus::Pending => 0,
            AnalysisStatus::Preprocessing => 10,
            AnalysisStatus::Analyzing => 30,
            AnalysisStatus::GeneratingSuggestions => 80,
            AnalysisStatus::Completed => 100,
            AnalysisStatus::Failed => 0,
        }
    }
}

impl Lifecycle for AnalysisStatus {
    const ENTITY: &'static str = "analysis task";

    fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Preprocessing => "preprocessing",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::GeneratingSuggestions => "generating_suggestions",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    fn all() -> &'static [Self] {
        &[
            AnalysisStatus::Pending,
            AnalysisStatus::Preprocessing,
            AnalysisStatus::Analyzing,
            AnalysisStatus::GeneratingSuggestions,
            AnalysisStatus::Completed,
            AnalysisStatus::Failed,
        ]
    }

    fn can_transition_to(&self, next: Self) -> bool {
        use AnalysisStatus::*;
        match (self, next) {
            (Pending, Preprocessing)
            | (Preprocessing, Analyzing)
            | (Analyzing, GeneratingSuggestions)
            | (GeneratingSuggestions, Completed)
            | (Failed, Pending) => true,
            // quick/specific runs have no suggestion stage
            (Analyzing, Completed) => true,
            (from, Failed) => from.is_active(),
            _ => false,
        }
    }
}

text_enum!(AnalysisStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_forward_path_is_legal() {
        use SessionStatus::*;
        let path = [Recorded, Transcribing, Transcribed, Analyzing, Analyzed, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_session_rejects_skips_and_regressions() {
        use SessionStatus::*;
        assert!(Recorded.ensure_transition(Analyzed).is_err());
        assert!(Transcribed.ensure_transition(Recorded).is_err());
        assert!(Completed.ensure_transition(Failed).is_err());
        assert!(Completed.ensure_transition(Recorded).is_err());
        assert!(Analyzed.ensure_transition(Analyzing).is_err());
        assert!(Completed.is_at_or_past(Analyzed));
        assert!(!Failed.is_at_or_past(Recorded));
        let err = Analyzed.ensure_transition(Transcribed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Illegal session transition: analyzed -> transcribed"
        );
    }

    #[test]
    fn test_upload_never_regresses() {
        use UploadStatus::*;
        for next in UploadStatus::all() {
            assert!(!Completed.can_transition_to(*next));
        }
        assert!(Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_transcription_retry_edge() {
        use TranscriptionStatus::*;
        assert!(Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(Processing.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Pending.is_active() && Retrying.is_active() && !Failed.is_active());
    }

    #[test]
    fn test_analysis_failure_from_any_active_stage() {
        use AnalysisStatus::*;
        for s in [Pending, Preprocessing, Analyzing, GeneratingSuggestions] {
            assert!(s.can_transition_to(Failed));
        }
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert_eq!(GeneratingSuggestions.progress(), 80);
    }

    #[test]
    fn test_text_round_trip() {
        assert_eq!(
            "generating_suggestions".parse::<AnalysisStatus>().unwrap(),
            AnalysisStatus::GeneratingSuggestions
        );
        assert_eq!(SessionStatus::Transcribing.to_string(), "transcribing");
        assert!("done".parse::<TranscriptionStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&AnalysisStatus::GeneratingSuggestions).unwrap(),
            "\"generating_suggestions\""
        );
    }
}
