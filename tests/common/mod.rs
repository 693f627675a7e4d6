// tests/common/mod.rs — Shared fixtures: in-memory store, mock storage, speech and model

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use counseldesk::app::AppContext;
use counseldesk::auth::{create_user, NewUser};
use counseldesk::authz::Principal;
use counseldesk::db;
use counseldesk::domain::{
    new_id, now_ts, AnalysisStatus, AnalysisTask, Customer, Role, TranscriptionStatus,
    TranscriptionTask,
};
use counseldesk::infra::config::Config;
use counseldesk::infra::errors::DeskError;
use counseldesk::provider::{ChatRequest, ChatResponse, ModelProvider, StopReason, TokenUsage};
use counseldesk::service::clinics::{create_unchecked, NewClinic};
use counseldesk::speech::{RawSegment, SpeechToText, TranscribeRequest, Transcript};
use counseldesk::storage::{ObjectMeta, ObjectStorage, PresignedRequest};

pub const PASSWORD: &str = "Test-pass-123";

// ─── Object storage ─────────────────────────────────────────────────────────

/// Objects live in a map; presigned URLs point at a fake host.
#[derive(Default)]
pub struct MemStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    /// Simulate the client's PUT to the presigned URL.
    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.to_vec());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

fn presigned(key: &str, method: &str) -> PresignedRequest {
    PresignedRequest {
        url: format!("https://storage.test/{key}?X-Amz-Signature=fake"),
        method: method.into(),
        headers: BTreeMap::new(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

#[async_trait]
impl ObjectStorage for MemStorage {
    fn presign_upload(&self, key: &str, content_type: &str) -> Result<PresignedRequest, DeskError> {
        let mut req = presigned(key, "PUT");
        req.headers.insert("content-type".into(), content_type.into());
        Ok(req)
    }

    fn presign_download(&self, key: &str) -> Result<PresignedRequest, DeskError> {
        Ok(presigned(key, "GET"))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, DeskError> {
        Ok(self.objects.lock().unwrap().get(key).map(|bytes| ObjectMeta {
            size: bytes.len() as u64,
            content_type: None,
        }))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, DeskError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| DeskError::Storage(format!("no such key: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<(), DeskError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// ─── Speech ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechMode {
    Ok,
    /// The API answers with whitespace only.
    Empty,
    /// Non-retriable failure on every call.
    Broken,
}

/// Returns a fixed two-segment transcript. `transient` calls fail with a
/// retriable error before the mode applies.
pub struct ScriptedSpeech {
    pub mode: Mutex<SpeechMode>,
    transient: AtomicU32,
    pub calls: AtomicU32,
}

impl ScriptedSpeech {
    pub fn new(mode: SpeechMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            transient: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        })
    }

    pub fn fail_transiently(&self, times: u32) {
        self.transient.store(times, Ordering::SeqCst);
    }

    pub fn set_mode(&self, mode: SpeechMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl SpeechToText for ScriptedSpeech {
    fn id(&self) -> &str {
        "scripted-speech"
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript, DeskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!request.audio.is_empty());
        if self
            .transient
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeskError::Provider {
                provider: "scripted-speech".into(),
                message: "HTTP 503".into(),
                retriable: true,
            });
        }
        match *self.mode.lock().unwrap() {
            SpeechMode::Ok => Ok(Transcript {
                text: "カウンセラー: 本日はどのようなご相談ですか？ 顧客: 価格が不安です。".into(),
                language: Some("japanese".into()),
                duration: Some(95.0),
                segments: vec![
                    RawSegment {
                        id: 0,
                        start: 0.0,
                        end: 4.2,
                        text: "カウンセラー: 本日はどのようなご相談ですか？".into(),
                        avg_logprob: Some(-0.1),
                        confidence: None,
                    },
                    RawSegment {
                        id: 1,
                        start: 4.2,
                        end: 7.9,
                        text: "顧客: 価格が不安です。".into(),
                        avg_logprob: None,
                        confidence: Some(0.8),
                    },
                ],
            }),
            SpeechMode::Empty => Ok(Transcript {
                text: "   ".into(),
                language: Some("japanese".into()),
                duration: Some(3.0),
                segments: Vec::new(),
            }),
            SpeechMode::Broken => Err(DeskError::Provider {
                provider: "scripted-speech".into(),
                message: "HTTP 400: invalid file format".into(),
                retriable: false,
            }),
        }
    }
}

// ─── Chat model ─────────────────────────────────────────────────────────────

/// Answers each analysis prompt by content; `garbage` makes every reply unparseable.
pub struct ScriptedModel {
    pub garbage: Mutex<bool>,
    pub calls: AtomicU32,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            garbage: Mutex::new(false),
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_garbage(&self, on: bool) {
        *self.garbage.lock().unwrap() = on;
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn id(&self) -> &str {
        "scripted-model"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = request.messages[0].content.clone();
        let content = if *self.garbage.lock().unwrap() {
            "I cannot score this session."
        } else if prompt.contains("session_summary\": \"200") {
            r#"{"session_summary": "丁寧な説明", "key_strengths": ["共感"], "critical_improvements": ["価格説明"]}"#
        } else if prompt.contains("questioning_score") {
            r#"{"questioning_score": 7, "anxiety_handling_score": 8, "closing_score": 6, "flow_score": 9, "key_improvements": ["x"]}"#
        } else if prompt.contains("open_question_ratio") {
            r#"{"score": 8, "improvements": ["q1"]}"#
        } else if prompt.contains("empathy_expressions") {
            r#"{"score": 6, "improvements": ["a1"]}"#
        } else if prompt.contains("contract_probability") {
            r#"{"score": 7, "improvements": ["c1"]}"#
        } else {
            r#"{"score": 9}"#
        };
        Ok(ChatResponse {
            content: content.into(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 25,
            },
            stop_reason: StopReason::EndTurn,
        })
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "integration-test-secret-0123456789".into();
    config.auth.password_iterations = 1_000;
    config.auth.expose_reset_token = true;
    config.jobs.backoff.initial_delay_ms = 0;
    config.jobs.backoff.max_delay_ms = 0;
    config.transcription.ffmpeg_path = None;
    config
}

/// A clinic with one user per role and one customer.
pub struct Harness {
    pub ctx: AppContext,
    pub storage: Arc<MemStorage>,
    pub speech: Arc<ScriptedSpeech>,
    pub model: Arc<ScriptedModel>,
    pub clinic_id: String,
    pub customer_id: String,
    pub admin: Principal,
    pub manager: Principal,
    pub counselor: Principal,
    /// A second counselor in the same clinic.
    pub colleague: Principal,
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: Config) -> Harness {
    let store = db::open_in_memory().unwrap();
    let (handle, _task) = db::spawn_store_server(store);
    let storage = Arc::new(MemStorage::default());
    let speech = ScriptedSpeech::new(SpeechMode::Ok);
    let model = ScriptedModel::new();
    let ctx = AppContext::new(
        handle,
        config,
        storage.clone(),
        speech.clone(),
        model.clone(),
    )
    .unwrap();

    let clinic = create_unchecked(
        &ctx,
        NewClinic {
            name: "テストクリニック".into(),
            address: None,
            phone: None,
        },
    )
    .await
    .unwrap();

    let admin = add_user(&ctx, "admin@test.local", Role::Admin, None).await;
    let manager = add_user(&ctx, "manager@test.local", Role::Manager, Some(&clinic.id)).await;
    let counselor = add_user(&ctx, "counselor@test.local", Role::Counselor, Some(&clinic.id)).await;
    let colleague = add_user(&ctx, "colleague@test.local", Role::Counselor, Some(&clinic.id)).await;

    let now = now_ts();
    let customer = Customer {
        id: new_id(),
        clinic_id: clinic.id.clone(),
        name: "山田 花子".into(),
        phone: None,
        email: None,
        notes: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let customer_id = customer.id.clone();
    ctx.store.call(move |s| s.insert_customer(&customer)).await.unwrap();

    Harness {
        ctx,
        storage,
        speech,
        model,
        clinic_id: clinic.id,
        customer_id,
        admin,
        manager,
        counselor,
        colleague,
    }
}

pub async fn add_user(ctx: &AppContext, email: &str, role: Role, clinic: Option<&str>) -> Principal {
    let user = create_user(
        ctx,
        NewUser {
            email: email.into(),
            name: email.split('@').next().unwrap_or(email).into(),
            password: PASSWORD.into(),
            role,
            clinic_id: clinic.map(str::to_string),
        },
    )
    .await
    .unwrap();
    Principal {
        user_id: user.id,
        role: user.role,
        clinic_id: user.clinic_id,
    }
}

/// Poll until the transcription leaves the active states.
pub async fn wait_transcription(ctx: &AppContext, id: &str) -> TranscriptionTask {
    for _ in 0..500 {
        let tid = id.to_string();
        let task = ctx
            .store
            .call(move |s| Ok(s.get_transcription(&tid)?))
            .await
            .unwrap()
            .expect("transcription exists");
        if matches!(task.status, TranscriptionStatus::Completed | TranscriptionStatus::Failed) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transcription {id} did not finish");
}

/// Poll until the analysis leaves the active states.
pub async fn wait_analysis(ctx: &AppContext, id: &str) -> AnalysisTask {
    for _ in 0..500 {
        let aid = id.to_string();
        let task = ctx
            .store
            .call(move |s| Ok(s.get_analysis(&aid)?))
            .await
            .unwrap()
            .expect("analysis exists");
        if matches!(task.status, AnalysisStatus::Completed | AnalysisStatus::Failed) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("analysis {id} did not finish");
}
