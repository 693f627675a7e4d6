// src/app.rs — Shared application context

use std::sync::Arc;

use crate::analysis::{Analyzer, PromptLibrary};
use crate::auth::jwt::TokenSigner;
use crate::db::StoreHandle;
use crate::infra::config::Config;
use crate::infra::errors::DeskError;
use crate::pipeline::Pipeline;
use crate::provider::openai::OpenAIProvider;
use crate::provider::retry::{RetryConfig, RetryProvider};
use crate::provider::ModelProvider;
use crate::speech::{SpeechToText, WhisperClient};
use crate::storage::{ObjectStorage, S3Storage};

/// Everything a request handler or CLI command needs. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub store: StoreHandle,
    pub config: Arc<Config>,
    pub storage: Arc<dyn ObjectStorage>,
    pub pipeline: Pipeline,
    pub signer: Arc<TokenSigner>,
}

impl AppContext {
    /// Wire the context from explicit collaborators.
    pub fn new(
        store: StoreHandle,
        config: Config,
        storage: Arc<dyn ObjectStorage>,
        speech: Arc<dyn SpeechToText>,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<Self, DeskError> {
        let config = Arc::new(config);
        let prompts = PromptLibrary::load(config.analysis.prompt_dir.as_deref())?;
        let analyzer = Arc::new(Analyzer::new(provider, prompts, config.analysis.clone()));
        let pipeline = Pipeline::new(
            store.clone(),
            storage.clone(),
            speech,
            analyzer,
            config.clone(),
        );
        let signer = Arc::new(TokenSigner::new(&config.auth.jwt_secret));
        Ok(Self {
            store,
            config,
            storage,
            pipeline,
            signer,
        })
    }

    /// Production wiring: S3, Whisper and the OpenAI chat API with backoff.
    pub fn from_config(store: StoreHandle, config: Config) -> Result<Self, DeskError> {
        let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(&config.storage));
        let speech: Arc<dyn SpeechToText> = Arc::new(WhisperClient::new(&config.transcription));
        let chat: Arc<dyn ModelProvider> = Arc::new(OpenAIProvider::with_base_url(
            config.analysis.api_key.clone(),
            config.analysis.base_url.clone(),
        ));
        let provider: Arc<dyn ModelProvider> = Arc::new(RetryProvider::with_config(
            chat,
            RetryConfig::from_backoff(&config.jobs.backoff),
        ));
        Self::new(store, config, storage, speech, provider)
    }
}
