// src/pipeline/mod.rs — Bounded background worker pool for transcription and analysis jobs
//
// Jobs are spawned onto the runtime and wait for a semaphore permit, so at
// most `jobs.max_concurrent` run at once. A job owns its task row from
// pending until it is completed or failed.

mod analyze;
mod transcribe;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::analysis::Analyzer;
use crate::db::StoreHandle;
use crate::infra::config::Config;
use crate::infra::errors::DeskError;
use crate::provider::retry::RetryConfig;
use crate::speech::SpeechToText;
use crate::storage::ObjectStorage;

pub use transcribe::transcription_error_code;
pub use analyze::analysis_error_code;

#[derive(Clone)]
pub struct Pipeline {
    store: StoreHandle,
    storage: Arc<dyn ObjectStorage>,
    speech: Arc<dyn SpeechToText>,
    analyzer: Arc<Analyzer>,
    config: Arc<Config>,
    retry: RetryConfig,
    permits: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        store: StoreHandle,
        storage: Arc<dyn ObjectStorage>,
        speech: Arc<dyn SpeechToText>,
        analyzer: Arc<Analyzer>,
        config: Arc<Config>,
    ) -> Self {
        let retry = RetryConfig::from_backoff(&config.jobs.backoff);
        let permits = Arc::new(Semaphore::new(config.jobs.max_concurrent.max(1)));
        Self {
            store,
            storage,
            speech,
            analyzer,
            config,
            retry,
            permits,
        }
    }

    /// Override the transient-error backoff (tests use zero delays).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn submit_transcription(&self, task_id: String) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pipeline.permits.clone().acquire_owned().await else {
                tracing::error!(task_id = %task_id, "Worker pool closed, transcription not run");
                return;
            };
            pipeline.run_transcription(&task_id).await;
        })
    }

    pub fn submit_analysis(&self, task_id: String) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pipeline.permits.clone().acquire_owned().await else {
                tracing::error!(task_id = %task_id, "Worker pool closed, analysis not run");
                return;
            };
            pipeline.run_analysis(&task_id).await;
        })
    }

    /// Run one transcription job to completion, recording any failure on the task.
    pub async fn run_transcription(&self, task_id: &str) {
        match self.transcribe(task_id).await {
            Ok(()) => {}
            Err(e) => {
                let code = transcription_error_code(&e);
                tracing::error!(task_id, code, error = %e, "Transcription failed");
                self.record_failure(task_id, code, &e, |s, id, code, msg| {
                    s.fail_transcription(id, code, msg)
                })
                .await;
            }
        }
    }

    /// Run one analysis job to completion, recording any failure on the task.
    pub async fn run_analysis(&self, task_id: &str) {
        match self.analyze(task_id).await {
            Ok(()) => {}
            Err(e) => {
                let code = analysis_error_code(&e);
                tracing::error!(task_id, code, error = %e, "Analysis failed");
                self.record_failure(task_id, code, &e, |s, id, code, msg| {
                    s.fail_analysis(id, code, msg)
                })
                .await;
            }
        }
    }

    async fn record_failure<F>(&self, task_id: &str, code: &'static str, err: &DeskError, fail: F)
    where
        F: FnOnce(&crate::db::Store, &str, &str, &str) -> anyhow::Result<()> + Send + 'static,
    {
        let id = task_id.to_string();
        let message = err.to_string();
        if let Err(store_err) = self
            .store
            .call(move |s| fail(s, &id, code, &message))
            .await
        {
            // Usually the task left the active states under us (e.g. deleted).
            tracing::warn!(task_id, error = %store_err, "Could not record job failure");
        }
    }
}
