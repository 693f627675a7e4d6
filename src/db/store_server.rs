// src/db/store_server.rs — Async message passing for Store
//
// One tokio task owns the `Store`. Callers send a closure and await the reply
// on a oneshot channel. Closures run one at a time, so a read-check-write
// sequence inside a single closure cannot interleave with another caller.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};

use crate::db::store::Store;
use crate::infra::errors::DeskError;

type StoreJob = Box<dyn FnOnce(&Store) + Send>;

pub enum StoreCommand {
    Run(StoreJob),
}

/// A handle to the Store that uses message passing.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    /// Run `f` against the store and return its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, DeskError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> anyhow::Result<T> + Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel();
        let job: StoreJob = Box::new(move |store| {
            let _ = resp_tx.send(f(store));
        });
        self.tx
            .send(StoreCommand::Run(job))
            .await
            .map_err(|_| DeskError::Other(anyhow::anyhow!("store server is gone")))?;
        let res = resp_rx
            .await
            .map_err(|_| DeskError::Other(anyhow::anyhow!("store server dropped the reply")))?;
        res.map_err(DeskError::from_anyhow)
    }
}

/// Spawn the store server and return a handle to it.
pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

/// The background task that owns the Store.
pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Run(job) => {
                // A panicking job drops its reply sender; the caller sees an
                // error and the server keeps serving.
                if catch_unwind(AssertUnwindSafe(|| job(&store))).is_err() {
                    tracing::error!("store job panicked");
                }
            }
        }
    }
    tracing::debug!("store server stopped");
}
