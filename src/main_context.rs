//! The primary process's serialized "main" context.
//!
//! Jobs posted here run one at a time, in order, on a single task. State that
//! UI-facing code reads is only mutated from inside such a job. An async job
//! holds the context until it completes, so it must never wait on the main
//! context itself.

use std::{future::Future, pin::Pin};

use anyhow::{anyhow, Result};
use log::{error, info};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

type MainJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Clone)]
pub struct MainContext {
    sender: mpsc::UnboundedSender<MainJob>,
}

impl MainContext {
    /// Spawns the executor. It stops once every `MainContext` clone is gone.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<MainJob>();
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
            }
            info!("Main context drained");
        });
        (Self { sender }, worker)
    }

    /// Queues `job` without waiting for it. Returns false once the context
    /// has shut down.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.enqueue(Box::pin(async move { job() }))
    }

    /// Runs `job` on the main context and waits for its result.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.run_async(async move { job() }).await
    }

    /// Like [`run`](Self::run) for work that awaits locks. Nothing else runs
    /// on the context until `job` completes.
    pub async fn run_async<T>(&self, job: impl Future<Output = T> + Send + 'static) -> Result<T>
    where
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let posted = self.enqueue(Box::pin(async move {
            let _ = reply_tx.send(job.await);
        }));
        if !posted {
            return Err(anyhow!("main context has shut down"));
        }
        reply_rx
            .await
            .map_err(|_| anyhow!("main context dropped the job"))
    }

    fn enqueue(&self, job: MainJob) -> bool {
        if self.sender.send(job).is_err() {
            error!("Main context is gone; dropping job");
            return false;
        }
        true
    }
}
