//! Single-transaction gate around an [`ObdClient`]

use crate::error::SchedulerError;
use obd_protocol::ObdClient;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the client and lets at most one job talk to the adapter.
///
/// A job that finds the gate busy is skipped, never queued. The permit and
/// the client guard move into the spawned task and are released when it
/// ends, including by panic.
#[derive(Clone)]
pub struct TransactionGate {
    permit: Arc<Semaphore>,
    client: Arc<Mutex<ObdClient>>,
}

impl TransactionGate {
    pub fn new(client: ObdClient) -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            client: Arc::new(Mutex::new(client)),
        }
    }

    /// Spawn `job` with exclusive access to the client, or return `None`
    /// when a transaction is already in flight.
    pub fn try_spawn<F, Fut, T>(&self, job: F) -> Option<JoinHandle<T>>
    where
        F: FnOnce(OwnedMutexGuard<ObdClient>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = match self.permit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Transaction in flight, job skipped");
                return None;
            }
        };
        let client = self.client.clone();

        Some(tokio::spawn(async move {
            let _permit = permit;
            let guard = client.lock_owned().await;
            job(guard).await
        }))
    }

    /// Run `job` through the gate and wait for its result
    pub async fn run<F, Fut, T>(&self, job: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(OwnedMutexGuard<ObdClient>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.try_spawn(job).ok_or(SchedulerError::Busy)?;
        Ok(handle.await?)
    }

    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }
}
