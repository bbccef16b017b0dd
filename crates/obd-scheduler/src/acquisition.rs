//! Always-running live data poller

use crate::gate::TransactionGate;
use crate::jobs::{self, PidSample};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Configuration for the acquisition loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Sleep between iterations in milliseconds (default: 100)
    pub idle_interval_ms: u64,
    /// PID keys to poll; empty polls every supported mode 01 PID
    pub keys: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 100,
            keys: Vec::new(),
        }
    }
}

impl AcquisitionConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

/// Go/stop toggle shared with the running loop
#[derive(Debug, Clone, Default)]
pub struct AcquisitionHandle {
    running: Arc<AtomicBool>,
}

impl AcquisitionHandle {
    pub fn go(&self) {
        info!("Acquisition started");
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        info!("Acquisition stopped");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Flip the toggle and return the new state
    pub fn toggle(&self) -> bool {
        let running = !self.running.fetch_xor(true, Ordering::SeqCst);
        info!("Acquisition {}", if running { "started" } else { "stopped" });
        running
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Polls live data through the gate while switched on.
///
/// The toggle is read between iterations only, so a read in flight always
/// runs to completion or timeout. A poll that finds the gate busy is
/// skipped.
pub struct AcquisitionLoop {
    gate: TransactionGate,
    config: AcquisitionConfig,
    handle: AcquisitionHandle,
}

impl AcquisitionLoop {
    /// Create a loop in the stopped state
    pub fn new(gate: TransactionGate, config: AcquisitionConfig) -> Self {
        info!(
            "Acquisition loop created: {} keys, idle {} ms",
            config.keys.len(),
            config.idle_interval_ms
        );
        Self {
            gate,
            config,
            handle: AcquisitionHandle::default(),
        }
    }

    pub fn handle(&self) -> AcquisitionHandle {
        self.handle.clone()
    }

    pub fn go(&self) {
        self.handle.go();
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Run until the sample receiver is dropped.
    ///
    /// Each completed poll sends one batch with `try_send`; a full channel
    /// drops the batch.
    pub async fn run(&self, sample_tx: mpsc::Sender<Vec<PidSample>>) {
        info!("Starting acquisition loop");

        while !sample_tx.is_closed() {
            if self.handle.is_running() {
                self.poll(&sample_tx);
            }
            tokio::time::sleep(self.config.idle_interval()).await;
        }

        info!("Acquisition loop stopped");
    }

    fn poll(&self, sample_tx: &mpsc::Sender<Vec<PidSample>>) {
        if self.gate.is_busy() {
            debug!("Gate busy, poll skipped");
            return;
        }
        let keys = self.config.keys.clone();
        let tx = sample_tx.clone();

        let spawned = self.gate.try_spawn(move |mut client| async move {
            let batch = if keys.is_empty() {
                jobs::frame_data(&mut client).await
            } else {
                jobs::selected_data(&mut client, &keys, None).await
            };
            if tx.try_send(batch).is_err() {
                debug!("Sample consumer not keeping up, batch dropped");
            }
        });
        if spawned.is_none() {
            debug!("Gate busy, poll skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::mock::MockAdapter;
    use obd_protocol::{ConnectStatus, ObdClient, PidReading, PidValue};

    async fn gate() -> TransactionGate {
        let mut client = ObdClient::mock(MockAdapter::healthy());
        assert_eq!(client.connect().await, ConnectStatus::Success);
        TransactionGate::new(client)
    }

    fn config(keys: &[&str]) -> AcquisitionConfig {
        AcquisitionConfig {
            idle_interval_ms: 5,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.idle_interval(), Duration::from_millis(100));
        assert!(config.keys.is_empty());
    }

    #[test]
    fn test_toggle() {
        let handle = AcquisitionHandle::default();
        assert!(!handle.is_running());
        assert!(handle.toggle());
        assert!(handle.is_running());
        assert!(!handle.toggle());
        handle.go();
        handle.stop();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_loop_emits_batches_while_running() {
        let acquisition = Arc::new(AcquisitionLoop::new(gate().await, config(&["010C", "010D"])));
        let (tx, mut rx) = mpsc::channel(4);
        acquisition.go();

        let runner = {
            let acquisition = acquisition.clone();
            tokio::spawn(async move { acquisition.run(tx).await })
        };

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].key, "010C");
        assert_eq!(batch[0].reading, PidReading::Value(PidValue::Number(1726.0)));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_poll_skipped_while_gate_held() {
        let gate = gate().await;
        let held = gate
            .try_spawn(|_client| tokio::time::sleep(Duration::from_millis(100)))
            .unwrap();
        let acquisition = Arc::new(AcquisitionLoop::new(gate, config(&["010C"])));
        let (tx, mut rx) = mpsc::channel(4);
        acquisition.go();

        let runner = {
            let acquisition = acquisition.clone();
            tokio::spawn(async move { acquisition.run(tx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        held.await.unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].key, "010C");

        drop(rx);
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_loop_sends_nothing() {
        let acquisition = Arc::new(AcquisitionLoop::new(gate().await, config(&[])));
        let (tx, mut rx) = mpsc::channel(4);

        let runner = {
            let acquisition = acquisition.clone();
            tokio::spawn(async move { acquisition.run(tx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        acquisition.go();
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.iter().any(|s| s.key == "010C"));

        acquisition.stop();
        drop(rx);
        runner.await.unwrap();
    }
}
