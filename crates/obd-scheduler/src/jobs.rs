//! Batch reads run with exclusive access to the client.
//!
//! Each job takes the client mutably, so it is meant to run inside
//! [`crate::TransactionGate::try_spawn`]. Per-PID failures stay inside the
//! returned readings; only trouble code access can fail as a whole.

use obd_protocol::{ObdClient, ObdError, PidDescriptor, PidReading, TroubleCodeKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Live status PID: MIL and trouble code count
const MONITOR_STATUS: &str = "0101";

/// One evaluated PID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidSample {
    pub key: String,
    pub label: String,
    pub reading: PidReading,
    /// Decimals requested by the descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<usize>,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl PidSample {
    fn new(key: &str, descriptor: &PidDescriptor, reading: PidReading) -> Self {
        Self {
            key: key.to_string(),
            label: descriptor.display_label().to_string(),
            reading,
            precision: descriptor.precision(),
            timestamp_ms: now_ms(),
        }
    }

    /// Reading formatted with the descriptor's precision
    pub fn render(&self) -> String {
        match &self.reading {
            PidReading::Value(value) => value.render(self.precision),
            reading => reading.to_string(),
        }
    }
}

/// Samples read from one freeze frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeFrame {
    pub index: u8,
    pub samples: Vec<PidSample>,
}

/// Monitor status plus stored and pending trouble codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TroubleInfo {
    pub status: PidReading,
    pub mil_on: bool,
    pub stored_code_count: u8,
    pub stored: BTreeMap<String, String>,
    pub pending: BTreeMap<String, String>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Valid keys of one mode with a data-carrying descriptor
async fn data_keys(client: &mut ObdClient, prefix: &str) -> Vec<(String, PidDescriptor)> {
    client
        .valid_pids(None)
        .await
        .into_iter()
        .filter(|(key, descriptor)| key.starts_with(prefix) && !descriptor.is_structural())
        .collect()
}

async fn sample_all(
    client: &mut ObdClient,
    keys: Vec<(String, PidDescriptor)>,
    frame: Option<u8>,
) -> Vec<PidSample> {
    let mut samples = Vec::with_capacity(keys.len());
    for (key, descriptor) in keys {
        let reading = client.evaluate(&key, frame).await;
        samples.push(PidSample::new(&key, &descriptor, reading));
    }
    samples
}

/// Every supported mode 01 PID
pub async fn frame_data(client: &mut ObdClient) -> Vec<PidSample> {
    let keys = data_keys(client, "01").await;
    let samples = sample_all(client, keys, None).await;
    debug!("Frame data: {} samples", samples.len());
    samples
}

/// The given keys, in order. Keys outside the valid set read as `NoData`.
///
/// With a frame index, mode 02 keys without their own index read from that
/// freeze frame.
pub async fn selected_data(
    client: &mut ObdClient,
    keys: &[String],
    frame: Option<u8>,
) -> Vec<PidSample> {
    let keys = keys
        .iter()
        .map(|key| {
            let key = key.trim().to_ascii_uppercase();
            let framed = frame.map(|frame| format!("{}{:02}", key, frame));
            let descriptor = client
                .descriptor(&key)
                .or_else(|| framed.as_deref().and_then(|k| client.descriptor(k)))
                .cloned()
                .unwrap_or_else(PidDescriptor::undescribed);
            (key, descriptor)
        })
        .collect();
    sample_all(client, keys, frame).await
}

/// Every supported mode 09 PID
pub async fn vehicle_data(client: &mut ObdClient) -> Vec<PidSample> {
    let keys = data_keys(client, "09").await;
    sample_all(client, keys, None).await
}

/// Enumerate and read every stored freeze frame
pub async fn freeze_frame_data(client: &mut ObdClient) -> Vec<FreezeFrame> {
    let count = client.freeze_frame_count();
    let mut frames = Vec::with_capacity(count as usize);

    for index in 0..count {
        let keys: Vec<(String, PidDescriptor)> = client
            .valid_pids(Some(index))
            .await
            .into_iter()
            .filter(|(_, descriptor)| !descriptor.is_structural())
            .collect();
        let samples = sample_all(client, keys, None).await;
        debug!("Freeze frame {}: {} samples", index, samples.len());
        frames.push(FreezeFrame { index, samples });
    }
    frames
}

/// Refresh the monitor status, then read stored and pending codes
pub async fn trouble_info(client: &mut ObdClient) -> Result<TroubleInfo, ObdError> {
    let status = client.evaluate(MONITOR_STATUS, None).await;
    let stored = client.trouble_codes(TroubleCodeKind::Stored).await?;
    let pending = client.trouble_codes(TroubleCodeKind::Pending).await?;

    Ok(TroubleInfo {
        status,
        mil_on: client.mil_on(),
        stored_code_count: client.stored_code_count(),
        stored,
        pending,
    })
}

/// Clear trouble codes (mode 04) and read the codes again
pub async fn clear_trouble_info(client: &mut ObdClient) -> Result<TroubleInfo, ObdError> {
    let reply = client.clear_trouble_codes().await?;
    info!("Clear trouble codes reply: {}", reply);
    trouble_info(client).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::mock::MockAdapter;
    use obd_protocol::{ConnectStatus, PidValue};

    async fn connected(adapter: MockAdapter) -> ObdClient {
        let mut client = ObdClient::mock(adapter);
        assert_eq!(client.connect().await, ConnectStatus::Success);
        client
    }

    #[tokio::test]
    async fn test_frame_data_skips_bitmaps() {
        let mut client = connected(MockAdapter::healthy()).await;
        let samples = frame_data(&mut client).await;

        assert!(samples.iter().all(|s| s.key.starts_with("01")));
        for bitmap in ["0100", "0120", "0140"] {
            assert!(samples.iter().all(|s| s.key != bitmap));
        }
        let rpm = samples.iter().find(|s| s.key == "010C").unwrap();
        assert_eq!(rpm.label, "Engine RPM (rpm)");
        assert_eq!(rpm.reading, PidReading::Value(PidValue::Number(1726.0)));
        assert_eq!(rpm.render(), "1726");
        assert!(rpm.timestamp_ms > 0);
    }

    #[tokio::test]
    async fn test_selected_data_keeps_order() {
        let mut client = connected(MockAdapter::healthy()).await;
        let keys = vec!["010d".to_string(), "010C".to_string(), "0102".to_string()];
        let samples = selected_data(&mut client, &keys, None).await;

        let order: Vec<&str> = samples.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(order, vec!["010D", "010C", "0102"]);
        assert_eq!(samples[0].reading, PidReading::Value(PidValue::Integer(50)));
        assert_eq!(samples[2].reading, PidReading::NoData);
    }

    #[tokio::test]
    async fn test_vehicle_data_reads_mode_09() {
        let adapter = MockAdapter::healthy().with_response(
            "0902",
            "49020100000031\n49020247314A43\n49020335343434\n49020452373235\n49020532333637",
        );
        let mut client = connected(adapter).await;
        let samples = vehicle_data(&mut client).await;

        assert!(samples.iter().all(|s| s.key.starts_with("09") && s.key != "0900"));
        let vin = samples.iter().find(|s| s.key == "0902").unwrap();
        match &vin.reading {
            PidReading::Value(PidValue::Text(text)) => assert_eq!(text.trim(), "1G1JC5444R7252367"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_freeze_frame_data() {
        let adapter = MockAdapter::healthy()
            .with_response("020000", "420000 FE1F8000")
            .with_response("020C00", "420C001AF8");
        let mut client = connected(adapter).await;
        let frames = freeze_frame_data(&mut client).await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].index, 0);
        let samples = &frames[0].samples;
        assert!(samples.iter().all(|s| s.key.starts_with("02") && s.key != "020000"));
        let rpm = samples.iter().find(|s| s.key == "020C00").unwrap();
        assert_eq!(rpm.reading, PidReading::Value(PidValue::Number(1726.0)));
    }

    #[tokio::test]
    async fn test_trouble_info() {
        let mut client = connected(MockAdapter::healthy()).await;
        let info = trouble_info(&mut client).await.unwrap();

        assert!(info.mil_on);
        assert_eq!(info.stored_code_count, 1);
        assert_eq!(info.stored.keys().collect::<Vec<_>>(), vec!["P0133"]);
        assert!(info.pending.is_empty());
        assert!(matches!(info.status, PidReading::Value(PidValue::Fields(_))));
    }

    #[tokio::test]
    async fn test_clear_trouble_info_rereads_codes() {
        let adapter = MockAdapter::healthy();
        let log = adapter.command_log();
        let mut client = connected(adapter).await;

        let info = clear_trouble_info(&mut client).await.unwrap();
        assert!(info.stored.contains_key("P0133"));

        let commands = log.commands();
        let clear = commands.iter().position(|c| c == "04").unwrap();
        assert_eq!(&commands[clear + 1..], &["0101", "03", "07"]);
    }

    #[tokio::test]
    async fn test_trouble_info_without_connection() {
        let mut client = ObdClient::mock(MockAdapter::healthy());
        let err = trouble_info(&mut client).await.unwrap_err();
        assert!(matches!(err, ObdError::NotConnected));
    }
}
