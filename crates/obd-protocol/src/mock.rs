//! Scripted ELM327 adapter for tests.
//!
//! `MockAdapter` answers commands from a table over an in-memory duplex
//! stream. It echoes commands until `AT E0`, ends every reply with the `>`
//! prompt and records each command it receives, so the whole client stack
//! can be driven without hardware. Request bytes that arrive while a reply is
//! still pending are counted as overlapping transactions.

use crate::error::ObdError;
use crate::transport::{Connector, SerialIo};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

const UNKNOWN_COMMAND: &str = "?";

/// Normalise a command for table lookup: no spaces, upper case
fn command_key(command: &str) -> String {
    command
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Adapter side of one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// A complete command line arrived
    Request(String),
    /// The reply and its `>` prompt were written
    Prompt(String),
}

/// Commands received by a mock adapter, shared with the test
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    events: Arc<Mutex<Vec<AdapterEvent>>>,
    overlaps: Arc<AtomicUsize>,
}

impl CommandLog {
    fn record(&self, event: AdapterEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn overlapped(&self, command: &str) {
        debug!("Mock ELM327 got request bytes before answering {}", command);
        self.overlaps.fetch_add(1, Ordering::SeqCst);
    }

    /// Request and prompt events in the order they happened
    pub fn events(&self) -> Vec<AdapterEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Snapshot of every command so far, normalised
    pub fn commands(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AdapterEvent::Request(command) => Some(command),
                AdapterEvent::Prompt(_) => None,
            })
            .collect()
    }

    /// How many times `command` was received
    pub fn count(&self, command: &str) -> usize {
        let key = command_key(command);
        self.commands().iter().filter(|c| **c == key).count()
    }

    /// Requests that began before the previous reply's prompt was sent
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// Simulated adapter
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    responses: HashMap<String, String>,
    silent: HashSet<String>,
    delays: HashMap<String, Duration>,
    log: CommandLog,
}

impl MockAdapter {
    /// Adapter that answers `?` to everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter with a working handshake and a small petrol ECU behind it:
    /// 17 mode 01 PIDs in the first block, MIL on with one stored code.
    pub fn healthy() -> Self {
        let mut adapter = Self::new()
            .with_response("AT Z", "ELM327 v1.5")
            .with_response("0100", "4100BE1FA813")
            .with_response("0120", "4120A0000001")
            .with_response("0140", "414040000000")
            .with_response("0101", "410181076504")
            .with_response("050100", "450100C0000000")
            .with_response("0900", "49000155400000")
            .with_response("0104", "41047F")
            .with_response("0105", "41057B")
            .with_response("010C", "410C1AF8")
            .with_response("010D", "410D32")
            .with_response("03", "430133000000")
            .with_response("07", "NO DATA")
            .with_response("04", "44")
            .with_response("AT I", "ELM327 v1.5")
            .with_response("AT @1", "OBDII to RS232 Interpreter")
            .with_response("AT @2", "?")
            .with_response("AT DP", "AUTO, ISO 9141-2")
            .with_response("AT RV", "12.6V")
            .with_response("AT CS", "T:00 R:00")
            .with_response("AT KW", "1:08 2:08")
            .with_response("AT BD", "00 00 00 00")
            .with_response("AT PPS", "00:FF F  01:FF F\n02:FF F  03:32 F");
        for command in ["AT E0", "AT L0", "AT R1", "AT H0", "AT S0", "AT SP A3", "AT IB 10"] {
            adapter = adapter.with_response(command, "OK");
        }
        adapter
    }

    /// Answer `command` with `response`. Newlines in `response` are sent as
    /// carriage returns.
    pub fn with_response(mut self, command: &str, response: &str) -> Self {
        self.responses
            .insert(command_key(command), response.replace('\n', "\r"));
        self.silent.remove(&command_key(command));
        self
    }

    /// Never answer `command`, so the client times out
    pub fn silent_on(mut self, command: &str) -> Self {
        self.silent.insert(command_key(command));
        self
    }

    /// Hold the reply to `command` back for `delay`
    pub fn with_delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command_key(command), delay);
        self
    }

    /// Handle to the commands this adapter (and its clones) received
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Start serving on a fresh duplex stream and return the client end
    pub fn spawn(self) -> DuplexStream {
        let (client, adapter) = tokio::io::duplex(4096);
        tokio::spawn(self.serve(adapter));
        client
    }

    async fn serve(self, mut stream: DuplexStream) {
        let mut echo = true;
        let mut line = String::new();
        let mut pending = VecDeque::new();
        let mut buf = [0u8; 256];

        loop {
            let Some(byte) = pending.pop_front() else {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => pending.extend(&buf[..n]),
                }
                continue;
            };
            match byte {
                b'\r' => {}
                b'\n' => continue,
                b => {
                    line.push(char::from(b));
                    continue;
                }
            }

            let command = std::mem::take(&mut line);
            let key = command_key(&command);
            if key.is_empty() {
                continue;
            }
            self.log.record(AdapterEvent::Request(key.clone()));
            if self.silent.contains(&key) {
                debug!("Mock ELM327 ignoring {}", key);
                continue;
            }
            if pending.iter().any(|b| *b != b'\n') {
                self.log.overlapped(&key);
            }

            let mut reply = String::new();
            if echo {
                reply.push_str(&command);
                reply.push('\r');
            }
            match key.as_str() {
                "ATZ" => echo = true,
                "ATE0" => echo = false,
                "ATE1" => echo = true,
                _ => {}
            }
            let response = self
                .responses
                .get(&key)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_COMMAND);
            reply.push_str(response);
            reply.push_str("\r\r>");

            if let Some(delay) = self.delays.get(&key) {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    read = stream.read(&mut buf) => {
                        if let Ok(n) = read {
                            if n > 0 {
                                self.log.overlapped(&key);
                                pending.extend(&buf[..n]);
                            }
                        }
                    }
                }
            }
            if stream.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
            self.log.record(AdapterEvent::Prompt(key));
        }
    }
}

/// Connector that serves each `open` from a clone of one mock adapter
#[derive(Debug, Clone)]
pub struct MockConnector {
    adapter: MockAdapter,
    failure: Option<String>,
}

impl MockConnector {
    pub fn new(adapter: MockAdapter) -> Self {
        Self {
            adapter,
            failure: None,
        }
    }

    /// Connector whose port can never be opened
    pub fn unavailable(reason: &str) -> Self {
        Self {
            adapter: MockAdapter::new(),
            failure: Some(reason.to_string()),
        }
    }
}

impl Connector for MockConnector {
    fn open(&self) -> Result<Box<dyn SerialIo>, ObdError> {
        match &self.failure {
            Some(reason) => Err(ObdError::SerialError(reason.clone())),
            None => Ok(Box::new(self.adapter.clone().spawn())),
        }
    }

    fn port_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineEnding;
    use crate::transport::Elm327Transport;

    fn transport(adapter: MockAdapter) -> Elm327Transport {
        Elm327Transport::new(
            Box::new(adapter.spawn()),
            LineEnding::Cr,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_echo_until_echo_off() {
        let adapter = MockAdapter::healthy();
        let log = adapter.command_log();
        let mut elm = transport(adapter);

        assert_eq!(elm.send("AT Z").await.unwrap(), "AT Z\nELM327 v1.5\n");
        assert_eq!(elm.send("AT E0").await.unwrap(), "AT E0\nOK\n");
        assert_eq!(elm.send("AT L0").await.unwrap(), "OK\n");
        assert_eq!(elm.send("0999").await.unwrap(), "?\n");
        assert_eq!(log.commands(), vec!["ATZ", "ATE0", "ATL0", "0999"]);
    }

    #[tokio::test]
    async fn test_silent_command_times_out() {
        let mut elm = transport(MockAdapter::healthy().silent_on("0100"));
        let err = elm.send("0100").await.unwrap_err();
        assert!(matches!(err, ObdError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_multiline_response() {
        let adapter = MockAdapter::new().with_response("0902", "490201000000\n4902024731");
        let mut elm = transport(adapter);
        elm.send("AT E0").await.unwrap();
        assert_eq!(elm.send("0902").await.unwrap(), "490201000000\n4902024731\n");
    }

    #[tokio::test]
    async fn test_pipelined_request_counts_as_overlap() {
        let adapter = MockAdapter::healthy().with_delay("010C", Duration::from_millis(20));
        let log = adapter.command_log();
        let mut stream = adapter.spawn();

        stream.write_all(b"010C\r010D\r").await.unwrap();
        let mut prompts = 0;
        let mut buf = [0u8; 64];
        while prompts < 2 {
            let n = stream.read(&mut buf).await.unwrap();
            prompts += buf[..n].iter().filter(|b| **b == b'>').count();
        }

        assert_eq!(log.overlaps(), 1);
        assert_eq!(
            log.events(),
            vec![
                AdapterEvent::Request("010C".to_string()),
                AdapterEvent::Prompt("010C".to_string()),
                AdapterEvent::Request("010D".to_string()),
                AdapterEvent::Prompt("010D".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_sequential_requests_do_not_overlap() {
        let adapter = MockAdapter::healthy().with_delay("010C", Duration::from_millis(10));
        let log = adapter.command_log();
        let mut elm = transport(adapter);

        elm.send("010C").await.unwrap();
        elm.send("010C").await.unwrap();
        assert_eq!(log.overlaps(), 0);
        assert_eq!(log.count("010C"), 2);
    }

    #[test]
    fn test_unavailable_connector() {
        let connector = MockConnector::unavailable("no such device");
        assert!(matches!(connector.open(), Err(ObdError::SerialError(_))));
    }
}
