//! Serial transport for ELM327 adapters
//!
//! Writes one command at a time and reads the reply byte by byte until the
//! adapter's `>` prompt. The stream is anything implementing
//! `AsyncRead + AsyncWrite`, so tests can swap the serial port for an
//! in-memory pipe.

use crate::config::{Elm327Config, LineEnding};
use crate::error::ObdError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace};

/// Prompt byte the ELM327 sends when it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Replacement for the adapter's `NO DATA` reply
pub const NO_DATA_FILL: &str = "00000000000000";

/// Byte stream an adapter can be reached over
pub trait SerialIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialIo for T {}

/// Opens the byte stream for a session
pub trait Connector: Send + Sync {
    /// Open a fresh stream to the adapter
    fn open(&self) -> Result<Box<dyn SerialIo>, ObdError>;

    /// Name of the port, reported in adapter info
    fn port_name(&self) -> &str;
}

/// Connector for a real serial (or rfcomm) device
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
        }
    }

    pub fn from_config(config: &Elm327Config) -> Self {
        Self::new(&config.serial_port, config.baud_rate)
    }
}

impl Connector for SerialConnector {
    fn open(&self) -> Result<Box<dyn SerialIo>, ObdError> {
        info!("Opening serial port {} at {} baud", self.port, self.baud_rate);
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ObdError::SerialError(format!("{}: {}", self.port, e)))?;
        Ok(Box::new(stream))
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}

/// Command/response channel to one adapter
pub struct Elm327Transport {
    io: Box<dyn SerialIo>,
    line_ending: LineEnding,
    timeout: Duration,
}

impl Elm327Transport {
    pub fn new(io: Box<dyn SerialIo>, line_ending: LineEnding, timeout: Duration) -> Self {
        Self {
            io,
            line_ending,
            timeout,
        }
    }

    /// Send a command and return the normalised reply.
    ///
    /// Fails with `Timeout` when no byte arrives within the read timeout and
    /// with `Disconnected` when the stream ends before the prompt.
    pub async fn send(&mut self, command: &str) -> Result<String, ObdError> {
        debug!("ELM327 <- {}", command);
        let mut frame = Vec::with_capacity(command.len() + 2);
        frame.extend_from_slice(command.as_bytes());
        frame.extend_from_slice(self.line_ending.as_bytes());
        self.io.write_all(&frame).await?;
        self.io.flush().await?;

        let mut raw = String::new();
        let mut byte = [0u8; 1];
        loop {
            let read = tokio::time::timeout(self.timeout, self.io.read(&mut byte))
                .await
                .map_err(|_| ObdError::Timeout(self.timeout.as_millis() as u64))??;
            if read == 0 {
                return Err(ObdError::Disconnected);
            }
            match byte[0] {
                PROMPT => break,
                b if b > 127 => trace!("Rejecting received byte {}", b),
                b => raw.push(b as char),
            }
        }

        let response = normalize_response(&raw);
        debug!("ELM327 -> {:?}", response);
        Ok(response)
    }

    /// Shut the write half down so the peer sees the stream close
    pub async fn close(&mut self) {
        if let Err(e) = self.io.shutdown().await {
            debug!("Ignoring error while closing serial stream: {}", e);
        }
    }
}

/// Normalise raw adapter output.
///
/// Carriage returns become newlines, blank lines collapse, `NO DATA`
/// becomes fourteen zeros and the text ends with exactly one newline.
pub fn normalize_response(raw: &str) -> String {
    let text = raw.replace('\r', "\n").replace("NO DATA", NO_DATA_FILL);
    let mut lines: Vec<&str> = text.split('\n').filter(|line| !line.is_empty()).collect();
    if lines.is_empty() {
        lines.push("");
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn transport_over(io: tokio::io::DuplexStream, timeout_ms: u64) -> Elm327Transport {
        Elm327Transport::new(Box::new(io), LineEnding::Cr, Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_normalize_collapses_line_endings() {
        assert_eq!(normalize_response("41 0C 1A F8\r\r"), "41 0C 1A F8\n");
        assert_eq!(normalize_response("\r\nOK\r\n\r\n"), "OK\n");
        assert_eq!(normalize_response("AT E0\rOK\r\r"), "AT E0\nOK\n");
    }

    #[test]
    fn test_normalize_no_data_and_empty() {
        assert_eq!(normalize_response("NO DATA\r\r"), "00000000000000\n");
        assert_eq!(normalize_response(""), "\n");
    }

    #[tokio::test]
    async fn test_send_reads_until_prompt() {
        let (client_io, mut adapter_io) = duplex(256);
        let mut transport = transport_over(client_io, 500);

        let adapter = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = adapter_io.read(&mut buf).await.unwrap();
            adapter_io.write_all(b"410D32\r\r>").await.unwrap();
            buf[..n].to_vec()
        });

        let response = transport.send("010D").await.unwrap();
        assert_eq!(response, "410D32\n");
        assert_eq!(adapter.await.unwrap(), b"010D\r".to_vec());
    }

    #[tokio::test]
    async fn test_send_discards_high_bytes() {
        let (client_io, mut adapter_io) = duplex(256);
        let mut transport = transport_over(client_io, 500);

        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let _ = adapter_io.read(&mut buf).await;
            adapter_io.write_all(&[0xFF, b'O', 0x80, b'K', b'\r', b'>']).await.unwrap();
            // Keep the stream open until the client is done.
            let _ = adapter_io.read(&mut buf).await;
        });

        assert_eq!(transport.send("AT E0").await.unwrap(), "OK\n");
    }

    #[tokio::test]
    async fn test_send_times_out_without_prompt() {
        let (client_io, mut adapter_io) = duplex(256);
        let mut transport = transport_over(client_io, 50);

        tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let _ = adapter_io.read(&mut buf).await;
            adapter_io.write_all(b"SEARCHING...").await.unwrap();
            let _ = adapter_io.read(&mut buf).await;
        });

        let err = transport.send("0100").await.unwrap_err();
        assert!(matches!(err, ObdError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_send_reports_disconnect() {
        let (client_io, adapter_io) = duplex(256);
        let mut transport = transport_over(client_io, 500);
        drop(adapter_io);

        let err = transport.send("AT Z").await.unwrap_err();
        assert!(matches!(err, ObdError::Disconnected | ObdError::SerialError(_)));
    }
}
