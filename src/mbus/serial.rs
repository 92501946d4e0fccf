//! # Serial Transport Adapter
//!
//! Implements [`MBusTransport`] over a serial line (2400 baud, 8E1 by
//! default, the common M-Bus level-converter settings). The adapter owns
//! frame boundary detection: it reads the start byte, derives the total
//! frame length, and returns one complete frame's bytes per call.

use crate::error::MBusError;
use crate::mbus::transport::MBusTransport;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;

/// Configuration for the serial connection.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baudrate: u32,
    /// Timeout applied when opening the port.
    pub open_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: 2400,
            open_timeout: Duration::from_secs(5),
        }
    }
}

/// A serial port speaking M-Bus framing.
pub struct SerialTransport {
    port: tokio_serial::SerialStream,
}

impl SerialTransport {
    /// Opens `port_name` with the default 2400 8E1 settings.
    pub async fn connect(port_name: &str) -> Result<Self, MBusError> {
        Self::connect_with_config(port_name, SerialConfig::default()).await
    }

    /// Opens `port_name` with custom settings.
    pub async fn connect_with_config(
        port_name: &str,
        config: SerialConfig,
    ) -> Result<Self, MBusError> {
        let port = tokio_serial::new(port_name, config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::Even)
            .timeout(config.open_timeout)
            .open_native_async()
            .map_err(|e| MBusError::SerialPort(e.to_string()))?;
        Ok(SerialTransport { port })
    }

    async fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        window: Duration,
    ) -> Result<bool, MBusError> {
        match timeout(window, self.port.read_exact(buf)).await {
            Err(_) => Ok(false),
            Ok(Err(e)) => Err(MBusError::SerialPort(e.to_string())),
            Ok(Ok(_)) => Ok(true),
        }
    }
}

#[async_trait]
impl MBusTransport for SerialTransport {
    async fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), MBusError> {
        self.port
            .write_all(bytes)
            .await
            .map_err(|e| MBusError::SerialPort(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| MBusError::SerialPort(e.to_string()))
    }

    async fn recv_bytes(&mut self, window: Duration) -> Result<Option<Vec<u8>>, MBusError> {
        let mut frame = BytesMut::with_capacity(261);

        // First byte decides the frame format and, with it, the total length.
        let mut start = [0u8; 1];
        if !self.read_exact_timeout(&mut start, window).await? {
            return Ok(None);
        }
        frame.put_u8(start[0]);

        let total = match start[0] {
            0xE5 => 1,
            0x10 => 5,
            0x68 => {
                let mut lengths = [0u8; 2];
                if !self.read_exact_timeout(&mut lengths, window).await? {
                    // A frame that stalls mid-way is handed back as-is; the
                    // codec reports it as truncated.
                    return Ok(Some(frame.to_vec()));
                }
                frame.put_slice(&lengths);
                // 0x68 L L 0x68 <L bytes> checksum 0x16
                lengths[0] as usize + 6
            }
            // Unrecognized start byte: return it for the codec to reject.
            _ => return Ok(Some(frame.to_vec())),
        };

        if total > frame.len() {
            let mut rest = vec![0u8; total - frame.len()];
            if !self.read_exact_timeout(&mut rest, window).await? {
                return Ok(Some(frame.to_vec()));
            }
            frame.put_slice(&rest);
        }
        Ok(Some(frame.to_vec()))
    }
}
