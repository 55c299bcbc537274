//! Provides an asynchronous UDP listener for EVTV Tesla BMS telemetry using
//! Tokio.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use evtvbms_lib::tokio_udp_async::UdpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), evtvbms_lib::tokio_udp_async::Error> {
//!     let listener = UdpListener::bind(8500).await?;
//!
//!     loop {
//!         if let Some(telemetry) = listener
//!             .recv_frame_timeout(Duration::from_millis(250))
//!             .await?
//!         {
//!             println!("{telemetry:?}");
//!         }
//!     }
//! }
//! ```

use crate::protocol::Telemetry;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Largest datagram the controller broadcasts.
const RECV_BUFFER_LENGTH: usize = 1024;

/// Errors specific to the asynchronous Tokio UDP listener.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error originating from the underlying BMS transport library.
    #[error("EVTV BMS error: {0}")]
    EvtvError(#[from] crate::Error),
    /// An I/O error, typically from the UDP socket.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// A specialized `Result` type for operations within the `tokio_udp_async`
/// module.
type Result<T> = std::result::Result<T, Error>;

/// Asynchronous listener for the controller's telemetry broadcast.
#[derive(Debug)]
pub struct UdpListener {
    socket: UdpSocket,
}

impl UdpListener {
    /// Binds the broadcast port on all interfaces.
    pub async fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|source| crate::Error::Bind { port, source })?;
        log::info!("Listening for BMS telemetry on UDP port {port}");
        Ok(Self { socket })
    }

    /// The locally bound port, useful when bound to port 0.
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Awaits one datagram and decodes it.
    ///
    /// `Ok(None)` when the datagram carried no recognized frame; decode
    /// failures are advisory log lines, never errors.
    pub async fn recv_frame(&self) -> Result<Option<Telemetry>> {
        let mut buffer = [0u8; RECV_BUFFER_LENGTH];
        let (received, source) = self.socket.recv_from(&mut buffer).await?;
        log::trace!(
            "recv_frame: {received} bytes from {source}: {:02X?}",
            &buffer[..received]
        );
        Ok(Telemetry::decode(&buffer[..received]))
    }

    /// Like [`UdpListener::recv_frame`] but gives up after `timeout`,
    /// returning `Ok(None)` so callers can interleave periodic work.
    pub async fn recv_frame_timeout(&self, timeout: Duration) -> Result<Option<Telemetry>> {
        match tokio::time::timeout(timeout, self.recv_frame()).await {
            Ok(result) => result,
            Err(_elapsed) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Soc, FRAME_SOC};

    fn frame(id: u32, payload: [u8; 8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&id.to_le_bytes());
        frame
    }

    #[tokio::test]
    async fn test_loopback_receive_and_decode() {
        let listener = UdpListener::bind(0).await.unwrap();
        let port = listener.local_port().unwrap();
        let sender = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        sender
            .send_to(&frame(FRAME_SOC, [100, 0, 0, 0, 0, 0, 0, 0]), ("127.0.0.1", port))
            .await
            .unwrap();

        let decoded = listener
            .recv_frame_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            decoded,
            Some(Telemetry::Soc(Soc {
                state_of_charge: 50.0
            }))
        );
    }

    #[tokio::test]
    async fn test_timeout_yields_none() {
        let listener = UdpListener::bind(0).await.unwrap();
        let decoded = listener
            .recv_frame_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(decoded, None);
    }
}
