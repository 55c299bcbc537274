//! Synchronous UDP listener for BMS telemetry broadcasts.
//!
//! The controller pushes datagrams on a fixed port; the listener binds that
//! port, decodes whatever arrives and never fails on malformed input. A read
//! timeout lets a single-threaded caller interleave receiving with periodic
//! work.

use crate::protocol::Telemetry;
use crate::Error;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::Duration;

/// Largest datagram the controller broadcasts.
const RECV_BUFFER_LENGTH: usize = 1024;

#[derive(Debug)]
pub struct UdpListener {
    socket: UdpSocket,
}

impl UdpListener {
    /// Binds the broadcast port on all interfaces.
    pub fn bind(port: u16) -> Result<Self, Error> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(|source| Error::Bind {
            port,
            source,
        })?;
        log::info!("Listening for BMS telemetry on UDP port {port}");
        Ok(Self { socket })
    }

    /// Sets the receive timeout; [`UdpListener::recv_frame`] returns
    /// `Ok(None)` when it elapses.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), Error> {
        self.socket.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    /// The locally bound port, useful when bound to port 0.
    pub fn local_port(&self) -> Result<u16, Error> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Receives one datagram and decodes it.
    ///
    /// `Ok(None)` when the read timed out or the datagram carried no
    /// recognized frame; decode failures are advisory log lines, never
    /// errors.
    pub fn recv_frame(&self) -> Result<Option<Telemetry>, Error> {
        let mut buffer = [0u8; RECV_BUFFER_LENGTH];
        match self.socket.recv_from(&mut buffer) {
            Ok((received, source)) => {
                log::trace!(
                    "recv_frame: {received} bytes from {source}: {:02X?}",
                    &buffer[..received]
                );
                Ok(Telemetry::decode(&buffer[..received]))
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(err) => Err(Error::Io(err)),
        }
    }
}
