/// Errors of the telemetry transport edge.
///
/// Decoding and metric derivation never fail: malformed frames are absorbed
/// and reported as "no update" (see [`crate::protocol::Telemetry::decode`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The UDP listener socket could not be bound.
    #[error("Cannot bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// An I/O error from the datagram socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
