use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("control channel codec error: {0}")]
    Codec(#[from] tunnel_proto::CodecError),

    #[error("agent went silent past the liveness timeout")]
    LivenessTimeout,

    #[error("no agent is registered for this relay")]
    NoAgent,

    #[error("quic configuration error: {0}")]
    QuicConfig(#[from] tunnel_transport_quic::QuicConfigError),

    #[error("quic connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error("agent did not acknowledge the connection handshake in time")]
    AckTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
