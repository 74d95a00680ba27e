use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to connect to relay {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control channel codec error: {0}")]
    Codec(#[from] tunnel_proto::CodecError),

    #[error("relay went silent past the liveness timeout")]
    LivenessTimeout,

    #[error("exhausted all reconnect attempts")]
    ReconnectExhausted,

    #[error("quic configuration error: {0}")]
    QuicConfig(#[from] tunnel_transport_quic::QuicConfigError),

    #[error("quic connection error: {0}")]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
