//! Wire framing for the tunnel control and data channels.
//!
//! Every integer on the wire is a big-endian `u32`. Control frames are not
//! length-delimited: the reader always knows how many extra fields follow a
//! command code, because the code itself determines the field count. This
//! mirrors `frps_standalone.py`/`frpc_standalone.py` (TCP variant) and
//! `frps_quic.py`/`frpc_quic.py` (QUIC variant) exactly, including the
//! differing command-code assignments between the two variants.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed before a full frame was read")]
    ShortRead,

    #[error("unknown command code {0}")]
    UnknownCommand(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32, CodecError> {
    match r.read_u32().await {
        Ok(v) => Ok(v),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CodecError::ShortRead),
        Err(e) => Err(e.into()),
    }
}

/// TCP-variant control commands (spec §4.2).
pub mod tcp {
    use super::*;

    pub const CMD_HEARTBEAT: u32 = 1;
    pub const CMD_CONNECTION: u32 = 2;
    pub const CMD_REGISTER_PORT: u32 = 3;
    pub const CMD_UNREGISTER_PORT: u32 = 4;
    pub const CMD_DATA_CONNECT: u32 = 5;

    /// A frame on the control channel (HEARTBEAT/CONNECTION/REGISTER_PORT/
    /// UNREGISTER_PORT), or the one-shot `DATA_CONNECT` handshake frame sent
    /// on a fresh data connection before it stops speaking the control
    /// protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TcpCommand {
        Heartbeat,
        Connection { port: u16 },
        RegisterPort { port: u16 },
        UnregisterPort { port: u16 },
        DataConnect { port: u16 },
    }

    impl TcpCommand {
        pub fn encode(&self) -> Bytes {
            let mut buf = BytesMut::with_capacity(8);
            match *self {
                TcpCommand::Heartbeat => buf.put_u32(CMD_HEARTBEAT),
                TcpCommand::Connection { port } => {
                    buf.put_u32(CMD_CONNECTION);
                    buf.put_u32(port as u32);
                }
                TcpCommand::RegisterPort { port } => {
                    buf.put_u32(CMD_REGISTER_PORT);
                    buf.put_u32(port as u32);
                }
                TcpCommand::UnregisterPort { port } => {
                    buf.put_u32(CMD_UNREGISTER_PORT);
                    buf.put_u32(port as u32);
                }
                TcpCommand::DataConnect { port } => {
                    buf.put_u32(CMD_DATA_CONNECT);
                    buf.put_u32(port as u32);
                }
            }
            buf.freeze()
        }

        pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), CodecError> {
            w.write_all(&self.encode()).await?;
            Ok(())
        }

        /// Reads exactly one command: a code, then the fields that code
        /// implies. There is no length prefix — the field count is a
        /// property of the command code itself.
        pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, CodecError> {
            let code = read_u32(r).await?;
            match code {
                CMD_HEARTBEAT => Ok(TcpCommand::Heartbeat),
                CMD_CONNECTION => Ok(TcpCommand::Connection {
                    port: read_u32(r).await? as u16,
                }),
                CMD_REGISTER_PORT => Ok(TcpCommand::RegisterPort {
                    port: read_u32(r).await? as u16,
                }),
                CMD_UNREGISTER_PORT => Ok(TcpCommand::UnregisterPort {
                    port: read_u32(r).await? as u16,
                }),
                CMD_DATA_CONNECT => Ok(TcpCommand::DataConnect {
                    port: read_u32(r).await? as u16,
                }),
                other => Err(CodecError::UnknownCommand(other)),
            }
        }
    }

}

/// QUIC-variant control commands and data-stream framing (spec §4.2, §4.9).
///
/// The QUIC variant renumbers the control commands relative to the TCP
/// variant and adds `CONNECTION_ACK`; there is no `DATA_CONNECT` because
/// data travels on its own dedicated stream per User connection instead of
/// a fresh TCP connection.
pub mod quic {
    use super::*;

    pub const CMD_HEARTBEAT: u32 = 1;
    pub const CMD_REGISTER_PORT: u32 = 2;
    pub const CMD_UNREGISTER_PORT: u32 = 3;
    pub const CMD_CONNECTION: u32 = 4;
    pub const CMD_CONNECTION_ACK: u32 = 5;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ControlCommand {
        Heartbeat,
        RegisterPort { port: u16 },
        UnregisterPort { port: u16 },
        Connection {
            stream_id: u32,
            port: u16,
            conn_id: u32,
        },
        ConnectionAck {
            stream_id: u32,
        },
    }

    impl ControlCommand {
        pub fn encode(&self) -> Bytes {
            let mut buf = BytesMut::with_capacity(16);
            match *self {
                ControlCommand::Heartbeat => buf.put_u32(CMD_HEARTBEAT),
                ControlCommand::RegisterPort { port } => {
                    buf.put_u32(CMD_REGISTER_PORT);
                    buf.put_u32(port as u32);
                }
                ControlCommand::UnregisterPort { port } => {
                    buf.put_u32(CMD_UNREGISTER_PORT);
                    buf.put_u32(port as u32);
                }
                ControlCommand::Connection {
                    stream_id,
                    port,
                    conn_id,
                } => {
                    buf.put_u32(CMD_CONNECTION);
                    buf.put_u32(stream_id);
                    buf.put_u32(port as u32);
                    buf.put_u32(conn_id);
                }
                ControlCommand::ConnectionAck { stream_id } => {
                    buf.put_u32(CMD_CONNECTION_ACK);
                    buf.put_u32(stream_id);
                }
            }
            buf.freeze()
        }

        pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), CodecError> {
            w.write_all(&self.encode()).await?;
            Ok(())
        }

        pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, CodecError> {
            let code = read_u32(r).await?;
            match code {
                CMD_HEARTBEAT => Ok(ControlCommand::Heartbeat),
                CMD_REGISTER_PORT => Ok(ControlCommand::RegisterPort {
                    port: read_u32(r).await? as u16,
                }),
                CMD_UNREGISTER_PORT => Ok(ControlCommand::UnregisterPort {
                    port: read_u32(r).await? as u16,
                }),
                CMD_CONNECTION => {
                    let stream_id = read_u32(r).await?;
                    let port = read_u32(r).await? as u16;
                    let conn_id = read_u32(r).await?;
                    Ok(ControlCommand::Connection {
                        stream_id,
                        port,
                        conn_id,
                    })
                }
                CMD_CONNECTION_ACK => Ok(ControlCommand::ConnectionAck {
                    stream_id: read_u32(r).await?,
                }),
                other => Err(CodecError::UnknownCommand(other)),
            }
        }
    }

    /// A single `{len, conn_id, payload}` record on a QUIC data stream.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DataFrame {
        pub conn_id: u32,
        pub payload: Bytes,
    }

    impl DataFrame {
        pub fn encode(&self) -> Bytes {
            let mut buf = BytesMut::with_capacity(8 + self.payload.len());
            buf.put_u32(self.payload.len() as u32);
            buf.put_u32(self.conn_id);
            buf.extend_from_slice(&self.payload);
            buf.freeze()
        }
    }

    /// Per-stream reassembly buffer: a single producer (the QUIC event
    /// dispatch loop feeding raw bytes) and a single consumer (whoever pulls
    /// decoded frames out), per spec §9. Never shared across streams.
    #[derive(Debug, Default)]
    pub struct FrameDecoder {
        buf: BytesMut,
    }

    impl FrameDecoder {
        pub fn new() -> Self {
            Self {
                buf: BytesMut::new(),
            }
        }

        pub fn feed(&mut self, data: &[u8]) {
            self.buf.extend_from_slice(data);
        }

        /// Returns the next full frame if the buffer holds one, leaving any
        /// trailing partial frame bytes in place for the next `feed`.
        pub fn try_decode(&mut self) -> Result<Option<DataFrame>, CodecError> {
            if self.buf.len() < 8 {
                return Ok(None);
            }
            let len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            if self.buf.len() < 8 + len {
                return Ok(None);
            }
            self.buf.advance(4);
            let conn_id = self.buf.get_u32();
            let payload = self.buf.split_to(len).freeze();
            Ok(Some(DataFrame { conn_id, payload }))
        }
    }

}
