use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::CreateSession;

// -- Wire format constants --------------------------------------------------

const TYPE_SNAPSHOT: u8 = 0x01;
const TYPE_OUTPUT: u8 = 0x02;
const TYPE_EXITED: u8 = 0x03;
const TYPE_CREATED: u8 = 0x04;
const TYPE_ACK: u8 = 0x05;
const TYPE_ERROR: u8 = 0x06;
const TYPE_ATTACHED: u8 = 0x07;

const TYPE_INPUT: u8 = 0x10;
const TYPE_RESIZE: u8 = 0x11;
const TYPE_CLOSE: u8 = 0x12;
const TYPE_CREATE: u8 = 0x13;
const TYPE_ATTACH: u8 = 0x14;

/// Header size: 1-byte type + 4-byte payload length.
const HEADER_LEN: usize = 5;

/// Frames above this size are treated as corruption rather than allocated.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// How the PTY process ended. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub signal: Option<String>,
}

// -- Host -> Client messages ------------------------------------------------

/// Messages sent from the session host to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// ANSI bytes reconstructing the current screen, sent right after `Attached`.
    Snapshot(Vec<u8>),
    /// Incremental raw PTY output bytes.
    Output(Vec<u8>),
    Exited(ExitStatus),
    /// Reply to `Create`.
    Created(String),
    /// Reply to `Input`, `Resize` and `Close`.
    Ack,
    /// Any request failed; the payload is a human-readable reason.
    Error(String),
    /// Reply to `Attach`; stream frames follow on the same connection.
    Attached,
}

impl HostMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Snapshot(data) => encode_frame(TYPE_SNAPSHOT, data),
            Self::Output(data) => encode_frame(TYPE_OUTPUT, data),
            Self::Exited(status) => {
                // Serializing two optional scalars cannot fail.
                let payload = serde_json::to_vec(status).unwrap_or_default();
                encode_frame(TYPE_EXITED, &payload)
            }
            Self::Created(id) => encode_frame(TYPE_CREATED, id.as_bytes()),
            Self::Ack => encode_frame(TYPE_ACK, &[]),
            Self::Error(message) => encode_frame(TYPE_ERROR, message.as_bytes()),
            Self::Attached => encode_frame(TYPE_ATTACHED, &[]),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (msg_type, payload) = split_frame(buf)?;

        match msg_type {
            TYPE_SNAPSHOT => Ok(Self::Snapshot(payload.to_vec())),
            TYPE_OUTPUT => Ok(Self::Output(payload.to_vec())),
            TYPE_EXITED => {
                let status = if payload.is_empty() {
                    ExitStatus::default()
                } else {
                    serde_json::from_slice(payload).context("invalid Exited payload")?
                };
                Ok(Self::Exited(status))
            }
            TYPE_CREATED => {
                let id = utf8(payload, "Created")?;
                if id.is_empty() {
                    bail!("Created payload carries an empty session id");
                }
                Ok(Self::Created(id))
            }
            TYPE_ACK => Ok(Self::Ack),
            TYPE_ERROR => Ok(Self::Error(String::from_utf8_lossy(payload).into_owned())),
            TYPE_ATTACHED => Ok(Self::Attached),
            _ => bail!("unknown host message type: {msg_type:#04x}"),
        }
    }
}

// -- Client -> Host messages ------------------------------------------------

/// Messages sent from this client to the session host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Create(CreateSession),
    Attach { session_id: String },
    /// Raw keystrokes to forward to the session's PTY.
    Input { session_id: String, data: Vec<u8> },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    /// Terminate the session's PTY.
    Close { session_id: String },
}

impl ClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Create(request) => {
                let payload = serde_json::to_vec(request).unwrap_or_default();
                encode_frame(TYPE_CREATE, &payload)
            }
            Self::Attach { session_id } => {
                encode_frame(TYPE_ATTACH, &addressed(session_id, &[]))
            }
            Self::Input { session_id, data } => {
                encode_frame(TYPE_INPUT, &addressed(session_id, data))
            }
            Self::Resize {
                session_id,
                cols,
                rows,
            } => {
                let mut geometry = [0u8; 4];
                geometry[..2].copy_from_slice(&cols.to_le_bytes());
                geometry[2..].copy_from_slice(&rows.to_le_bytes());
                encode_frame(TYPE_RESIZE, &addressed(session_id, &geometry))
            }
            Self::Close { session_id } => encode_frame(TYPE_CLOSE, &addressed(session_id, &[])),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (msg_type, payload) = split_frame(buf)?;

        match msg_type {
            TYPE_CREATE => Ok(Self::Create(
                serde_json::from_slice(payload).context("invalid Create payload")?,
            )),
            TYPE_ATTACH => {
                let (session_id, _) = split_addressed(payload)?;
                Ok(Self::Attach { session_id })
            }
            TYPE_INPUT => {
                let (session_id, data) = split_addressed(payload)?;
                Ok(Self::Input {
                    session_id,
                    data: data.to_vec(),
                })
            }
            TYPE_RESIZE => {
                let (session_id, rest) = split_addressed(payload)?;
                if rest.len() != 4 {
                    bail!("Resize geometry must be 4 bytes, got {}", rest.len());
                }
                Ok(Self::Resize {
                    session_id,
                    cols: u16::from_le_bytes([rest[0], rest[1]]),
                    rows: u16::from_le_bytes([rest[2], rest[3]]),
                })
            }
            TYPE_CLOSE => {
                let (session_id, _) = split_addressed(payload)?;
                Ok(Self::Close { session_id })
            }
            _ => bail!("unknown client message type: {msg_type:#04x}"),
        }
    }
}

// -- Stream helpers ---------------------------------------------------------

/// Read one complete `HostMessage` from a byte stream.
pub fn read_host_message(reader: &mut impl Read) -> Result<HostMessage> {
    let frame = read_frame(reader).context("failed to read host message frame")?;
    HostMessage::decode(&frame)
}

/// Read one complete `ClientMessage` from a byte stream.
pub fn read_client_message(reader: &mut impl Read) -> Result<ClientMessage> {
    let frame = read_frame(reader).context("failed to read client message frame")?;
    ClientMessage::decode(&frame)
}

/// Write a `HostMessage` to a byte stream.
pub fn write_host_message(writer: &mut impl Write, msg: &HostMessage) -> Result<()> {
    writer
        .write_all(&msg.encode())
        .context("failed to write host message")?;
    writer.flush().context("failed to flush host message")?;
    Ok(())
}

/// Write a `ClientMessage` to a byte stream.
pub fn write_client_message(writer: &mut impl Write, msg: &ClientMessage) -> Result<()> {
    writer
        .write_all(&msg.encode())
        .context("failed to write client message")?;
    writer.flush().context("failed to flush client message")?;
    Ok(())
}

// -- Private helpers --------------------------------------------------------

/// Build a framed message: `[1-byte type][4-byte payload length (u32 LE)][payload]`.
fn encode_frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(msg_type);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn payload_len(header: &[u8]) -> usize {
    u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize
}

/// Validate a full frame and return its type and payload.
fn split_frame(buf: &[u8]) -> Result<(u8, &[u8])> {
    if buf.len() < HEADER_LEN {
        bail!(
            "truncated header: need {HEADER_LEN} bytes, got {}",
            buf.len()
        );
    }
    let len = payload_len(buf);
    if buf.len() < HEADER_LEN + len {
        bail!(
            "truncated payload: need {} bytes, got {}",
            HEADER_LEN + len,
            buf.len()
        );
    }
    Ok((buf[0], &buf[HEADER_LEN..HEADER_LEN + len]))
}

/// Session-addressed payload: `[u16 LE id length][id][rest]`.
fn addressed(session_id: &str, rest: &[u8]) -> Vec<u8> {
    let id = session_id.as_bytes();
    let mut payload = Vec::with_capacity(2 + id.len() + rest.len());
    payload.extend_from_slice(&(id.len() as u16).to_le_bytes());
    payload.extend_from_slice(id);
    payload.extend_from_slice(rest);
    payload
}

fn split_addressed(payload: &[u8]) -> Result<(String, &[u8])> {
    if payload.len() < 2 {
        bail!("addressed payload too short: {} bytes", payload.len());
    }
    let id_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let Some(id) = payload.get(2..2 + id_len) else {
        bail!("session id overruns payload ({id_len} bytes declared)");
    };
    Ok((utf8(id, "session id")?, &payload[2 + id_len..]))
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).with_context(|| format!("{what} is not valid UTF-8"))
}

/// Read one complete frame (header + payload) from a stream.
fn read_frame(reader: &mut impl Read) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .context("failed to read frame header")?;

    let len = payload_len(&header);
    if len > MAX_PAYLOAD {
        bail!("frame payload of {len} bytes exceeds limit");
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + len, 0);
    reader
        .read_exact(&mut frame[HEADER_LEN..])
        .context("failed to read frame payload")?;

    Ok(frame)
}

// -- Tests ------------------------------------------------------------------
