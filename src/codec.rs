//! Wire codec: status frames and self-describing-length blob frames.
//!
//! Pure framing on top of `AsyncRead + AsyncWrite` — no session state, no
//! retries. A `CodecError::Io` means the connection died; a
//! `CodecError::Protocol` means the peer said something the protocol
//! doesn't allow.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::protocol::{StatusCode, MAX_CHUNK};

#[derive(Debug)]
pub enum CodecError {
    Io(std::io::Error),
    Protocol(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Io(e) => write!(f, "connection error: {e}"),
            CodecError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e)
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Write a single status byte.
pub async fn write_status<S: AsyncWrite + Unpin>(stream: &mut S, code: StatusCode) -> CodecResult<()> {
    stream.write_all(&[code.as_u8()]).await?;
    Ok(())
}

/// Read a single status byte. Any byte outside the protocol table is a
/// `Protocol` error — the receiver is expected to close the connection
/// without replying further (§4.2 tie-breaks).
pub async fn read_status<S: AsyncRead + Unpin>(stream: &mut S) -> CodecResult<StatusCode> {
    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf).await?;
    StatusCode::try_from(buf[0]).map_err(|byte| CodecError::Protocol(format!("unknown status byte {byte}")))
}

async fn expect_success<S: AsyncRead + Unpin>(stream: &mut S) -> CodecResult<()> {
    match read_status(stream).await? {
        StatusCode::Success => Ok(()),
        other => Err(CodecError::Protocol(format!(
            "expected SUCCESS ack, got {other:?}"
        ))),
    }
}

fn width_for(len: u64) -> u8 {
    let bits = 64 - len.leading_zeros();
    ((bits as u8 + 7) / 8).max(1)
}

/// Write a length-prefixed blob: width byte, length bytes, payload in
/// `MAX_CHUNK`-sized writes — each step acknowledged by the peer with a
/// SUCCESS status frame.
pub async fn write_blob<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) -> CodecResult<()> {
    let len = payload.len() as u64;
    let width = width_for(len);

    stream.write_all(&[width]).await?;
    expect_success(stream).await?;

    let len_bytes = len.to_be_bytes();
    stream.write_all(&len_bytes[8 - width as usize..]).await?;
    expect_success(stream).await?;

    for chunk in payload.chunks(MAX_CHUNK) {
        stream.write_all(chunk).await?;
    }
    expect_success(stream).await?;

    Ok(())
}

/// Read a length-prefixed blob, mirroring `write_blob`'s three-step
/// handshake. Rejects `w == 0` and `w > 8` as protocol errors.
pub async fn read_blob<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> CodecResult<Vec<u8>> {
    let mut width_buf = [0u8; 1];
    stream.read_exact(&mut width_buf).await?;
    let width = width_buf[0];
    if width == 0 || width > 8 {
        return Err(CodecError::Protocol(format!(
            "invalid length width {width} (must be 1..=8)"
        )));
    }
    write_status(stream, StatusCode::Success).await?;

    let mut len_buf = [0u8; 8];
    stream
        .read_exact(&mut len_buf[8 - width as usize..])
        .await?;
    let len = u64::from_be_bytes(len_buf) as usize;
    write_status(stream, StatusCode::Success).await?;

    let mut payload = vec![0u8; len];
    let mut read_so_far = 0;
    while read_so_far < len {
        let end = (read_so_far + MAX_CHUNK).min(len);
        stream.read_exact(&mut payload[read_so_far..end]).await?;
        read_so_far = end;
    }
    write_status(stream, StatusCode::Success).await?;

    Ok(payload)
}
