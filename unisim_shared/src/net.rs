//! Networking primitives.
//!
//! Goals:
//! - Read and write whole frames over any tokio byte stream.
//! - Classify read failures so a reader loop knows whether to keep going.
//! - Skip frames over the size limit without buffering them.

use std::{
    fmt, io,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::{
    codec::{self, CodecError, LEN_PREFIX},
    message::Message,
};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies an accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl ConnId {
    pub fn new_unique() -> Self {
        ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a frame could not be read.
#[derive(Debug, Error)]
pub enum RecvError {
    /// The frame was consumed but could not be decoded. The stream is still
    /// aligned on a frame boundary.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The peer closed the stream, possibly mid-frame.
    #[error("connection closed by peer")]
    Closed,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl RecvError {
    /// Recoverable errors drop one frame; everything else ends the connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RecvError::Codec(_))
    }

    /// Expected ways for a peer to go away. These are not worth a warning.
    pub fn is_peer_reset(&self) -> bool {
        match self {
            RecvError::Codec(_) => false,
            RecvError::Closed => true,
            RecvError::Io(e) => is_peer_reset(e),
        }
    }
}

/// True for the I/O error kinds produced by a peer disconnecting or by our
/// own side shutting the socket.
pub fn is_peer_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

async fn read_exact_or_closed<R>(rd: &mut R, buf: &mut [u8]) -> Result<(), RecvError>
where
    R: AsyncRead + Unpin,
{
    match rd.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(RecvError::Closed),
        Err(e) => Err(RecvError::Io(e)),
    }
}

/// Reads and decodes one frame.
///
/// Frames longer than `max_len` are drained and reported as malformed.
/// A non-positive length prefix carries no payload, so reading simply
/// resumes at the next four bytes.
pub async fn read_message<R>(rd: &mut R, max_len: usize) -> Result<Message, RecvError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX];
    read_exact_or_closed(rd, &mut prefix).await?;
    let len = codec::parse_len_prefix(prefix)?;

    if len > max_len {
        trace!(len, max_len, "draining oversized frame");
        let mut rest = (&mut *rd).take(len as u64);
        let skipped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Err(RecvError::Closed);
        }
        return Err(CodecError::malformed(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        ))
        .into());
    }

    let mut payload = vec![0u8; len];
    read_exact_or_closed(rd, &mut payload).await?;
    Ok(codec::decode_payload(&payload)?)
}

/// Writes an already encoded frame in one piece.
pub async fn write_frame<W>(w: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    w.write_all(frame).await?;
    w.flush().await
}

pub async fn write_message<W>(w: &mut W, msg: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(w, &codec::encode(msg)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let hello = Message::new(MessageBody::Hello).with_client_id(5);
        write_message(&mut a, &hello).await.unwrap();
        write_message(&mut a, &Message::new(MessageBody::Goodbye))
            .await
            .unwrap();

        assert_eq!(read_message(&mut b, 1 << 16).await.unwrap(), hello);
        assert_eq!(
            read_message(&mut b, 1 << 16).await.unwrap().body,
            MessageBody::Goodbye
        );
    }

    #[tokio::test]
    async fn oversize_frame_is_skipped_and_stream_stays_aligned() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let big = Message::new(MessageBody::ScanResponse(crate::message::ScanResponse {
            scan_id: Some(1),
            data: Some("x".repeat(200)),
        }));
        write_message(&mut a, &big).await.unwrap();
        write_message(&mut a, &Message::new(MessageBody::Hello))
            .await
            .unwrap();

        let err = read_message(&mut b, 64).await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(
            read_message(&mut b, 64).await.unwrap().body,
            MessageBody::Hello
        );
    }

    #[tokio::test]
    async fn negative_length_is_dropped_without_closing() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &(-3i32).to_le_bytes()).await.unwrap();
        write_message(&mut a, &Message::new(MessageBody::Hello))
            .await
            .unwrap();

        let err = read_message(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, RecvError::Codec(CodecError::MalformedFrame(_))));
        assert!(read_message(&mut b, 1024).await.is_ok());
    }

    #[tokio::test]
    async fn eof_mid_frame_reports_closed() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &20i32.to_le_bytes()).await.unwrap();
        write_frame(&mut a, &[1, 2, 3]).await.unwrap();
        drop(a);

        let err = read_message(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, RecvError::Closed));
        assert!(err.is_peer_reset());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn reset_kinds_are_classified() {
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_peer_reset(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_peer_reset(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
