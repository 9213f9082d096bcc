//! Stream transport: newline framing over any async byte stream.
//!
//! ## Concurrency model
//!
//! - The stream is split in two. The write half sits behind an async mutex
//!   so concurrent `send()` calls never interleave bytes of two frames.
//! - A background **read task** owns the read half. It scans for the
//!   delimiter, forwards each frame on the inbound channel and exits after
//!   reporting the first failure (clean EOF included) on the error channel.
//!
//! The read task never retries. Once it has reported a failure it drops both
//! senders, so the consumer sees exactly one error and then closed channels.
//!
//! A write that does not complete (cancelled by the caller, interrupted by
//! `close()` or failed) leaves part of a frame on the wire. The writer is
//! discarded and the read task stopped, so the consumer sees both channels
//! close and no later frame is appended to the fragment.
//!
//! Plain TCP and TLS share this driver; they differ only in how the stream
//! is established.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{
    //
    AsyncBufRead,
    AsyncBufReadExt,
    AsyncRead,
    AsyncReadExt,
    AsyncWrite,
    AsyncWriteExt,
    BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

use crate::protocol::DELIMITER;
use crate::{
    //
    log_debug,
    log_info,
    log_trace,
    Result,
    RpcError,
    Transport,
    TransportBase,
    TransportConfig,
    TransportError,
    TransportHandle,
    TransportKind,
    TransportPtr,
};

/// Upper bound on the graceful write-side shutdown in `close()`; a peer that
/// stopped reading must not stall it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type ReaderSlot = StdMutex<Option<JoinHandle<()>>>;

/// Transport over a split byte stream.
struct StreamTransport<W> {
    // ---
    base: TransportBase,
    writer: Mutex<Option<W>>,
    reader: ReaderSlot,

    // Set once `close()` starts; wakes a `send` parked on a full socket.
    closing: watch::Sender<bool>,
}

fn abort_reader(reader: &ReaderSlot) {
    // ---
    let task = match reader.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(task) = task {
        task.abort();
    }
}

fn closed() -> RpcError {
    RpcError::Transport(TransportError::Closed)
}

/// One frame on its way out.
///
/// Dropped before `write` completes, it discards the writer and stops the
/// read task.
struct FrameWrite<'a, W> {
    slot: &'a mut Option<W>,
    reader: &'a ReaderSlot,
    complete: bool,
}

impl<W> FrameWrite<'_, W>
where
    W: AsyncWrite + Unpin,
{
    async fn write(mut self, frame: &[u8]) -> std::io::Result<()> {
        // ---
        if let Some(writer) = self.slot.as_mut() {
            writer.write_all(frame).await?;
            writer.flush().await?;
        }
        self.complete = true;
        Ok(())
    }
}

impl<W> Drop for FrameWrite<'_, W> {
    fn drop(&mut self) {
        // ---
        if !self.complete && self.slot.take().is_some() {
            log_debug!("frame write did not complete, dropping the stream");
            abort_reader(self.reader);
        }
    }
}

#[async_trait::async_trait]
impl<W> Transport for StreamTransport<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    /// Write the frame and flush.
    ///
    /// Waiting for the writer and the write itself both give way to
    /// `close()`, which makes this return `TransportError::Closed`.
    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        let mut closing = self.closing.subscribe();

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = closing.wait_for(|closing| *closing) => return Err(closed()),
        };
        if guard.is_none() {
            return Err(closed());
        }

        let write = FrameWrite {
            slot: &mut *guard,
            reader: &self.reader,
            complete: false,
        };

        tokio::select! {
            written = write.write(&frame) => {
                written.map_err(|err| RpcError::Transport(err.into()))?;
            }
            _ = closing.wait_for(|closing| *closing) => return Err(closed()),
        }

        log_trace!("{}: sent {} bytes", self.base.peer, frame.len());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.closing.send_replace(true);
        abort_reader(&self.reader);

        if let Some(mut writer) = self.writer.lock().await.take() {
            log_info!("{}: closing {} transport", self.base.peer, self.base.kind);
            // Peer may already be gone or not reading; nothing useful to report.
            let _ = time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
        }
        Ok(())
    }
}

impl<W> Drop for StreamTransport<W> {
    fn drop(&mut self) {
        abort_reader(&self.reader);
    }
}

/// Split `stream`, start its read task and return both transport halves.
pub(crate) fn spawn_stream_transport<S>(
    stream: S,
    base: TransportBase,
    config: &TransportConfig,
) -> (TransportPtr, TransportHandle)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    // ---
    let (read_half, write_half) = tokio::io::split(stream);

    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
    let (errors_tx, errors_rx) = mpsc::channel(1);

    let reader = tokio::spawn(read_loop(
        BufReader::new(read_half),
        config.max_frame_len,
        inbound_tx,
        errors_tx,
        base.peer.clone(),
    ));

    let transport = StreamTransport {
        base,
        writer: Mutex::new(Some(write_half)),
        reader: StdMutex::new(Some(reader)),
        closing: watch::channel(false).0,
    };

    let handle = TransportHandle {
        inbound: inbound_rx,
        errors: errors_rx,
    };

    (std::sync::Arc::new(transport), handle)
}

/// Dial `addr` over plain TCP.
///
/// # Errors
///
/// Returns `RpcError::Io` if the connection cannot be established.
pub async fn create_tcp_transport(
    addr: &str,
    config: &TransportConfig,
) -> Result<(TransportPtr, TransportHandle)> {
    // ---
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    log_info!("{addr}: tcp connection established");

    Ok(spawn_stream_transport(
        stream,
        TransportBase::new(addr, TransportKind::Tcp),
        config,
    ))
}

async fn read_loop<R>(
    mut reader: R,
    max_frame_len: usize,
    inbound: mpsc::Sender<Bytes>,
    errors: mpsc::Sender<TransportError>,
    _peer: String,
) where
    R: AsyncBufRead + Unpin,
{
    // ---
    let failure = loop {
        match read_frame(&mut reader, max_frame_len).await {
            Ok(frame) => {
                log_trace!("{_peer}: received {} bytes", frame.len());
                if inbound.send(frame).await.is_err() {
                    log_debug!("{_peer}: frame consumer dropped, stopping read task");
                    return;
                }
            }
            Err(err) => break err,
        }
    };

    log_debug!("{_peer}: read task stopping: {failure}");

    // Consumer may be gone already; either way this is the only report.
    let _ = errors.send(failure).await;
}

/// Read one delimiter-terminated frame and strip the delimiter (and a `\r`
/// before it). A partial frame at EOF is discarded.
async fn read_frame<R>(
    reader: &mut R,
    max_frame_len: usize,
) -> std::result::Result<Bytes, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    // ---
    let mut buf = Vec::new();
    let limit = max_frame_len.saturating_add(1) as u64;

    let n = (&mut *reader)
        .take(limit)
        .read_until(DELIMITER, &mut buf)
        .await?;

    if n == 0 {
        return Err(TransportError::Closed);
    }

    if buf.last() != Some(&DELIMITER) {
        if buf.len() > max_frame_len {
            return Err(TransportError::FrameTooLarge {
                limit: max_frame_len,
            });
        }
        return Err(TransportError::Closed);
    }

    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Bytes::from(buf))
}
