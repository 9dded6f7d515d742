//! A single logical stream carried over the Mux.
//!
//! Each stream owns a receive path fed by the carrier's single reader task
//! (a bounded `mpsc` channel of `Bytes` chunks) and a send path that goes
//! back out through the carrier's single writer task (a `WriterMsg` sent
//! over an unbounded channel shared by every stream). Flow control on the
//! send side is a [`Semaphore`](tokio::sync::Semaphore) counted in bytes:
//! a write blocks until enough `WINDOW_UPDATE` credit has arrived from the
//! peer, exactly mirroring what a byte-counter-plus-condvar would do but
//! with async wake-up for free.
//!
//! State machine: `Open -> HalfClosedLocal / HalfClosedRemote -> Closed`.
//! `Closed` is terminal; once both directions have closed the stream tells
//! the writer task to drop its registry entry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, AcquireError, OwnedSemaphorePermit};

use crate::flow_control::Window;
use crate::frame::Frame;
use crate::mux::WriterMsg;

/// Stream state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Transition after this end sends a `CLOSE`.
    fn close_local(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    /// Transition after a `CLOSE` arrives from the peer.
    fn close_remote(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }
}

/// State shared between a [`MuxStream`] handle and the reader/writer tasks
/// that drive the underlying carrier.
pub struct StreamShared {
    pub(crate) id: u32,
    pub(crate) state: Mutex<StreamState>,
    pub(crate) send_window: Window,
    pub(crate) window_size: u32,
    pub(crate) writer_tx: mpsc::UnboundedSender<WriterMsg>,
}

impl StreamShared {
    pub(crate) fn new(
        id: u32,
        window_size: u32,
        writer_tx: mpsc::UnboundedSender<WriterMsg>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(StreamState::Open),
            send_window: Window::new(window_size),
            window_size,
            writer_tx,
        })
    }

    pub(crate) fn mark_remote_closed(&self) {
        let became_closed = {
            let mut state = self.state.lock();
            let before = *state;
            *state = state.close_remote();
            before != StreamState::Closed && *state == StreamState::Closed
        };
        if became_closed {
            let _ = self.writer_tx.send(WriterMsg::Remove(self.id));
        }
    }

    fn close_local(&self) {
        let (changed, became_closed) = {
            let mut state = self.state.lock();
            let before = *state;
            *state = state.close_local();
            (before != *state, *state == StreamState::Closed)
        };
        if !changed {
            return;
        }
        let _ = self.writer_tx.send(WriterMsg::Send(Frame::Close {
            stream_id: self.id,
        }));
        if became_closed {
            let _ = self.writer_tx.send(WriterMsg::Remove(self.id));
        }
    }

    fn local_write_closed(&self) -> bool {
        matches!(
            *self.state.lock(),
            StreamState::HalfClosedLocal | StreamState::Closed
        )
    }
}

type PermitFuture =
    Pin<Box<dyn Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send>>;

/// A logical, bidirectional stream multiplexed over a shared carrier
/// connection. Implements [`AsyncRead`] and [`AsyncWrite`]; dropping it
/// half-closes both directions the way a `TcpStream` drop does.
pub struct MuxStream {
    pub(crate) shared: Arc<StreamShared>,
    pub(crate) data_rx: mpsc::Receiver<Bytes>,
    read_leftover: Bytes,
    read_eof: bool,
    consumed_since_update: u32,
    pending_permit: Option<PermitFuture>,
    pending_write_len: u32,
}

impl MuxStream {
    pub(crate) fn new(shared: Arc<StreamShared>, data_rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            shared,
            data_rx,
            read_leftover: Bytes::new(),
            read_eof: false,
            consumed_since_update: 0,
            pending_permit: None,
            pending_write_len: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    /// Half-close the local (write) direction. Idempotent.
    pub fn close(&self) {
        self.shared.close_local();
    }

    /// Send a `WINDOW_UPDATE` once a quarter of the window has been
    /// consumed, so the peer gets credit back in a steady trickle rather
    /// than one update per read.
    fn maybe_send_window_update(&mut self) {
        if self.consumed_since_update >= self.shared.window_size / 4 {
            let increment = self.consumed_since_update;
            self.consumed_since_update = 0;
            let _ = self.shared.writer_tx.send(WriterMsg::Send(Frame::WindowUpdate {
                stream_id: self.shared.id,
                increment,
            }));
        }
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if !self.read_leftover.is_empty() {
                let n = buf.remaining().min(self.read_leftover.len());
                let chunk = self.read_leftover.split_to(n);
                buf.put_slice(&chunk);
                self.consumed_since_update = self.consumed_since_update.saturating_add(n as u32);
                self.maybe_send_window_update();
                return Poll::Ready(Ok(()));
            }

            if self.read_eof {
                return Poll::Ready(Ok(()));
            }

            match self.data_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    self.read_leftover = chunk;
                    continue;
                }
                Poll::Ready(None) => {
                    self.read_eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.shared.local_write_closed() {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stream closed",
            )));
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let chunk_len = (buf.len() as u32).min(self.shared.window_size.max(1));

        loop {
            if self.pending_permit.is_none() {
                let sem = self.shared.send_window.semaphore();
                self.pending_write_len = chunk_len;
                self.pending_permit =
                    Some(Box::pin(async move { sem.acquire_many_owned(chunk_len.max(1)).await }));
            }

            let fut = self.pending_permit.as_mut().unwrap();
            match fut.as_mut().poll(cx) {
                Poll::Ready(Ok(permit)) => {
                    permit.forget();
                    self.pending_permit = None;
                    let len = self.pending_write_len as usize;
                    let payload = Bytes::copy_from_slice(&buf[..len]);
                    let id = self.shared.id;
                    if self
                        .shared
                        .writer_tx
                        .send(WriterMsg::Send(Frame::Data {
                            stream_id: id,
                            payload,
                        }))
                        .is_err()
                    {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "mux writer gone",
                        )));
                    }
                    return Poll::Ready(Ok(len));
                }
                Poll::Ready(Err(_)) => {
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "send window closed",
                    )));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.shared.close_local();
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        self.shared.close_local();
    }
}
