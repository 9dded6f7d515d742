//! Stream multiplexer driving many logical streams over one carrier.
//!
//! The carrier is split once, at construction, into a read half and a write
//! half (`tokio::io::split`), each owned exclusively by its own task:
//!
//! - the **reader task** is the only thing that ever reads the carrier. It
//!   parses frames and either creates a new [`MuxStream`] (`OPEN`), forwards
//!   a chunk into the target stream's bounded channel (`DATA`), folds a
//!   half-close into the stream's state machine (`CLOSE`), or tops up a
//!   stream's send window (`WINDOW_UPDATE`).
//! - the **writer task** is the only thing that ever writes the carrier. It
//!   drains a [`WriterMsg`] channel shared by every stream and the mux
//!   handle itself.
//!
//! This single-reader/single-writer split (rather than a lock around the
//! whole carrier) is the same shape `other_examples`' `MultiplexorInner`
//! uses: per-stream channels plus one task per direction, instead of
//! contending for the socket from every stream.
//!
//! Only one side of the carrier ever allocates stream ids and sends `OPEN`:
//! the [`Role::Acceptor`]. The [`Role::Initiator`] only ever receives
//! streams via [`Mux::accept`]. This is a deliberate asymmetry (grounded in
//! the tunnel's own shape: the tunnel server is the one fielding external
//! connections and asking the client to service them) that avoids the
//! odd/even stream-id parity games a peer-symmetric mux would need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::{MuxError, Result};
use crate::flow_control::DEFAULT_WINDOW;
use crate::frame::Frame;
use crate::stream::{MuxStream, StreamShared};

/// Which end of the carrier connection this `Mux` sits on. Determines
/// which of [`Mux::open`] / [`Mux::accept`] is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialed the carrier connection out. Services streams the peer opens.
    Initiator,
    /// Accepted the carrier connection. Opens streams for the peer to
    /// service.
    Acceptor,
}

/// A message bound for the writer task: either a frame to send, or a
/// request to drop a stream's registry entry once it has fully closed.
#[derive(Debug)]
pub(crate) enum WriterMsg {
    Send(Frame),
    Remove(u32),
}

struct StreamEntry {
    shared: Arc<StreamShared>,
    /// `None` once a `CLOSE` has arrived from the peer: dropping the
    /// sender is what makes the stream's `data_rx` observe EOF. The rest
    /// of the entry stays in the registry so `WINDOW_UPDATE`s can still
    /// top up credit for a write direction the peer's `CLOSE` says
    /// nothing about.
    data_tx: Option<mpsc::Sender<Bytes>>,
}

/// Per-stream inbound channel depth. Bounded so a stream whose consumer has
/// stopped reading eventually back-pressures the reader task -- and so,
/// because the reader is shared by every stream, every other stream too.
/// This head-of-line blocking across unrelated streams is a known
/// trade-off of the single-reader design (see `DESIGN.md`).
const INBOUND_CHANNEL_DEPTH: usize = 64;

struct MuxInner {
    role: Role,
    registry: RwLock<HashMap<u32, StreamEntry>>,
    writer_tx: mpsc::UnboundedSender<WriterMsg>,
    closed: AtomicBool,
    window: u32,
}

/// A running multiplexer over one carrier connection. Dropping it tears
/// down the reader and writer tasks.
pub struct Mux {
    inner: Arc<MuxInner>,
    accept_rx: AsyncMutex<mpsc::UnboundedReceiver<MuxStream>>,
    next_id: AtomicU32,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl Mux {
    /// Take ownership of `carrier` and start servicing it with the default
    /// per-stream window.
    pub fn new<S>(carrier: S, role: Role) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_window(carrier, role, DEFAULT_WINDOW)
    }

    pub fn with_window<S>(carrier: S, role: Role, window: u32) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut read_half, mut write_half) = split(carrier);
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterMsg>();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel::<MuxStream>();

        let inner = Arc::new(MuxInner {
            role,
            registry: RwLock::new(HashMap::new()),
            writer_tx: writer_tx.clone(),
            closed: AtomicBool::new(false),
            window,
        });

        let reader_inner = inner.clone();
        let writer_inner = inner.clone();
        let reader_handle = tokio::spawn(async move {
            loop {
                let frame = match Frame::read(&mut read_half).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::debug!(error = %err, "mux carrier read failed, tearing down");
                        break;
                    }
                };
                match frame {
                    Frame::Open { stream_id } => {
                        if reader_inner.role != Role::Initiator {
                            tracing::warn!(stream_id, "OPEN received by non-initiator, ignoring");
                            continue;
                        }
                        if reader_inner.registry.read().contains_key(&stream_id) {
                            tracing::warn!(
                                stream_id,
                                "OPEN for an already-live stream id, tearing down mux"
                            );
                            break;
                        }
                        let (data_tx, data_rx) = mpsc::channel(INBOUND_CHANNEL_DEPTH);
                        let shared =
                            StreamShared::new(stream_id, reader_inner.window, writer_tx.clone());
                        reader_inner.registry.write().insert(
                            stream_id,
                            StreamEntry {
                                shared: shared.clone(),
                                data_tx: Some(data_tx),
                            },
                        );
                        let stream = MuxStream::new(shared, data_rx);
                        if accept_tx.send(stream).is_err() {
                            break;
                        }
                    }
                    Frame::Data { stream_id, payload } => {
                        let data_tx = reader_inner
                            .registry
                            .read()
                            .get(&stream_id)
                            .and_then(|e| e.data_tx.clone());
                        if let Some(data_tx) = data_tx {
                            // Backpressure here is intentional: see
                            // `INBOUND_CHANNEL_DEPTH`.
                            if data_tx.send(payload).await.is_err() {
                                if let Some(entry) =
                                    reader_inner.registry.write().get_mut(&stream_id)
                                {
                                    entry.data_tx = None;
                                }
                            }
                        } else {
                            tracing::debug!(stream_id, "DATA for unknown or half-closed stream, dropping");
                        }
                    }
                    Frame::Close { stream_id } => {
                        let entry_gone = {
                            let mut registry = reader_inner.registry.write();
                            if let Some(entry) = registry.get_mut(&stream_id) {
                                entry.shared.mark_remote_closed();
                                // Drop the sender, not the whole entry: the
                                // local write direction may still be open
                                // and still needs WINDOW_UPDATEs routed.
                                entry.data_tx = None;
                                false
                            } else {
                                true
                            }
                        };
                        if entry_gone {
                            tracing::debug!(stream_id, "CLOSE for unknown stream, ignoring");
                        }
                    }
                    Frame::WindowUpdate {
                        stream_id,
                        increment,
                    } => {
                        if let Some(entry) = reader_inner.registry.read().get(&stream_id) {
                            entry.shared.send_window.release(increment);
                        }
                    }
                }
            }
            reader_inner.closed.store(true, Ordering::SeqCst);
            reader_inner.registry.write().clear();
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                match msg {
                    WriterMsg::Send(frame) => {
                        if frame.write(&mut write_half).await.is_err()
                            || write_half.flush().await.is_err()
                        {
                            tracing::debug!("mux carrier write failed, tearing down");
                            break;
                        }
                    }
                    WriterMsg::Remove(id) => {
                        writer_inner.registry.write().remove(&id);
                    }
                }
            }
            let _ = write_half.shutdown().await;
            writer_inner.closed.store(true, Ordering::SeqCst);
        });

        Mux {
            inner,
            accept_rx: AsyncMutex::new(accept_rx),
            next_id: AtomicU32::new(1),
            reader_handle,
            writer_handle,
        }
    }

    /// Open a new stream for the peer to service. Only valid when this
    /// mux's role is [`Role::Acceptor`].
    pub fn open(&self) -> Result<MuxStream> {
        if self.inner.role != Role::Acceptor {
            return Err(MuxError::WrongRole);
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MuxError::MuxClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (data_tx, data_rx) = mpsc::channel(INBOUND_CHANNEL_DEPTH);
        let shared = StreamShared::new(id, self.inner.window, self.inner.writer_tx.clone());
        self.inner.registry.write().insert(
            id,
            StreamEntry {
                shared: shared.clone(),
                data_tx: Some(data_tx),
            },
        );
        if self
            .inner
            .writer_tx
            .send(WriterMsg::Send(Frame::Open { stream_id: id }))
            .is_err()
        {
            return Err(MuxError::MuxClosed);
        }
        Ok(MuxStream::new(shared, data_rx))
    }

    /// Accept the next stream the peer opened. Only valid when this mux's
    /// role is [`Role::Initiator`]. Resolves to `Err(MuxClosed)` once the
    /// carrier is gone and no more streams will ever arrive.
    pub async fn accept(&self) -> Result<MuxStream> {
        if self.inner.role != Role::Initiator {
            return Err(MuxError::WrongRole);
        }
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(MuxError::MuxClosed)
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn active_stream_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Run `f` over a point-in-time snapshot of this mux's live stream ids,
    /// for observability only (the periodic trace logger, diagnostics
    /// commands). Takes the registry lock only long enough to clone the id
    /// list, so `f` may itself call back into the mux without deadlocking.
    pub fn range<F: FnMut(u32)>(&self, mut f: F) {
        let ids: Vec<u32> = self.inner.registry.read().keys().copied().collect();
        for id in ids {
            f(id);
        }
    }

    /// Tear down both directions of the carrier immediately. Every live
    /// stream's inbound channel is dropped right here rather than left for
    /// the aborted reader task's own cleanup to run -- `JoinHandle::abort`
    /// does not guarantee that code past the current await point executes,
    /// so a stream's `data_tx` could otherwise survive the abort and leave
    /// its `MuxStream::read` waiting on a channel nothing will ever close.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.registry.write().clear();
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

impl Drop for Mux {
    fn drop(&mut self) {
        self.close();
    }
}
