//! Connection factories. `Dialer` is the Rust rendering of the design
//! notes' "closures as connection factories" guidance: a small
//! one-method interface production code implements over real sockets and
//! tests implement over in-memory duplex pairs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Something that can produce a fresh connection on demand.
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(&self) -> impl Future<Output = std::io::Result<Self::Stream>> + Send;
}

/// Dials a TCP address with a bounded connect timeout (default 10s, per
/// spec.md §4.3/§5).
#[derive(Clone)]
pub struct TcpDialer {
    addr: String,
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self) -> std::io::Result<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", self.addr, self.timeout),
            )),
        }
    }
}

type DuplexHandler = Arc<dyn Fn(DuplexStream) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Test double standing in for a dialed peer: every call to `dial` hands
/// back one end of a fresh in-memory duplex pair and spawns `handler` on
/// the other end (e.g. an echo loop standing in for the private service).
#[derive(Clone)]
pub struct DuplexDialer {
    buffer: usize,
    handler: DuplexHandler,
}

impl DuplexDialer {
    pub fn new<F, Fut>(buffer: usize, handler: F) -> Self
    where
        F: Fn(DuplexStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            buffer,
            handler: Arc::new(move |s| Box::pin(handler(s))),
        }
    }
}

impl Dialer for DuplexDialer {
    type Stream = DuplexStream;

    async fn dial(&self) -> std::io::Result<DuplexStream> {
        let (ours, theirs) = tokio::io::duplex(self.buffer);
        let handler = self.handler.clone();
        tokio::spawn(async move { handler(theirs).await });
        Ok(ours)
    }
}
