//! Symmetric stream encryption wrapping a raw carrier connection.
//!
//! AES-OFB with an all-zero IV. OFB is a keystream cipher: the keystream is
//! independent of the plaintext, so the read-direction and write-direction
//! keystreams only need to stay in lockstep with the number of bytes that
//! have crossed the wire in that direction — not with their content. Because
//! the IV is always zero, the same token must never be reused across
//! independent carriers: doing so reuses the keystream and breaks
//! confidentiality. This is a documented, accepted limitation of the wire
//! format (see the crate-level docs), not an oversight.

use std::pin::Pin;
use std::task::{Context, Poll};

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::key::{derive_key, is_plain_token};

type AesOfb = Ofb<Aes256>;

fn new_keystream(key: &[u8; 32]) -> AesOfb {
    let iv = [0u8; 16];
    AesOfb::new(key.into(), &iv.into())
}

/// A carrier wrapped by the link layer: either passed through unchanged
/// (`Plain`, for the `""`/`"no"` token sentinels) or XOR'd through two
/// independent AES-OFB keystreams (`Ciphered`).
///
/// The `Plain` variant exists so the no-encryption case has zero overhead —
/// Testable Property 2 (identity wrap for sentinel tokens) holds by
/// construction rather than by a cipher that happens to be a no-op.
pub enum MaybeCiphered<S> {
    Plain(S),
    Ciphered(CipherStream<S>),
}

impl<S> MaybeCiphered<S> {
    /// Wrap `stream` for the given token. Sentinel tokens (`""`, `"no"`)
    /// yield `Plain`; any other token derives a key and yields `Ciphered`.
    pub fn wrap(stream: S, token: &str) -> Self {
        if is_plain_token(token) {
            MaybeCiphered::Plain(stream)
        } else {
            let key = derive_key(token);
            MaybeCiphered::Ciphered(CipherStream {
                inner: stream,
                read_stream: new_keystream(&key),
                write_stream: new_keystream(&key),
            })
        }
    }

    /// Borrow the inner carrier, whichever variant this is.
    pub fn get_ref(&self) -> &S {
        match self {
            MaybeCiphered::Plain(s) => s,
            MaybeCiphered::Ciphered(c) => &c.inner,
        }
    }
}

/// The `Ciphered` half of [`MaybeCiphered`]: an inner carrier plus
/// independent read/write AES-OFB keystreams.
pub struct CipherStream<S> {
    inner: S,
    read_stream: AesOfb,
    write_stream: AesOfb,
}

impl<S: AsyncRead + Unpin> AsyncRead for MaybeCiphered<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeCiphered::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeCiphered::Ciphered(c) => {
                let before = buf.filled().len();
                match Pin::new(&mut c.inner).poll_read(cx, buf) {
                    Poll::Ready(Ok(())) => {
                        let filled = buf.filled_mut();
                        c.read_stream.apply_keystream(&mut filled[before..]);
                        Poll::Ready(Ok(()))
                    }
                    other => other,
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MaybeCiphered<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeCiphered::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeCiphered::Ciphered(c) => {
                let mut scratch = buf.to_vec();
                c.write_stream.apply_keystream(&mut scratch);
                Pin::new(&mut c.inner).poll_write(cx, &scratch)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeCiphered::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeCiphered::Ciphered(c) => Pin::new(&mut c.inner).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeCiphered::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeCiphered::Ciphered(c) => Pin::new(&mut c.inner).poll_shutdown(cx),
        }
    }
}
