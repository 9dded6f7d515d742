//! Bidirectional byte copy between two half-duplex-capable streams.
//!
//! Generalizes `internal/rw.go::RWCopy`: the original races two `io.Copy`
//! goroutines against a 2-buffered error channel and returns on whichever
//! finishes first, then relies on both `Close()`s to unblock the other
//! copy. Here the same shape is two spawned tasks racing in a `tokio::
//! select!`; unlike a bare dropped `JoinHandle` (which only detaches and
//! lets the loser run to completion on its own), the loser is explicitly
//! `abort()`-ed, which drops its held stream half and closes that socket
//! immediately rather than leaving it open until the peer notices on its
//! own.

use tokio::io::{split, AsyncRead, AsyncWrite};

/// Copy `a` <-> `b` until either direction reaches EOF or errors. Returns
/// once the first of the two directions terminates; the still-running
/// direction is aborted immediately after, which drops its stream halves
/// and closes both sockets.
pub async fn splice<A, B>(a: A, b: B)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut a_read, mut a_write) = split(a);
    let (mut b_read, mut b_write) = split(b);

    let a_to_b = tokio::spawn(async move { tokio::io::copy(&mut a_read, &mut b_write).await });
    let b_to_a = tokio::spawn(async move { tokio::io::copy(&mut b_read, &mut a_write).await });

    tokio::select! {
        result = &a_to_b => {
            b_to_a.abort();
            log_copy_result("a->b", result);
        }
        result = &b_to_a => {
            a_to_b.abort();
            log_copy_result("b->a", result);
        }
    }
}

fn log_copy_result(
    direction: &str,
    result: Result<std::io::Result<u64>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(bytes)) => tracing::debug!(direction, bytes, "splice direction finished"),
        Ok(Err(err)) => tracing::debug!(direction, error = %err, "splice direction errored"),
        Err(err) => tracing::debug!(direction, error = %err, "splice task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn splice_forwards_bytes_both_ways() {
        let (left_near, left_far) = duplex(1024);
        let (right_near, mut right_far) = duplex(1024);

        let splice_task = tokio::spawn(splice(left_far, right_near));

        let mut left = left_near;
        left.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        right_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        right_far.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        left.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(left);
        drop(right_far);
        splice_task.await.unwrap();
    }

    #[tokio::test]
    async fn splice_ends_when_one_side_closes() {
        let (left_near, left_far) = duplex(1024);
        let (right_near, right_far) = duplex(1024);

        let splice_task = tokio::spawn(splice(left_far, right_near));
        drop(left_near);
        drop(right_far);

        tokio::time::timeout(std::time::Duration::from_secs(1), splice_task)
            .await
            .expect("splice should terminate promptly once a side closes")
            .unwrap();
    }
}
