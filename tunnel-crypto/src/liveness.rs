//! Non-blocking carrier liveness probe.
//!
//! Before handing a carrier to the Mux, endpoints peek at it with a
//! non-blocking one-byte read. A silently-dead TCP connection (peer reset,
//! half-closed by a NAT/firewall) would otherwise block an `accept`
//! indefinitely; this check turns that into an immediate "bad" verdict.
//!
//! Only the Mux ever reads application bytes from a carrier once it has been
//! handed over, so any bytes observed here are themselves evidence of a
//! protocol violation, not legitimate payload.

use tokio::net::TcpStream;

/// Probe `conn` for liveness.
///
/// - `Ok(false)`: healthy (the read would have blocked, i.e. no data and no
///   close pending).
/// - `Ok(true)`: bad — peer closed (0 bytes, no error) or sent unexpected
///   data ahead of the Mux taking over.
/// - `Err(e)`: bad, with the underlying I/O error reported verbatim.
pub fn is_bad_conn(conn: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; 1];
    match conn.try_read(&mut buf) {
        Ok(0) => Ok(true),
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
        (accept_res.unwrap().0, connect_res.unwrap())
    }

    #[tokio::test]
    async fn healthy_conn_would_block() {
        let (a, _b) = connected_pair().await;
        assert!(!is_bad_conn(&a).unwrap());
    }

    #[tokio::test]
    async fn peer_closed_is_bad() {
        let (a, b) = connected_pair().await;
        drop(b);
        // Give the FIN a moment to arrive.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(is_bad_conn(&a).unwrap());
    }

    #[tokio::test]
    async fn unexpected_data_is_bad() {
        use tokio::io::AsyncWriteExt;
        let (mut a, mut b) = connected_pair().await;
        b.write_all(b"x").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(is_bad_conn(&a).unwrap());
        let _ = a.try_read(&mut [0u8; 1]);
    }
}
