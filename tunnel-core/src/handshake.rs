//! The one-time Hello handshake performed after the Link Layer wraps a
//! fresh carrier, before it is handed to a Mux. Generalizes
//! `tcptunnel/client.go::checkServerToken` and
//! `tcptunnel/server.go::checkClientConn` from the original.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Result, TunnelError};

pub const HELLO_REQ: &[u8] = b"Hello";
pub const HELLO_RESP: &[u8] = b"OK";

/// Client side: write the request, read and verify the response.
pub async fn client_handshake<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    carrier: &mut S,
) -> Result<()> {
    carrier
        .write_all(HELLO_REQ)
        .await
        .map_err(TunnelError::Io)?;
    let mut resp = vec![0u8; HELLO_RESP.len()];
    carrier
        .read_exact(&mut resp)
        .await
        .map_err(TunnelError::Io)?;
    if resp != HELLO_RESP {
        return Err(TunnelError::HandshakeFailed {
            peer: "server".to_string(),
            reason: format!("unexpected hello response: {resp:?}"),
        });
    }
    Ok(())
}

/// Server side: read and verify the request, write the response.
pub async fn server_handshake<S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    carrier: &mut S,
) -> Result<()> {
    let mut req = vec![0u8; HELLO_REQ.len()];
    carrier
        .read_exact(&mut req)
        .await
        .map_err(TunnelError::Io)?;
    if req != HELLO_REQ {
        return Err(TunnelError::HandshakeFailed {
            peer: "client".to_string(),
            reason: format!("unexpected hello request: {req:?}"),
        });
    }
    carrier
        .write_all(HELLO_RESP)
        .await
        .map_err(TunnelError::Io)?;
    Ok(())
}
