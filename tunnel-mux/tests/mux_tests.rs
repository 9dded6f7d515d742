//! End-to-end multiplexer tests over an in-memory carrier pair.

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tunnel_mux::{Mux, MuxError, Role};

fn carrier_pair() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
    duplex(1024 * 1024)
}

#[tokio::test]
async fn stream_ids_are_monotonically_increasing() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let _initiator = Mux::new(client_side, Role::Initiator);

    let s1 = acceptor.open().unwrap();
    let s2 = acceptor.open().unwrap();
    let s3 = acceptor.open().unwrap();

    assert!(s1.id() < s2.id());
    assert!(s2.id() < s3.id());
}

#[tokio::test]
async fn opened_stream_is_accepted_on_the_other_side() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    let opened = acceptor.open().unwrap();
    let accepted = initiator.accept().await.unwrap();
    assert_eq!(opened.id(), accepted.id());
}

#[tokio::test]
async fn data_arrives_in_order_on_the_accepted_stream() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    let mut opened = acceptor.open().unwrap();
    let mut accepted = initiator.accept().await.unwrap();

    let writer = tokio::spawn(async move {
        opened.write_all(b"first-chunk").await.unwrap();
        opened.write_all(b"-second-chunk").await.unwrap();
        opened.flush().await.unwrap();
        opened
    });

    let mut got = vec![0u8; b"first-chunk-second-chunk".len()];
    accepted.read_exact(&mut got).await.unwrap();
    writer.await.unwrap();

    assert_eq!(&got, b"first-chunk-second-chunk");
}

#[tokio::test]
async fn two_streams_on_one_carrier_do_not_cross_talk() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    let mut a_opened = acceptor.open().unwrap();
    let mut b_opened = acceptor.open().unwrap();
    let mut a_accepted = initiator.accept().await.unwrap();
    let mut b_accepted = initiator.accept().await.unwrap();

    a_opened.write_all(b"for-a").await.unwrap();
    a_opened.flush().await.unwrap();
    b_opened.write_all(b"for-b").await.unwrap();
    b_opened.flush().await.unwrap();

    let mut got_a = [0u8; 5];
    let mut got_b = [0u8; 5];
    a_accepted.read_exact(&mut got_a).await.unwrap();
    b_accepted.read_exact(&mut got_b).await.unwrap();

    assert_eq!(&got_a, b"for-a");
    assert_eq!(&got_b, b"for-b");
}

#[tokio::test]
async fn closing_a_stream_propagates_as_eof_to_the_peer() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    let opened = acceptor.open().unwrap();
    let mut accepted = initiator.accept().await.unwrap();

    opened.close();

    let mut buf = Vec::new();
    accepted.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn roles_are_not_interchangeable() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    assert!(matches!(initiator.open(), Err(MuxError::WrongRole)));
    assert!(matches!(acceptor.accept().await, Err(MuxError::WrongRole)));
}

#[tokio::test]
async fn severed_carrier_fails_pending_accept() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    drop(acceptor);
    let err = initiator.accept().await.unwrap_err();
    assert!(matches!(err, MuxError::MuxClosed));
}

/// Boundary behavior: an empty write produces no observable effect on the
/// peer's read side beyond "nothing arrived yet", and reading one byte at a
/// time still reassembles the full, correctly-ordered payload.
#[tokio::test]
async fn boundary_empty_write_and_one_byte_reads() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    let mut opened = acceptor.open().unwrap();
    let mut accepted = initiator.accept().await.unwrap();

    opened.write_all(b"").await.unwrap();
    opened.write_all(b"abcde").await.unwrap();
    opened.flush().await.unwrap();

    let mut got = Vec::new();
    for _ in 0..5 {
        let mut byte = [0u8; 1];
        accepted.read_exact(&mut byte).await.unwrap();
        got.push(byte[0]);
    }
    assert_eq!(&got, b"abcde");
}

#[tokio::test]
async fn range_visits_every_live_stream_id() {
    let (server_side, client_side) = carrier_pair();
    let acceptor = Mux::new(server_side, Role::Acceptor);
    let initiator = Mux::new(client_side, Role::Initiator);

    let a = acceptor.open().unwrap();
    let b = acceptor.open().unwrap();
    let _a_accepted = initiator.accept().await.unwrap();
    let _b_accepted = initiator.accept().await.unwrap();

    let mut seen = Vec::new();
    acceptor.range(|id| seen.push(id));
    seen.sort();
    let mut expected = [a.id(), b.id()];
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn open_for_an_already_live_id_tears_down_the_mux() {
    // Drive the wire protocol directly so a duplicate OPEN can be injected
    // -- the public `Mux::open` API can never produce one itself, since ids
    // are a monotonic counter.
    use tokio::io::AsyncWriteExt;
    use tunnel_mux::Frame;

    let (server_side, mut client_side) = carrier_pair();
    let initiator = Mux::new(server_side, Role::Initiator);

    Frame::Open { stream_id: 1 }
        .write(&mut client_side)
        .await
        .unwrap();
    let _first = initiator.accept().await.unwrap();

    // A second OPEN for the same id is a protocol violation: the mux must
    // tear itself down rather than silently clobber the live entry.
    Frame::Open { stream_id: 1 }
        .write(&mut client_side)
        .await
        .unwrap();
    client_side.flush().await.unwrap();

    let err = initiator.accept().await.unwrap_err();
    assert!(matches!(err, MuxError::MuxClosed));
}
