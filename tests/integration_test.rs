use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{net::UdpSocket, time::timeout};

use xdmcp_manager::config::{Config, Server};

/// Binds a manager on a fixed high port and drives one BroadcastQuery ->
/// Willing round trip over a real UDP socket end to end (§8 scenario 1).
#[tokio::test]
async fn broadcast_query_gets_willing_over_the_wire() {
    let port = 17177;
    let config = Arc::new(Config {
        server: Server {
            port,
            ..Server::default()
        },
        ..Config::default()
    });

    tokio::spawn(xdmcp_manager::startup(config));
    // Give the manager's bind a moment to land before the client sends.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = UdpSocket::bind("0.0.0.0:0").await.unwrap();
    let server: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    let mut buf = codec::XdmcpBuffer::default();
    codec::message::QueryPayload {
        authentication_names: vec![],
    }
    .encode(&mut buf);
    let query = buf.finish(codec::XDM_PROTOCOL_VERSION, codec::Opcode::BroadcastQuery);

    client.send_to(&query, server).await.unwrap();

    let mut recv_buf = [0u8; 4096];
    let (size, _) = timeout(Duration::from_secs(2), client.recv_from(&mut recv_buf))
        .await
        .expect("timed out waiting for a reply")
        .unwrap();

    let header = codec::Header::decode(&recv_buf[..size]).unwrap();
    assert_eq!(header.opcode, codec::Opcode::Willing);
}
