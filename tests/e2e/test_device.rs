//! Raw datagrams against a running device

use super::helpers::*;
use loopcheck::config::FaultPlan;
use loopcheck::device::Board;
use loopcheck::protocol::{
    BoardId, Criterion, IdentityRecord, InitCommand, Schedule, Status, TestReply, TestRequest,
    DATA_LEN,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

fn slow_board() -> Board {
    Board::builder(TEST_BOARD_ID, "raw")
        .group(
            Arc::new(ScriptedEcho::new("slow", 2, Duration::from_millis(100))),
            Schedule::Concurrent,
            [("a", Criterion::ExactMatch), ("b", Criterion::ExactMatch)],
        )
        .build()
        .unwrap()
}

async fn client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(LOOPBACK, port)
}

async fn recv_within(socket: &UdpSocket, ms: u64) -> Option<Vec<u8>> {
    let mut buf = [0u8; 512];
    match tokio::time::timeout(Duration::from_millis(ms), socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

#[tokio::test]
async fn test_identity_answered_to_any_sender() {
    let device = start_device(slow_board, &device_config(FaultPlan::default())).await;
    let socket = client().await;
    socket
        .send_to(&InitCommand::identity().encode(), addr(device.ports.init_port))
        .await
        .unwrap();
    let bytes = recv_within(&socket, 1000).await.unwrap();
    let identity = IdentityRecord::decode(&bytes).unwrap();
    assert_eq!(identity.board_id, TEST_BOARD_ID);
}

#[tokio::test]
async fn test_foreign_board_id_gets_no_reply() {
    let device = start_device(slow_board, &device_config(FaultPlan::default())).await;
    let socket = client().await;
    let group = addr(device.ports.group_port_base);

    let foreign = TestRequest::new(BoardId([1, 1, 1]), 0, [5; DATA_LEN]);
    socket.send_to(&foreign.encode(), group).await.unwrap();
    assert!(recv_within(&socket, 300).await.is_none());

    let catalog = InitCommand::catalog_size(BoardId([1, 1, 1]));
    socket
        .send_to(&catalog.encode(), addr(device.ports.init_port))
        .await
        .unwrap();
    assert!(recv_within(&socket, 300).await.is_none());
}

#[tokio::test]
async fn test_short_packet_gets_no_reply() {
    let device = start_device(slow_board, &device_config(FaultPlan::default())).await;
    let socket = client().await;
    let mut packet = TestRequest::new(TEST_BOARD_ID, 0, [5; DATA_LEN]).encode();
    packet.truncate(60);
    socket
        .send_to(&packet, addr(device.ports.group_port_base))
        .await
        .unwrap();
    assert!(recv_within(&socket, 300).await.is_none());
}

#[tokio::test]
async fn test_busy_group_drops_second_request() {
    let device = start_device(slow_board, &device_config(FaultPlan::default())).await;
    let socket = client().await;
    let group = addr(device.ports.group_port_base);

    let first = TestRequest::new(TEST_BOARD_ID, 0, [1; DATA_LEN]);
    let second = TestRequest::new(TEST_BOARD_ID, 1, [2; DATA_LEN]);
    socket.send_to(&first.encode(), group).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    socket.send_to(&second.encode(), group).await.unwrap();

    let reply = TestReply::decode(&recv_within(&socket, 1000).await.unwrap()).unwrap();
    assert_eq!(reply.sub_test, 0);
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.data, [1; DATA_LEN]);
    assert!(recv_within(&socket, 300).await.is_none());

    // The slot is free again once the reply went out.
    socket.send_to(&second.encode(), group).await.unwrap();
    let reply = TestReply::decode(&recv_within(&socket, 1000).await.unwrap()).unwrap();
    assert_eq!(reply.sub_test, 1);
}

#[tokio::test]
async fn test_unknown_selector_echoes_unchanged() {
    let device = start_device(slow_board, &device_config(FaultPlan::default())).await;
    let socket = client().await;
    let request = TestRequest::new(TEST_BOARD_ID, 9, [0x42; DATA_LEN]);
    socket
        .send_to(&request.encode(), addr(device.ports.group_port_base))
        .await
        .unwrap();
    let reply = TestReply::decode(&recv_within(&socket, 1000).await.unwrap()).unwrap();
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.data, [0x42; DATA_LEN]);
}
