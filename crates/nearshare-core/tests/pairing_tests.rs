//! 集成测试 - 配对工作流
//!
//! 两个假平台模拟组的形成，传输走真实的回环 TCP。

mod common;

use common::{FakePlatform, next_event, next_message, peer};
use nearshare_core::config::AppSettings;
use nearshare_core::event::{ReceivedMessage, TransferEvent, event_channel};
use nearshare_core::transfer::TransferError;
use nearshare_core::wifi::{Command, ConnectionInfo, Mode, P2pEvent, Role};
use nearshare_core::workflow::Pairing;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const HOST_ADDR: &str = "02:00:00:00:00:01";

fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn settings(name: &str, dir: &Path, port: u16) -> AppSettings {
    AppSettings {
        device_name: name.to_string(),
        download_dir: dir.to_path_buf(),
        port,
        resume_delay_ms: 0,
        busy_retry_ms: 10,
        ..Default::default()
    }
}

async fn wait_for_session(pairing: &Pairing) {
    for _ in 0..500 {
        if pairing.session().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session was not established");
}

#[tokio::test]
async fn test_send_before_connect_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_platform_tx, platform_rx) = mpsc::channel(8);
    let (tx, _rx) = event_channel();
    let pairing = Pairing::start(
        Mode::Client,
        Arc::new(FakePlatform::new()),
        platform_rx,
        settings("Solo", dir.path(), free_port()),
        tx,
    );

    assert!(matches!(
        pairing.send_text("hi"),
        Err(TransferError::NotConnected)
    ));
    pairing.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_busy_retry() {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(FakePlatform::new().with_peers(vec![peer(HOST_ADDR, "Host")]));
    platform.set_always_busy(true);
    let (platform_tx, platform_rx) = mpsc::channel(8);
    let (tx, mut rx) = event_channel();
    let pairing = Pairing::start(
        Mode::Client,
        platform.clone(),
        platform_rx,
        settings("Client", dir.path(), free_port()),
        tx,
    );

    pairing.command(Command::PermissionsGranted).await.unwrap();
    pairing.command(Command::Resume).await.unwrap();
    platform_tx.send(P2pEvent::PeersChanged).await.unwrap();
    loop {
        if let TransferEvent::PeerListUpdated { .. } = next_event(&mut rx).await {
            break;
        }
    }
    pairing
        .command(Command::SelectPeer(HOST_ADDR.to_string()))
        .await
        .unwrap();
    while platform.connect_times().len() < 3 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pairing.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let attempts = platform.connect_times().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(platform.connect_times().len(), attempts);
}

#[tokio::test]
async fn test_host_and_client_exchange_text() {
    let port = free_port();
    let host_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();

    let host_platform = Arc::new(FakePlatform::new());
    host_platform.set_connection_info(ConnectionInfo {
        group_formed: true,
        is_group_owner: true,
        group_owner_address: None,
    });
    let client_platform = Arc::new(FakePlatform::new().with_peers(vec![peer(HOST_ADDR, "Host")]));
    client_platform.set_connection_info(ConnectionInfo {
        group_formed: true,
        is_group_owner: false,
        group_owner_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    });

    let (host_events_tx, host_events_rx) = mpsc::channel(8);
    let (client_events_tx, client_events_rx) = mpsc::channel(8);
    let (host_tx, mut host_rx) = event_channel();
    let (client_tx, mut client_rx) = event_channel();

    let host = Pairing::start(
        Mode::Host,
        host_platform,
        host_events_rx,
        settings("Host", host_dir.path(), port),
        host_tx,
    );
    let client = Pairing::start(
        Mode::Client,
        client_platform,
        client_events_rx,
        settings("Client", client_dir.path(), port),
        client_tx,
    );

    for pairing in [&host, &client] {
        pairing.command(Command::PermissionsGranted).await.unwrap();
        pairing.command(Command::Resume).await.unwrap();
    }

    // 主机：组形成后开始监听
    host_events_tx
        .send(P2pEvent::ConnectionChanged { connected: true })
        .await
        .unwrap();
    loop {
        if let TransferEvent::Connected { role, .. } = next_event(&mut host_rx).await {
            assert_eq!(role, Role::Host);
            break;
        }
    }
    // 留出绑定端口的时间
    tokio::time::sleep(Duration::from_millis(200)).await;

    // 客户端：发现、选择、组形成后拨号
    client_events_tx.send(P2pEvent::PeersChanged).await.unwrap();
    loop {
        if let TransferEvent::PeerListUpdated { peers } = next_event(&mut client_rx).await {
            assert_eq!(peers[0].display_name, "Host");
            break;
        }
    }
    client
        .command(Command::SelectPeer(HOST_ADDR.to_string()))
        .await
        .unwrap();
    client_events_tx
        .send(P2pEvent::ConnectionChanged { connected: true })
        .await
        .unwrap();

    wait_for_session(&client).await;
    wait_for_session(&host).await;

    loop {
        if let TransferEvent::MessageReceived {
            message: ReceivedMessage::PeerName { name },
        } = next_event(&mut host_rx).await
        {
            assert_eq!(name, "Client");
            break;
        }
    }

    client.send_text("hello host").unwrap().await.unwrap().unwrap();
    assert_eq!(
        next_message(&mut host_rx).await,
        ReceivedMessage::Text {
            text: "hello host".to_string()
        }
    );

    // 组断开时会话随之关闭
    client_events_tx
        .send(P2pEvent::ConnectionChanged { connected: false })
        .await
        .unwrap();
    loop {
        if next_event(&mut client_rx).await == TransferEvent::Disconnected {
            break;
        }
    }
    assert!(client.session().is_none());

    client.shutdown().await;
    host.shutdown().await;
}
