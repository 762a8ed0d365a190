//! 测试共用的假平台和事件工具

#![allow(dead_code)]

use async_trait::async_trait;
use nearshare_core::event::{EventReceiver, ReceivedMessage, TransferEvent};
use nearshare_core::wifi::{
    ConnectRequest, ConnectionInfo, FailureReason, P2pPlatform, PeerDevice, PeerStatus,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// 可编排结果的假平台
#[derive(Default)]
pub struct FakePlatform {
    calls: Mutex<Vec<String>>,
    connect_script: Mutex<VecDeque<Result<(), FailureReason>>>,
    connect_times: Mutex<Vec<Instant>>,
    always_busy: Mutex<bool>,
    create_group_result: Mutex<Option<FailureReason>>,
    discover_result: Mutex<Option<FailureReason>>,
    peers: Mutex<Vec<PeerDevice>>,
    info: Mutex<ConnectionInfo>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peers(self, peers: Vec<PeerDevice>) -> Self {
        *self.peers.lock().unwrap() = peers;
        self
    }

    pub fn set_peers(&self, peers: Vec<PeerDevice>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// 依次返回的连接结果，用完后返回成功
    pub fn script_connect(&self, results: Vec<Result<(), FailureReason>>) {
        *self.connect_script.lock().unwrap() = results.into();
    }

    pub fn set_always_busy(&self, busy: bool) {
        *self.always_busy.lock().unwrap() = busy;
    }

    pub fn fail_create_group(&self, reason: FailureReason) {
        *self.create_group_result.lock().unwrap() = Some(reason);
    }

    pub fn fail_discovery(&self, reason: FailureReason) {
        *self.discover_result.lock().unwrap() = Some(reason);
    }

    pub fn set_connection_info(&self, info: ConnectionInfo) {
        *self.info.lock().unwrap() = info;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl P2pPlatform for FakePlatform {
    async fn create_group(&self) -> Result<(), FailureReason> {
        self.record("create_group");
        match *self.create_group_result.lock().unwrap() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    async fn remove_group(&self) -> Result<(), FailureReason> {
        self.record("remove_group");
        // 没有组可移除
        Err(FailureReason::Error)
    }

    async fn discover_peers(&self) -> Result<(), FailureReason> {
        self.record("discover_peers");
        match *self.discover_result.lock().unwrap() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    async fn stop_peer_discovery(&self) -> Result<(), FailureReason> {
        self.record("stop_peer_discovery");
        Ok(())
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<(), FailureReason> {
        self.record(format!(
            "connect {} go_intent={}",
            request.device_address, request.group_owner_intent
        ));
        self.connect_times.lock().unwrap().push(Instant::now());
        if *self.always_busy.lock().unwrap() {
            return Err(FailureReason::Busy);
        }
        self.connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn request_peers(&self) -> Vec<PeerDevice> {
        self.record("request_peers");
        self.peers.lock().unwrap().clone()
    }

    async fn request_connection_info(&self) -> ConnectionInfo {
        self.record("request_connection_info");
        self.info.lock().unwrap().clone()
    }
}

pub fn peer(address: &str, name: &str) -> PeerDevice {
    PeerDevice::new(address, name, PeerStatus::Available)
}

/// 取出通道中已有的全部事件
pub fn drain(rx: &mut EventReceiver) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn statuses(events: &[TransferEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::Status { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[TransferEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            TransferEvent::Error { reason } => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

/// 等待下一个事件（真实时钟）
pub async fn next_event(rx: &mut EventReceiver) -> TransferEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// 等待下一条非握手消息
pub async fn next_message(rx: &mut EventReceiver) -> ReceivedMessage {
    loop {
        if let TransferEvent::MessageReceived { message } = next_event(rx).await {
            if matches!(message, ReceivedMessage::PeerName { .. }) {
                continue;
            }
            return message;
        }
    }
}

/// 等待 Disconnected，返回期间收到的所有事件
pub async fn until_disconnected(rx: &mut EventReceiver) -> Vec<TransferEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = event == TransferEvent::Disconnected;
        seen.push(event);
        if done {
            return seen;
        }
    }
}
