//! WiFi Direct 发现与连接
//!
//! 平台的异步发现/连接 API 被抽象为 [`P2pPlatform`] trait，
//! 平台回调以 [`P2pEvent`] 流的形式送入控制器。

pub mod controller;
pub mod negotiator;
pub mod registry;
pub mod wpa_cli;

pub use controller::{Command, Controller, ControllerHandle, ControllerState, Mode};
pub use negotiator::{HostOutcome, NegotiationError, Negotiator};
pub use registry::PeerRegistry;
pub use wpa_cli::WpaCliPlatform;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// 连接中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// 组所有者（监听端）
    Host,
    /// 组成员（拨号端）
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// 对端状态
///
/// 状态码沿用 Android `WifiP2pDevice` 的编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerStatus {
    Connected,
    Invited,
    Failed,
    Available,
    Unavailable,
    Unknown,
}

impl PeerStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => PeerStatus::Connected,
            1 => PeerStatus::Invited,
            2 => PeerStatus::Failed,
            3 => PeerStatus::Available,
            4 => PeerStatus::Unavailable,
            _ => PeerStatus::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PeerStatus::Connected => "Connected",
            PeerStatus::Invited => "Invited",
            PeerStatus::Failed => "Failed",
            PeerStatus::Available => "Available",
            PeerStatus::Unavailable => "Unavailable",
            PeerStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 发现到的对端设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDevice {
    /// 设备地址（稳定的唯一标识）
    pub address: String,
    pub display_name: String,
    pub status: PeerStatus,
}

impl PeerDevice {
    pub fn new(address: impl Into<String>, display_name: impl Into<String>, status: PeerStatus) -> Self {
        Self {
            address: address.into(),
            display_name: display_name.into(),
            status,
        }
    }
}

/// 平台操作失败原因
///
/// 编号沿用 Android `WifiP2pManager`，未知编号原样保留。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Error,
    Unsupported,
    Busy,
    NoServiceRequests,
    Other(i32),
}

impl FailureReason {
    pub fn code(self) -> i32 {
        match self {
            FailureReason::Error => 0,
            FailureReason::Unsupported => 1,
            FailureReason::Busy => 2,
            FailureReason::NoServiceRequests => 3,
            FailureReason::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FailureReason::Error,
            1 => FailureReason::Unsupported,
            2 => FailureReason::Busy,
            3 => FailureReason::NoServiceRequests,
            other => FailureReason::Other(other),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Error => write!(f, "error (0)"),
            FailureReason::Unsupported => write!(f, "P2P unsupported (1)"),
            FailureReason::Busy => write!(f, "busy (2)"),
            FailureReason::NoServiceRequests => write!(f, "no service requests (3)"),
            FailureReason::Other(code) => write!(f, "code {}", code),
        }
    }
}

/// 连接请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub device_address: String,
    /// 0 表示倾向于成为客户端
    pub group_owner_intent: u8,
}

impl ConnectRequest {
    /// 以客户端偏好连接，避免组所有者协商竞争
    pub fn as_client(device_address: impl Into<String>) -> Self {
        Self {
            device_address: device_address.into(),
            group_owner_intent: 0,
        }
    }
}

/// 组信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub group_formed: bool,
    pub is_group_owner: bool,
    pub group_owner_address: Option<IpAddr>,
}

/// 平台事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P2pEvent {
    /// WiFi P2P 启用/禁用
    StateChanged { enabled: bool },
    /// 对端列表变化（需要重新请求列表）
    PeersChanged,
    /// 连接状态变化（需要重新请求组信息）
    ConnectionChanged { connected: bool },
    /// 本机设备信息变化
    ThisDeviceChanged,
}

/// 平台发现/连接 API
#[async_trait]
pub trait P2pPlatform: Send + Sync + 'static {
    async fn create_group(&self) -> Result<(), FailureReason>;

    async fn remove_group(&self) -> Result<(), FailureReason>;

    async fn discover_peers(&self) -> Result<(), FailureReason>;

    async fn stop_peer_discovery(&self) -> Result<(), FailureReason>;

    async fn connect(&self, request: &ConnectRequest) -> Result<(), FailureReason>;

    async fn request_peers(&self) -> Vec<PeerDevice>;

    async fn request_connection_info(&self) -> ConnectionInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_status_codes() {
        assert_eq!(PeerStatus::from_code(0), PeerStatus::Connected);
        assert_eq!(PeerStatus::from_code(3), PeerStatus::Available);
        assert_eq!(PeerStatus::from_code(4).label(), "Unavailable");
        assert_eq!(PeerStatus::from_code(42).label(), "Unknown");
    }

    #[test]
    fn test_failure_reason_codes() {
        for code in 0..5 {
            assert_eq!(FailureReason::from_code(code).code(), code);
        }
        assert_eq!(FailureReason::from_code(2), FailureReason::Busy);
        assert_eq!(FailureReason::from_code(7), FailureReason::Other(7));
    }

    #[test]
    fn test_connect_request_prefers_client() {
        let request = ConnectRequest::as_client("aa:bb:cc:dd:ee:ff");
        assert_eq!(request.group_owner_intent, 0);
    }

    #[test]
    fn test_peer_device_json() {
        let peer = PeerDevice::new("aa:bb", "Pixel", PeerStatus::Available);
        let json = serde_json::to_string(&peer).unwrap();
        assert!(json.contains("\"displayName\":\"Pixel\""));
        assert!(json.contains("\"status\":\"available\""));
    }
}
