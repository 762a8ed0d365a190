//! 连接协商
//!
//! 驱动主机/客户端的建立过程：
//! - 主机：创建组，失败则退回到普通的可发现模式
//! - 客户端：发现对端，对选中的对端发起连接，对端忙时无限重试
//! - 组形成后根据“是否为组所有者”确定角色和对端地址

use log::{debug, info, warn};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::event::{EventSender, TransferEvent};
use crate::wifi::{ConnectRequest, ConnectionInfo, FailureReason, P2pPlatform, PeerRegistry, Role};

/// 协商错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("Discovery Failed ({})", .0.code())]
    DiscoveryFailure(FailureReason),

    #[error("Group creation failed ({})", .0.code())]
    GroupCreationFailure(FailureReason),

    #[error("Busy... Retrying")]
    ConnectBusy,

    #[error("Failed ({})", .0.code())]
    ConnectFailure(FailureReason),

    #[error("Peer {0} is no longer available")]
    PeerUnavailable(String),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Group formed without a group owner address")]
    GroupOwnerUnknown,
}

/// 主机模式的进入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    /// 组已创建，等待客户端
    GroupCreated,
    /// 组创建失败，已退回为可发现的普通对端
    Discoverable,
}

/// 连接协商器
#[derive(Clone)]
pub struct Negotiator {
    platform: Arc<dyn P2pPlatform>,
    registry: PeerRegistry,
    retry_delay: Duration,
}

impl Negotiator {
    pub fn new(platform: Arc<dyn P2pPlatform>, registry: PeerRegistry, retry_delay: Duration) -> Self {
        Self {
            platform,
            registry,
            retry_delay,
        }
    }

    pub fn platform(&self) -> &Arc<dyn P2pPlatform> {
        &self.platform
    }

    /// 进入主机模式
    pub async fn start_host(&self) -> Result<HostOutcome, NegotiationError> {
        match self.platform.create_group().await {
            Ok(()) => {
                info!("P2P group created, waiting for a client");
                Ok(HostOutcome::GroupCreated)
            }
            Err(reason) => {
                let err = NegotiationError::GroupCreationFailure(reason);
                warn!("{}, falling back to discovery mode", err);
                self.platform
                    .discover_peers()
                    .await
                    .map_err(NegotiationError::DiscoveryFailure)?;
                Ok(HostOutcome::Discoverable)
            }
        }
    }

    /// 进入客户端模式（失败不自动重试）
    pub async fn start_client(&self) -> Result<(), NegotiationError> {
        self.platform
            .discover_peers()
            .await
            .map_err(NegotiationError::DiscoveryFailure)?;
        debug!("Peer discovery started");
        Ok(())
    }

    /// 静默移除残留的组
    pub async fn reset_group(&self) {
        if let Err(reason) = self.platform.remove_group().await {
            debug!("Quiet group removal failed: {}", reason);
        }
    }

    pub async fn stop_discovery(&self) {
        if let Err(reason) = self.platform.stop_peer_discovery().await {
            debug!("Stopping peer discovery failed: {}", reason);
        }
    }

    /// 连接到指定地址的对端
    ///
    /// 每次尝试都从注册表的最新快照中重新查找对端，期间不停止发现。
    /// 对端忙时固定等待 `retry_delay` 后重试，次数不限，只有成功或取消才会结束。
    /// 返回发起的连接请求次数。
    pub async fn connect(
        &self,
        address: &str,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<u32, NegotiationError> {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(NegotiationError::Cancelled);
            }

            let peer = self
                .registry
                .find(address)
                .ok_or_else(|| NegotiationError::PeerUnavailable(address.to_string()))?;

            attempts += 1;
            let request = ConnectRequest::as_client(&peer.address);
            debug!("Connect attempt {} to {}", attempts, peer.address);

            let result = tokio::select! {
                () = cancel.cancelled() => return Err(NegotiationError::Cancelled),
                result = self.platform.connect(&request) => result,
            };

            match result {
                Ok(()) => {
                    info!("Invitation sent to {} after {} attempt(s)", peer.display_name, attempts);
                    let text = format!("Invitation Sent to {}", peer.display_name);
                    notify(events, cancel, TransferEvent::status(text)).await;
                    return Ok(attempts);
                }
                Err(FailureReason::Busy) => {
                    warn!(
                        "{} is busy, retrying in {:?}",
                        peer.address, self.retry_delay
                    );
                    let text = format!(
                        "{} in {}s",
                        NegotiationError::ConnectBusy,
                        self.retry_delay.as_secs_f32()
                    );
                    notify(events, cancel, TransferEvent::status(text)).await;
                    tokio::select! {
                        () = cancel.cancelled() => return Err(NegotiationError::Cancelled),
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Err(reason) => return Err(NegotiationError::ConnectFailure(reason)),
            }
        }
    }

    /// 从组信息确定角色和对端地址
    ///
    /// 组尚未形成时返回 `None`。作为主机时地址是本地监听用的未指定地址。
    pub fn resolve_connection(
        &self,
        info: &ConnectionInfo,
    ) -> Option<Result<(Role, IpAddr), NegotiationError>> {
        if !info.group_formed {
            return None;
        }
        if info.is_group_owner {
            return Some(Ok((Role::Host, IpAddr::V4(Ipv4Addr::UNSPECIFIED))));
        }
        Some(
            info.group_owner_address
                .map(|addr| (Role::Client, addr))
                .ok_or(NegotiationError::GroupOwnerUnknown),
        )
    }
}

/// 投递状态事件，取消时放弃等待
async fn notify(events: &EventSender, cancel: &CancellationToken, event: TransferEvent) {
    tokio::select! {
        () = cancel.cancelled() => {}
        _ = events.send(event) => {}
    }
}
