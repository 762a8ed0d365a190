//! 发现/连接控制器
//!
//! 顶层状态机，组合协商器和对端注册表：
//!
//! ```text
//! Idle → {Hosting | Discovering} → PeerSelected (仅客户端) → Connecting → Connected → Disconnected
//! ```
//!
//! 输入有三类：UI 命令、平台事件、后台连接任务的结果。
//! 所有输入都在同一个任务中按顺序处理，对外只通过事件通道通信。

use log::{debug, info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppSettings;
use crate::event::{EventSender, TransferEvent};
use crate::wifi::negotiator::{HostOutcome, NegotiationError, Negotiator};
use crate::wifi::{P2pEvent, P2pPlatform, PeerRegistry, Role};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// 工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 接收端：创建组并等待
    Host,
    /// 发送端：发现并选择对端
    Client,
}

/// 控制器状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Hosting,
    Discovering,
    PeerSelected { address: String },
    Connecting { address: String },
    Connected { role: Role, address: IpAddr },
    Disconnected,
}

/// UI 命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 所需权限已授予
    PermissionsGranted,
    /// 前台恢复
    Resume,
    /// 进入后台
    Pause,
    /// 选择对端（按地址）
    SelectPeer(String),
    /// 重新连接当前选中的对端
    Retry,
    /// 取消当前选择（包括正在进行的忙重试）
    CancelSelection,
}

/// 后台连接任务的结果
#[derive(Debug)]
pub struct ConnectOutcome {
    pub address: String,
    pub result: Result<u32, NegotiationError>,
}

pub struct Controller {
    mode: Mode,
    state: ControllerState,
    negotiator: Negotiator,
    registry: PeerRegistry,
    events: EventSender,
    permissions_granted: bool,
    resumed: bool,
    resume_delay: Duration,
    connect_cancel: Option<CancellationToken>,
    outcome_tx: mpsc::Sender<ConnectOutcome>,
    outcome_rx: mpsc::Receiver<ConnectOutcome>,
}

impl Controller {
    pub fn new(
        mode: Mode,
        platform: Arc<dyn P2pPlatform>,
        events: EventSender,
        settings: &AppSettings,
    ) -> Self {
        let registry = PeerRegistry::new();
        let negotiator = Negotiator::new(platform, registry.clone(), settings.busy_retry_delay());
        let (outcome_tx, outcome_rx) = mpsc::channel(4);
        Self {
            mode,
            state: ControllerState::Idle,
            negotiator,
            registry,
            events,
            permissions_granted: false,
            resumed: false,
            resume_delay: settings.resume_delay(),
            connect_cancel: None,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// 在后台任务中运行，返回命令句柄
    pub fn spawn(self, platform_events: mpsc::Receiver<P2pEvent>) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(self.run(rx, platform_events, shutdown.clone()));
        (
            ControllerHandle {
                commands: tx,
                shutdown,
            },
            handle,
        )
    }

    /// 事件循环：命令通道关闭或收到停止信号时退出
    ///
    /// 退出前取消进行中的连接尝试并停止发现。
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut platform_events: mpsc::Receiver<P2pEvent>,
        shutdown: CancellationToken,
    ) {
        let mut platform_open = true;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = platform_events.recv(), if platform_open => match event {
                    Some(event) => self.handle_platform_event(event).await,
                    None => {
                        warn!("Platform event stream closed");
                        platform_open = false;
                    }
                },
                Some(outcome) = self.outcome_rx.recv() => self.handle_connect_outcome(outcome).await,
            }
        }
        self.cancel_connect();
        self.negotiator.stop_discovery().await;
        debug!("Controller stopped");
    }

    /// 等待并处理下一个连接任务结果
    pub async fn settle_connect(&mut self) {
        if let Some(outcome) = self.outcome_rx.recv().await {
            self.handle_connect_outcome(outcome).await;
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        debug!("Command {:?} in state {:?}", command, self.state);
        match command {
            Command::PermissionsGranted => {
                self.permissions_granted = true;
                if self.resumed && self.state == ControllerState::Idle {
                    self.resume_mode().await;
                }
            }
            Command::Resume => {
                self.resumed = true;
                if self.permissions_granted {
                    self.resume_mode().await;
                } else {
                    info!("Waiting for permissions before starting");
                }
            }
            Command::Pause => {
                self.resumed = false;
                self.cancel_connect();
                self.negotiator.stop_discovery().await;
                if !matches!(self.state, ControllerState::Connected { .. }) {
                    self.state = ControllerState::Idle;
                }
            }
            Command::SelectPeer(address) => self.select_peer(address).await,
            Command::Retry => match &self.state {
                ControllerState::PeerSelected { address } => {
                    let address = address.clone();
                    self.begin_connect(address).await;
                }
                other => debug!("Nothing to retry in state {:?}", other),
            },
            Command::CancelSelection => {
                if matches!(
                    self.state,
                    ControllerState::PeerSelected { .. } | ControllerState::Connecting { .. }
                ) {
                    self.cancel_connect();
                    self.state = ControllerState::Discovering;
                    self.status("Searching...").await;
                }
            }
        }
    }

    pub async fn handle_platform_event(&mut self, event: P2pEvent) {
        match event {
            P2pEvent::StateChanged { enabled } => {
                if enabled {
                    debug!("WiFi P2P enabled");
                } else {
                    warn!("WiFi P2P disabled");
                    self.status("Enable Wi-Fi").await;
                }
            }
            P2pEvent::PeersChanged => {
                let peers = self.negotiator.platform().request_peers().await;
                self.registry.replace(peers.clone());
                match self.mode {
                    Mode::Client => {
                        let count = peers.len();
                        self.emit(TransferEvent::PeerListUpdated { peers }).await;
                        if count > 0 {
                            self.status(format!("Found {} Devices", count)).await;
                        }
                    }
                    Mode::Host => debug!("Host sees {} peers", peers.len()),
                }
            }
            P2pEvent::ConnectionChanged { connected: true } => {
                let info = self.negotiator.platform().request_connection_info().await;
                match self.negotiator.resolve_connection(&info) {
                    None => debug!("Connection changed but no group formed yet"),
                    Some(Ok((role, address))) => self.on_group_formed(role, address).await,
                    Some(Err(e)) => {
                        self.emit(TransferEvent::error(e.to_string())).await;
                        self.enter_mode().await;
                    }
                }
            }
            P2pEvent::ConnectionChanged { connected: false } => match self.state {
                ControllerState::Connected { .. } => {
                    info!("Peer disconnected, restarting {:?} mode", self.mode);
                    self.state = ControllerState::Disconnected;
                    self.emit(TransferEvent::Disconnected).await;
                    self.enter_mode().await;
                }
                ControllerState::Connecting { .. } => {
                    debug!("Ignoring disconnect while a connect request is in flight");
                }
                _ => debug!("Disconnect event in state {:?}", self.state),
            },
            P2pEvent::ThisDeviceChanged => debug!("This device changed"),
        }
    }

    pub async fn handle_connect_outcome(&mut self, outcome: ConnectOutcome) {
        let current = matches!(
            &self.state,
            ControllerState::Connecting { address } if *address == outcome.address
        );
        if !current {
            debug!("Stale connect outcome for {}", outcome.address);
            return;
        }

        match outcome.result {
            Ok(attempts) => debug!(
                "Connect request to {} accepted after {} attempt(s)",
                outcome.address, attempts
            ),
            Err(NegotiationError::Cancelled) => {}
            Err(e @ NegotiationError::PeerUnavailable(_)) => {
                self.connect_cancel = None;
                self.emit(TransferEvent::error(e.to_string())).await;
                self.state = ControllerState::Discovering;
            }
            Err(e) => {
                self.connect_cancel = None;
                warn!("Connect to {} failed: {}", outcome.address, e);
                self.status(e.to_string()).await;
                self.emit(TransferEvent::error(e.to_string())).await;
                self.state = ControllerState::PeerSelected {
                    address: outcome.address,
                };
            }
        }
    }

    async fn select_peer(&mut self, address: String) {
        if self.mode == Mode::Host {
            warn!("Peer selection ignored in host mode");
            return;
        }
        if !matches!(
            self.state,
            ControllerState::Discovering
                | ControllerState::PeerSelected { .. }
                | ControllerState::Connecting { .. }
        ) {
            warn!("Peer selection ignored in state {:?}", self.state);
            return;
        }

        self.cancel_connect();
        if self.registry.find(&address).is_none() {
            let e = NegotiationError::PeerUnavailable(address);
            self.emit(TransferEvent::error(e.to_string())).await;
            self.state = ControllerState::Discovering;
            return;
        }
        self.state = ControllerState::PeerSelected {
            address: address.clone(),
        };
        self.begin_connect(address).await;
    }

    async fn begin_connect(&mut self, address: String) {
        self.cancel_connect();
        let token = CancellationToken::new();
        self.connect_cancel = Some(token.clone());
        self.state = ControllerState::Connecting {
            address: address.clone(),
        };
        self.status("Connecting...").await;

        let negotiator = self.negotiator.clone();
        let events = self.events.clone();
        let outcomes = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = negotiator.connect(&address, &token, &events).await;
            let _ = outcomes.send(ConnectOutcome { address, result }).await;
        });
    }

    async fn on_group_formed(&mut self, role: Role, address: IpAddr) {
        if let ControllerState::Connected { .. } = self.state {
            debug!("Group already formed, ignoring repeated connection event");
            return;
        }
        self.cancel_connect();
        self.negotiator.stop_discovery().await;
        info!("Group formed: acting as {} with {}", role, address);
        self.state = ControllerState::Connected { role, address };
        self.emit(TransferEvent::Connected { role, address }).await;
    }

    /// 静默清理残留组，等待稳定后进入模式
    async fn resume_mode(&mut self) {
        self.cancel_connect();
        if let ControllerState::Connected { .. } = self.state {
            // 清理会移除当前组，先按断开处理
            info!("Resuming while connected, dropping the current group");
            self.state = ControllerState::Disconnected;
            self.emit(TransferEvent::Disconnected).await;
        }
        self.negotiator.reset_group().await;
        tokio::time::sleep(self.resume_delay).await;
        self.enter_mode().await;
    }

    async fn enter_mode(&mut self) {
        if !(self.resumed && self.permissions_granted) {
            self.state = ControllerState::Idle;
            return;
        }
        match self.mode {
            Mode::Host => {
                self.status("Creating Group...").await;
                match self.negotiator.start_host().await {
                    Ok(HostOutcome::GroupCreated) => {
                        self.state = ControllerState::Hosting;
                        self.status("Ready to Receive").await;
                    }
                    Ok(HostOutcome::Discoverable) => {
                        self.state = ControllerState::Discovering;
                        self.status("Visible (Discovery Mode)").await;
                    }
                    Err(e) => {
                        self.state = ControllerState::Discovering;
                        self.emit(TransferEvent::error(e.to_string())).await;
                    }
                }
            }
            Mode::Client => {
                self.state = ControllerState::Discovering;
                match self.negotiator.start_client().await {
                    Ok(()) => self.status("Searching...").await,
                    Err(e) => {
                        self.status(e.to_string()).await;
                        self.emit(TransferEvent::error(e.to_string())).await;
                    }
                }
            }
        }
    }

    fn cancel_connect(&mut self) {
        if let Some(token) = self.connect_cancel.take() {
            token.cancel();
        }
    }

    async fn status(&self, text: impl Into<String>) {
        self.emit(TransferEvent::status(text)).await;
    }

    async fn emit(&self, event: TransferEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// 控制器命令句柄
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl ControllerHandle {
    pub async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("controller stopped"))
    }

    pub async fn select_peer(&self, address: impl Into<String>) -> anyhow::Result<()> {
        self.send(Command::SelectPeer(address.into())).await
    }

    /// 通知控制器退出（所有句柄共享）
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
