//! 配对工作流
//!
//! 把控制器和传输层串起来：
//! 1. 运行发现/连接控制器，转发它的事件
//! 2. 收到 `Connected` 后按角色建立 TCP 链路（主机接受一个客户端，客户端拨号）
//! 3. 在链路上启动传输会话，会话事件直接投递到 UI 通道
//! 4. 组断开时关闭会话，控制器自行回到起始状态

use log::{debug, info, warn};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppSettings;
use crate::event::{EventReceiver, EventSender, TransferEvent, event_channel};
use crate::transfer::{FileKind, SessionConfig, TransferError, TransportSession, open_link};
use crate::wifi::{Command, Controller, ControllerHandle, Mode, P2pEvent, P2pPlatform, Role};

type SessionSlot = Arc<Mutex<Option<TransportSession>>>;

/// 建立链路并启动会话
///
/// 主机在 `address:port` 上接受一个客户端，客户端在超时内拨号。
pub async fn open_session(
    role: Role,
    address: IpAddr,
    settings: &AppSettings,
    events: EventSender,
) -> Result<TransportSession, TransferError> {
    let (stream, peer) = open_link(role, address, settings.port, settings.connect_timeout()).await?;
    let config = SessionConfig::from_settings(settings);
    Ok(TransportSession::start(stream, peer.to_string(), config, events))
}

/// 配对工作流
pub struct Pairing {
    controller: ControllerHandle,
    session: SessionSlot,
    stop: CancellationToken,
    controller_task: JoinHandle<()>,
    pump_task: JoinHandle<()>,
}

impl Pairing {
    /// 启动控制器和事件转发
    ///
    /// 控制器创建后处于 Idle，需要 UI 发送 `PermissionsGranted` 和 `Resume`。
    pub fn start(
        mode: Mode,
        platform: Arc<dyn P2pPlatform>,
        platform_events: mpsc::Receiver<P2pEvent>,
        settings: AppSettings,
        ui_events: EventSender,
    ) -> Self {
        let (controller_tx, controller_rx) = event_channel();
        let controller = Controller::new(mode, platform, controller_tx, &settings);
        let (handle, controller_task) = controller.spawn(platform_events);

        let session: SessionSlot = Arc::new(Mutex::new(None));
        let stop = CancellationToken::new();
        let pump_task = tokio::spawn(pump_events(
            controller_rx,
            ui_events,
            session.clone(),
            settings,
            stop.clone(),
        ));

        Self {
            controller: handle,
            session,
            stop,
            controller_task,
            pump_task,
        }
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    pub async fn command(&self, command: Command) -> anyhow::Result<()> {
        self.controller.send(command).await
    }

    /// 当前会话（未连接时为 None）
    pub fn session(&self) -> Option<TransportSession> {
        current_session(&self.session)
    }

    pub fn send_text(
        &self,
        text: impl Into<String>,
    ) -> Result<JoinHandle<Result<(), TransferError>>, TransferError> {
        let session = self.session().ok_or(TransferError::NotConnected)?;
        Ok(session.send_text(text))
    }

    pub fn send_file(
        &self,
        kind: FileKind,
        path: impl Into<PathBuf>,
    ) -> Result<JoinHandle<Result<(), TransferError>>, TransferError> {
        let session = self.session().ok_or(TransferError::NotConnected)?;
        Ok(session.send_file(kind, path))
    }

    /// 停止后台任务并关闭会话
    ///
    /// 返回时控制器已退出，进行中的连接尝试均已取消。
    pub async fn shutdown(self) {
        self.stop.cancel();
        self.controller.stop();
        if let Err(e) = self.pump_task.await {
            warn!("Event pump panicked: {}", e);
        }
        // 事件转发已停止，控制器不会阻塞在事件投递上
        if let Err(e) = self.controller_task.await {
            warn!("Controller panicked: {}", e);
        }
        if let Some(session) = take_session(&self.session) {
            session.close();
            session.join().await;
        }
        info!("Pairing stopped");
    }
}

fn current_session(slot: &SessionSlot) -> Option<TransportSession> {
    slot.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .filter(|session| session.is_running())
        .cloned()
}

fn take_session(slot: &SessionSlot) -> Option<TransportSession> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

async fn pump_events(
    mut controller_rx: EventReceiver,
    ui_events: EventSender,
    session: SessionSlot,
    settings: AppSettings,
    stop: CancellationToken,
) {
    let mut link_task: Option<JoinHandle<()>> = None;

    loop {
        let event = tokio::select! {
            () = stop.cancelled() => break,
            event = controller_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            TransferEvent::Connected { role, address } => {
                if !forward(&ui_events, &stop, TransferEvent::Connected { role, address }).await {
                    break;
                }
                if let Some(task) = link_task.take() {
                    task.abort();
                }
                link_task = Some(tokio::spawn(establish(
                    role,
                    address,
                    settings.clone(),
                    ui_events.clone(),
                    session.clone(),
                )));
            }
            TransferEvent::Disconnected => {
                if let Some(task) = link_task.take() {
                    task.abort();
                }
                match take_session(&session) {
                    // 会话关闭时自己会发出 Disconnected
                    Some(active) => {
                        active.close();
                    }
                    None => {
                        if !forward(&ui_events, &stop, TransferEvent::Disconnected).await {
                            break;
                        }
                    }
                }
            }
            other => {
                if !forward(&ui_events, &stop, other).await {
                    break;
                }
            }
        }
    }

    if let Some(task) = link_task {
        task.abort();
    }
    debug!("Event pump stopped");
}

/// 投递到 UI，停止或接收端关闭时返回 false
async fn forward(ui_events: &EventSender, stop: &CancellationToken, event: TransferEvent) -> bool {
    tokio::select! {
        () = stop.cancelled() => false,
        result = ui_events.send(event) => result.is_ok(),
    }
}

async fn establish(
    role: Role,
    address: IpAddr,
    settings: AppSettings,
    ui_events: EventSender,
    slot: SessionSlot,
) {
    match open_session(role, address, &settings, ui_events.clone()).await {
        Ok(session) => {
            info!("Session ready with {}", session.peer());
            let previous = slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(session);
            if let Some(previous) = previous {
                previous.close();
            }
        }
        Err(e) => {
            warn!("Failed to open link as {}: {}", role, e);
            let _ = ui_events.send(TransferEvent::error(e.to_string())).await;
        }
    }
}
