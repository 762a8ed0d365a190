//! NearShare Core Library
//!
//! 通过 WiFi Direct 在两台设备之间点对点传输文本和文件
//!
//! # 模块
//!
//! - **config**: 应用设置和持久化
//! - **event**: 对外事件（UI 唯一的输入）
//! - **wifi**: 平台抽象、对端注册表、连接协商和发现/连接控制器
//! - **transfer**: 帧编解码、TCP 链路和传输会话
//! - **workflow**: 把控制器和传输会话串起来的配对流程
//!
//! # 使用示例
//!
//! ## 接收端（组所有者）
//!
//! ```ignore
//! use nearshare_core::{AppSettings, Command, Mode, Pairing, WpaCliPlatform, event_channel};
//!
//! let settings = AppSettings::load();
//! let platform = Arc::new(WpaCliPlatform::new(&settings.wifi_interface));
//! let platform_events = platform.monitor();
//! let (tx, mut rx) = event_channel();
//!
//! let pairing = Pairing::start(Mode::Host, platform, platform_events, settings, tx);
//! pairing.command(Command::PermissionsGranted).await?;
//! pairing.command(Command::Resume).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! ## 直接在局域网上建立会话
//!
//! ```ignore
//! use nearshare_core::{AppSettings, Role, event_channel, open_session};
//!
//! let (tx, rx) = event_channel();
//! let session = open_session(Role::Client, "192.168.1.20".parse()?, &settings, tx).await?;
//! session.send_text("hello");
//! ```

pub mod config;
pub mod event;
pub mod transfer;
pub mod wifi;
pub mod workflow;

pub use config::{AppSettings, DisplayNameProvider};
pub use event::{EventReceiver, EventSender, ReceivedMessage, TransferEvent, event_channel};

// WiFi re-exports
pub use wifi::{
    Command, Controller, ControllerHandle, ControllerState, FailureReason, Mode, P2pEvent,
    P2pPlatform, PeerDevice, PeerRegistry, PeerStatus, Role, WpaCliPlatform,
};

// Transfer re-exports
pub use transfer::{
    FileKind, Frame, FrameHeader, FrameType, SessionConfig, TransferError, TransportSession,
};

pub use workflow::{Pairing, open_session};
