//! 对外事件
//!
//! 核心库与 UI 之间唯一的通信通道。所有事件都投递到同一个 mpsc 通道，
//! 由 UI 在单一消费者上下文中按顺序处理。

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::transfer::FileKind;
use crate::wifi::{PeerDevice, Role};

/// 事件通道容量
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub type EventSender = mpsc::Sender<TransferEvent>;
pub type EventReceiver = mpsc::Receiver<TransferEvent>;

/// 创建事件通道
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// 收到的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReceivedMessage {
    /// 文本消息
    Text { text: String },
    /// 文件已保存到本地
    File {
        file_kind: FileKind,
        path: PathBuf,
        size: u64,
    },
    /// 对端的设备名称（握手）
    PeerName { name: String },
}

/// 传输事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    /// 设备列表已整体替换
    PeerListUpdated { peers: Vec<PeerDevice> },
    /// 连接已建立
    Connected { role: Role, address: IpAddr },
    /// 连接已断开
    Disconnected,
    /// 收到消息
    MessageReceived { message: ReceivedMessage },
    /// 错误（原因文本）
    Error { reason: String },
    /// 状态提示
    Status { text: String },
}

impl TransferEvent {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }
}
