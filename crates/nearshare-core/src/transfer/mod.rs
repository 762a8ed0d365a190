//! 传输模块
//!
//! 包含:
//! - 帧编解码 (TEXT / IMAGE / VIDEO / DOC / NAME)
//! - 点对点 TCP 链路（主机只接受一个客户端）
//! - 传输会话（读循环 + 串行化写入）

pub mod frame;
pub mod link;
pub mod session;

pub use frame::{FileKind, Frame, FrameError, FrameHeader, FrameType};
pub use link::{HostListener, dial, open_link};
pub use session::{SessionConfig, TransportSession};

use std::net::SocketAddr;
use std::time::Duration;

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("read failed: {0}")]
    ReadFailure(#[source] FrameError),

    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] FrameError),

    #[error("send failed: {0}")]
    WriteFailure(#[source] FrameError),

    #[error("session closed")]
    Closed,

    #[error("not connected")]
    NotConnected,

    #[error("failed to accept connection: {0}")]
    AcceptFailure(#[source] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    DialFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    DialTimeout { addr: SocketAddr, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// 读循环中的帧错误分类
    ///
    /// I/O 错误和流提前结束是读失败，长度或内容不合法是畸形帧；
    /// 两者对会话的处理相同（终止会话）。
    pub fn from_read(err: FrameError) -> Self {
        match err {
            FrameError::Io(_) | FrameError::Truncated { .. } => TransferError::ReadFailure(err),
            FrameError::UnknownType { .. }
            | FrameError::TooLarge { .. }
            | FrameError::InvalidName(_)
            | FrameError::NeedMore => TransferError::MalformedFrame(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_classification() {
        let truncated = FrameError::Truncated {
            expected: 10,
            received: 3,
        };
        assert!(matches!(
            TransferError::from_read(truncated),
            TransferError::ReadFailure(_)
        ));

        let too_large = FrameError::TooLarge { length: u64::MAX };
        assert!(matches!(
            TransferError::from_read(too_large),
            TransferError::MalformedFrame(_)
        ));

        let bad_name = FrameError::InvalidName("short".to_string());
        assert!(matches!(
            TransferError::from_read(bad_name),
            TransferError::MalformedFrame(_)
        ));
    }
}
