//! 工作流模块
//!
//! 提供高层 API，把发现、连接和传输会话串成完整流程

pub mod pairing;

pub use pairing::{Pairing, open_session};
