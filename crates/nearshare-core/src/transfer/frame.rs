//! 帧编解码
//!
//! 线上格式: `type (u32 BE) | length (u64 BE) | payload (length 字节)`，
//! 连续重复直到连接关闭。
//!
//! `NAME` 帧的载荷再嵌套一层: `nameLength (u32 BE) | UTF-8 字节`，
//! 外层 `length` 只覆盖这层内部编码的字节数。
//!
//! 本模块不持有任何连接；异步辅助函数只在调用方提供的
//! `AsyncRead`/`AsyncWrite` 上做精确长度的读写。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const TYPE_TAG_LEN: usize = 4;
pub const LENGTH_LEN: usize = 8;
pub const HEADER_LEN: usize = TYPE_TAG_LEN + LENGTH_LEN;
pub const NAME_LEN_PREFIX: usize = 4;

/// 文件流式传输的缓冲区大小
pub const TRANSFER_BUFFER_SIZE: usize = 8192;

/// 需要整体读入内存的载荷（TEXT / NAME）上限: 16 MiB
pub const MAX_INLINE_PAYLOAD: u64 = 16 * 1024 * 1024;

/// 帧编解码错误
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("unknown frame type {tag} ({length} bytes)")]
    UnknownType { tag: u32, length: u64 },

    #[error("payload too large: {length} bytes")]
    TooLarge { length: u64 },

    #[error("invalid name payload: {0}")]
    InvalidName(String),

    #[error("need more bytes")]
    NeedMore,
}

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameType {
    Text = 1,
    Image = 2,
    Video = 3,
    Doc = 4,
    Name = 5,
}

impl FrameType {
    pub const ALL: [FrameType; 5] = [
        FrameType::Text,
        FrameType::Image,
        FrameType::Video,
        FrameType::Doc,
        FrameType::Name,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(FrameType::Text),
            2 => Some(FrameType::Image),
            3 => Some(FrameType::Video),
            4 => Some(FrameType::Doc),
            5 => Some(FrameType::Name),
            _ => None,
        }
    }

    /// 文件类帧对应的文件种类
    pub fn file_kind(self) -> Option<FileKind> {
        match self {
            FrameType::Image => Some(FileKind::Image),
            FrameType::Video => Some(FileKind::Video),
            FrameType::Doc => Some(FileKind::Doc),
            FrameType::Text | FrameType::Name => None,
        }
    }
}

/// 文件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileKind {
    Image,
    Video,
    Doc,
}

impl FileKind {
    pub fn frame_type(self) -> FrameType {
        match self {
            FileKind::Image => FrameType::Image,
            FileKind::Video => FrameType::Video,
            FileKind::Doc => FrameType::Doc,
        }
    }

    /// 接收端保存文件时使用的前缀
    pub fn file_prefix(self) -> &'static str {
        match self {
            FileKind::Image => "img",
            FileKind::Video => "vid",
            FileKind::Doc => "doc",
        }
    }

    /// 接收端保存文件时使用的扩展名
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Image => ".jpg",
            FileKind::Video => ".mp4",
            FileKind::Doc => ".pdf",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Doc => "doc",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" | "img" => Ok(FileKind::Image),
            "video" | "vid" => Ok(FileKind::Video),
            "doc" | "document" => Ok(FileKind::Doc),
            other => Err(format!("unknown file kind: {}", other)),
        }
    }
}

/// 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub length: u64,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, length: u64) -> Self {
        Self { frame_type, length }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..TYPE_TAG_LEN].copy_from_slice(&self.frame_type.tag().to_be_bytes());
        out[TYPE_TAG_LEN..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// 解析帧头；未知类型返回 `UnknownType`，其中带有声明的长度以便跳过
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let mut tag = [0u8; TYPE_TAG_LEN];
        tag.copy_from_slice(&bytes[..TYPE_TAG_LEN]);
        let mut length = [0u8; LENGTH_LEN];
        length.copy_from_slice(&bytes[TYPE_TAG_LEN..]);

        let tag = u32::from_be_bytes(tag);
        let length = u64::from_be_bytes(length);

        match FrameType::from_tag(tag) {
            Some(frame_type) => Ok(Self { frame_type, length }),
            None => Err(FrameError::UnknownType { tag, length }),
        }
    }
}

/// 完整帧（载荷在内存中）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(FrameType::Text, text.as_bytes().to_vec())
    }

    pub fn name(name: &str) -> Self {
        Self::new(FrameType::Name, encode_name(name))
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.frame_type, self.payload.len() as u64)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header().encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// 从 `bytes` 开头解码一帧，返回帧和消耗的字节数
    ///
    /// 字节不足时返回 `NeedMore`，调用方应在收到更多数据后重试。
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FrameError> {
        let Some(head) = bytes.first_chunk::<HEADER_LEN>() else {
            return Err(FrameError::NeedMore);
        };
        let header = FrameHeader::decode(head)?;
        let length = usize::try_from(header.length)
            .map_err(|_| FrameError::TooLarge {
                length: header.length,
            })?;
        let end = HEADER_LEN
            .checked_add(length)
            .ok_or(FrameError::TooLarge {
                length: header.length,
            })?;
        if bytes.len() < end {
            return Err(FrameError::NeedMore);
        }
        let frame = Self::new(header.frame_type, bytes[HEADER_LEN..end].to_vec());
        Ok((frame, end))
    }
}

/// 编码 NAME 帧的内部载荷
pub fn encode_name(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(NAME_LEN_PREFIX + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// 解码 NAME 帧的内部载荷
///
/// 内部长度必须与外层长度减去前缀完全一致。
pub fn decode_name(payload: &[u8]) -> Result<String, FrameError> {
    let Some(prefix) = payload.first_chunk::<NAME_LEN_PREFIX>() else {
        return Err(FrameError::InvalidName(format!(
            "payload of {} bytes is shorter than the length prefix",
            payload.len()
        )));
    };
    let declared = u32::from_be_bytes(*prefix) as usize;
    let body = &payload[NAME_LEN_PREFIX..];
    if declared != body.len() {
        return Err(FrameError::InvalidName(format!(
            "declared {} bytes, frame carries {}",
            declared,
            body.len()
        )));
    }
    String::from_utf8(body.to_vec()).map_err(|e| FrameError::InvalidName(e.to_string()))
}

/// 读取帧头
///
/// 在帧边界上遇到流结束时返回 `Ok(None)`；帧头读到一半结束则是 `Truncated`。
/// 单次 read 不保证填满，这里循环读取直到凑齐 12 字节。
pub async fn read_header<R>(reader: &mut R) -> Result<Option<FrameHeader>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::Truncated {
                expected: HEADER_LEN as u64,
                received: filled as u64,
            });
        }
        filled += n;
    }
    FrameHeader::decode(&buf).map(Some)
}

/// 读取整段载荷到内存（仅用于 TEXT / NAME）
pub async fn read_payload<R>(reader: &mut R, length: u64) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    if length > MAX_INLINE_PAYLOAD {
        return Err(FrameError::TooLarge { length });
    }
    let mut payload = Vec::with_capacity(length as usize);
    copy_exact(reader, &mut payload, length, |_| {}).await?;
    Ok(payload)
}

/// 丢弃 `length` 字节，保持流对齐
pub async fn skip_payload<R>(reader: &mut R, length: u64) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    copy_exact(reader, &mut tokio::io::sink(), length, |_| {}).await
}

/// 写入帧头
pub async fn write_header<W>(writer: &mut W, header: FrameHeader) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    Ok(())
}

/// 以固定大小的块精确复制 `length` 字节
///
/// 每块最多 `TRANSFER_BUFFER_SIZE` 字节，写完后回调 `on_chunk(块大小)`。
/// 源提前结束时先 flush 已写入的数据，再返回 `Truncated`。
pub async fn copy_exact<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    length: u64,
    mut on_chunk: F,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(usize),
{
    let mut buffer = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut remaining = length;

    while remaining > 0 {
        let want = remaining.min(TRANSFER_BUFFER_SIZE as u64) as usize;
        let n = reader.read(&mut buffer[..want]).await?;
        if n == 0 {
            writer.flush().await?;
            return Err(FrameError::Truncated {
                expected: length,
                received: length - remaining,
            });
        }
        writer.write_all(&buffer[..n]).await?;
        remaining -= n as u64;
        on_chunk(n);
    }

    Ok(())
}
