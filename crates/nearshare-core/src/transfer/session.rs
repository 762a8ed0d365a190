//! 传输会话
//!
//! 一个会话独占一条已建立的连接：
//!
//! 1. 构造后立即发送 NAME 帧（握手，不等待应答）
//! 2. 启动专用读循环任务：读帧头 → 按类型分发 → 投递事件
//! 3. 每次发送在独立任务中执行，但整个 type + length + payload
//!    序列都持有同一把写锁，保证帧在线上不会交错
//!
//! 关闭是唯一的取消手段：`close()` 取消令牌，阻塞中的读和正在进行的
//! 发送都会立即退出，读循环负责收尾并发出 `Disconnected`。

use log::{debug, error, info, trace, warn};

use crate::config::{AppSettings, DisplayNameProvider};
use crate::event::{EventSender, ReceivedMessage, TransferEvent};
use crate::transfer::TransferError;
use crate::transfer::frame::{self, FileKind, Frame, FrameError, FrameHeader, FrameType};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 会话配置
#[derive(Clone)]
pub struct SessionConfig {
    /// 接收文件的保存目录
    pub download_dir: PathBuf,
    /// 握手时发送的本机名称
    pub name_provider: Arc<dyn DisplayNameProvider>,
}

impl SessionConfig {
    pub fn new(download_dir: impl Into<PathBuf>, name_provider: Arc<dyn DisplayNameProvider>) -> Self {
        Self {
            download_dir: download_dir.into(),
            name_provider,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(settings.download_dir.clone(), Arc::new(settings.clone()))
    }
}

struct SessionInner {
    /// 对端标识（日志用）
    peer: String,
    /// 只会从 true 变为 false 一次
    running: AtomicBool,
    shutdown: CancellationToken,
    /// 读循环收尾时取走并释放，连接随之关闭
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    events: EventSender,
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// 传输会话句柄（可克隆，所有克隆共享同一连接）
#[derive(Clone)]
pub struct TransportSession {
    inner: Arc<SessionInner>,
}

impl TransportSession {
    /// 在已建立的连接上启动会话
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn start<S>(
        stream: S,
        peer: impl Into<String>,
        config: SessionConfig,
        events: EventSender,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let writer: BoxedWriter = Box::new(writer);
        let reader: BoxedReader = Box::new(reader);

        let session = Self {
            inner: Arc::new(SessionInner {
                peer: peer.into(),
                running: AtomicBool::new(true),
                shutdown: CancellationToken::new(),
                writer: Arc::new(Mutex::new(Some(writer))),
                events,
                read_task: std::sync::Mutex::new(None),
            }),
        };

        info!("Session started with {}", session.inner.peer);

        // 握手：先同步拿到写锁，确保 NAME 是线上的第一帧
        let name = config.name_provider.display_name();
        let handshake_lock = session.inner.writer.clone().try_lock_owned();
        let handshake = session.clone();
        tokio::spawn(async move {
            let mut writer = match handshake_lock {
                Ok(guard) => guard,
                Err(_) => handshake.inner.writer.clone().lock_owned().await,
            };
            let bytes = Frame::name(&name).encode();
            let result = match writer.as_mut() {
                Some(stream) => handshake.guarded(write_encoded(stream, &bytes)).await,
                None => Err(TransferError::Closed),
            };
            drop(writer);
            if result.is_ok() {
                debug!("Sent NAME '{}' to {}", name, handshake.inner.peer);
            }
            let _ = handshake.report_send(result).await;
        });

        let loop_inner = session.inner.clone();
        let handle = tokio::spawn(read_loop(loop_inner, reader, config.download_dir));
        *session
            .inner
            .read_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        session
    }

    /// 对端标识
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 关闭会话（幂等）
    ///
    /// 返回 true 表示本次调用完成了 running → 停止 的转换。
    pub fn close(&self) -> bool {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!("Closing session with {}", self.inner.peer);
        }
        self.inner.shutdown.cancel();
        was_running
    }

    /// 等待读循环退出
    pub async fn join(&self) {
        let handle = self
            .inner
            .read_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Read loop for {} panicked: {}", self.inner.peer, e);
        }
    }

    /// 异步发送文本（不阻塞调用方）
    pub fn send_text(&self, text: impl Into<String>) -> JoinHandle<Result<(), TransferError>> {
        let session = self.clone();
        let text = text.into();
        tokio::spawn(async move {
            let result = session.write_frame(&Frame::text(&text)).await;
            session.report_send(result).await
        })
    }

    /// 异步发送文件（不阻塞调用方）
    ///
    /// 声明的长度取自文件元数据。
    pub fn send_file(
        &self,
        kind: FileKind,
        path: impl Into<PathBuf>,
    ) -> JoinHandle<Result<(), TransferError>> {
        let session = self.clone();
        let path = path.into();
        tokio::spawn(async move {
            let result = session.write_file_at(kind, &path).await;
            session.report_send(result).await
        })
    }

    /// 写入一个完整帧（在当前任务中执行）
    pub async fn write_frame(&self, frame: &Frame) -> Result<(), TransferError> {
        self.ensure_running()?;
        let bytes = frame.encode();
        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(TransferError::Closed)?;
        self.guarded(write_encoded(stream, &bytes)).await
    }

    /// 以流的方式写入文件帧（在当前任务中执行）
    ///
    /// 源数据按固定块大小读取，整个过程持有写锁。
    /// 源数据少于声明长度时补零以保持帧完整，并返回写失败。
    pub async fn write_stream<R>(
        &self,
        kind: FileKind,
        reader: &mut R,
        size: u64,
    ) -> Result<(), TransferError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_running()?;
        let mut writer = self.inner.writer.lock().await;
        let stream = writer.as_mut().ok_or(TransferError::Closed)?;
        info!(
            "Sending {} ({} bytes) to {}",
            kind, size, self.inner.peer
        );
        self.guarded(write_file_frame(stream, kind, reader, size))
            .await
    }

    async fn write_file_at(&self, kind: FileKind, path: &Path) -> Result<(), TransferError> {
        let mut file = File::open(path).await?;
        let size = file.metadata().await?.len();
        self.write_stream(kind, &mut file, size).await
    }

    fn ensure_running(&self) -> Result<(), TransferError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(TransferError::Closed)
        }
    }

    /// 执行写操作，会话关闭时立即放弃
    async fn guarded<F>(&self, work: F) -> Result<(), TransferError>
    where
        F: Future<Output = Result<(), FrameError>>,
    {
        tokio::select! {
            () = self.inner.shutdown.cancelled() => Err(TransferError::Closed),
            result = work => result.map_err(TransferError::WriteFailure),
        }
    }

    /// 发送失败只上报，不终止会话
    async fn report_send(&self, result: Result<(), TransferError>) -> Result<(), TransferError> {
        if let Err(e) = &result {
            warn!("Send to {} failed: {}", self.inner.peer, e);
            let _ = self
                .inner
                .events
                .send(TransferEvent::error(format!("Send failed: {}", e)))
                .await;
        }
        result
    }
}

async fn write_encoded<W>(writer: &mut W, bytes: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn write_file_frame<W, R>(
    writer: &mut W,
    kind: FileKind,
    reader: &mut R,
    size: u64,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    frame::write_header(writer, FrameHeader::new(kind.frame_type(), size)).await?;

    let mut sent: u64 = 0;
    let copied = frame::copy_exact(reader, writer, size, |n| {
        sent += n as u64;
        trace!("Sent chunk of {} bytes ({}/{})", n, sent, size);
    })
    .await;

    let result = match copied {
        Err(FrameError::Truncated { expected, received }) => {
            warn!(
                "Source ended after {} of {} bytes, padding the frame",
                received, expected
            );
            let missing = expected - received;
            let mut padding = tokio::io::repeat(0).take(missing);
            frame::copy_exact(&mut padding, writer, missing, |_| {}).await?;
            Err(FrameError::Truncated { expected, received })
        }
        other => other,
    };

    writer.flush().await?;
    result
}

async fn read_loop(inner: Arc<SessionInner>, mut reader: BoxedReader, download_dir: PathBuf) {
    let outcome = tokio::select! {
        () = inner.shutdown.cancelled() => Ok(()),
        result = receive_frames(&inner, &mut reader, &download_dir) => result,
    };

    let was_running = inner.running.swap(false, Ordering::SeqCst);
    inner.shutdown.cancel();
    drop(reader);

    match outcome {
        Ok(()) => info!("Session with {} ended", inner.peer),
        Err(e) => {
            if was_running {
                error!("Session with {} failed: {}", inner.peer, e);
                let _ = inner
                    .events
                    .send(TransferEvent::error(format!("Disconnected: {}", e)))
                    .await;
            } else {
                debug!("Read error after close on {}: {}", inner.peer, e);
            }
        }
    }

    // 发送任务已因取消而释放写锁；两半都释放后连接关闭
    let writer = inner.writer.lock().await.take();
    if let Some(mut writer) = writer
        && let Err(e) = writer.shutdown().await
    {
        debug!("Shutdown of {} failed: {}", inner.peer, e);
    }

    let _ = inner.events.send(TransferEvent::Disconnected).await;
}

async fn receive_frames(
    inner: &SessionInner,
    reader: &mut BoxedReader,
    download_dir: &Path,
) -> Result<(), TransferError> {
    while inner.running.load(Ordering::SeqCst) {
        let header = match frame::read_header(reader).await {
            Ok(Some(header)) => header,
            Ok(None) => {
                debug!("{} closed the stream", inner.peer);
                return Ok(());
            }
            Err(FrameError::UnknownType { tag, length }) => {
                warn!(
                    "Skipping unknown frame type {} ({} bytes) from {}",
                    tag, length, inner.peer
                );
                frame::skip_payload(reader, length)
                    .await
                    .map_err(TransferError::from_read)?;
                continue;
            }
            Err(e) => return Err(TransferError::from_read(e)),
        };

        trace!(
            "Frame {:?} ({} bytes) from {}",
            header.frame_type, header.length, inner.peer
        );

        let message = match header.frame_type {
            FrameType::Text => {
                let payload = frame::read_payload(reader, header.length)
                    .await
                    .map_err(TransferError::from_read)?;
                Some(ReceivedMessage::Text {
                    text: String::from_utf8_lossy(&payload).into_owned(),
                })
            }
            FrameType::Name => {
                let payload = frame::read_payload(reader, header.length)
                    .await
                    .map_err(TransferError::from_read)?;
                let name = frame::decode_name(&payload).map_err(TransferError::from_read)?;
                info!("Peer {} identifies as '{}'", inner.peer, name);
                Some(ReceivedMessage::PeerName { name })
            }
            FrameType::Image => {
                receive_file(inner, reader, FileKind::Image, header.length, download_dir).await?
            }
            FrameType::Video => {
                receive_file(inner, reader, FileKind::Video, header.length, download_dir).await?
            }
            FrameType::Doc => {
                receive_file(inner, reader, FileKind::Doc, header.length, download_dir).await?
            }
        };

        if let Some(message) = message
            && inner
                .events
                .send(TransferEvent::MessageReceived { message })
                .await
                .is_err()
        {
            debug!("Event receiver dropped, message discarded");
        }
    }
    Ok(())
}

/// 将文件帧的载荷流式写入下载目录
///
/// 本地无法创建文件时跳过载荷并上报错误，会话继续。
/// 流提前结束时已写入的部分保留在磁盘上。
async fn receive_file(
    inner: &SessionInner,
    reader: &mut BoxedReader,
    kind: FileKind,
    length: u64,
    download_dir: &Path,
) -> Result<Option<ReceivedMessage>, TransferError> {
    let created = match tokio::fs::create_dir_all(download_dir).await {
        Ok(()) => {
            let path = unique_download_path(download_dir, kind).await;
            File::create(&path).await.map(|file| (file, path))
        }
        Err(e) => Err(e),
    };

    let (mut file, path) = match created {
        Ok(created) => created,
        Err(e) => {
            warn!("Cannot store incoming {}: {}, skipping {} bytes", kind, e, length);
            frame::skip_payload(reader, length)
                .await
                .map_err(TransferError::from_read)?;
            let _ = inner
                .events
                .send(TransferEvent::error(format!("Could not save {}: {}", kind, e)))
                .await;
            return Ok(None);
        }
    };

    info!("Receiving {} ({} bytes) into {:?}", kind, length, path);

    let mut received: u64 = 0;
    let copied = frame::copy_exact(reader, &mut file, length, |n| {
        received += n as u64;
        trace!("Received chunk of {} bytes ({}/{})", n, received, length);
    })
    .await;

    match copied {
        Ok(()) => {
            file.flush().await.map_err(|e| TransferError::ReadFailure(e.into()))?;
            Ok(Some(ReceivedMessage::File {
                file_kind: kind,
                path,
                size: length,
            }))
        }
        Err(e) => {
            let _ = file.flush().await;
            warn!("Partial {} left at {:?}", kind, path);
            Err(TransferError::from_read(e))
        }
    }
}

/// `img_<毫秒>.jpg` 形式的文件名，重名时追加序号
async fn unique_download_path(dir: &Path, kind: FileKind) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let base = format!("{}_{}", kind.file_prefix(), millis);

    let mut candidate = dir.join(format!("{}{}", base, kind.extension()));
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = dir.join(format!("{}_{}{}", base, n, kind.extension()));
        n += 1;
    }
    candidate
}
