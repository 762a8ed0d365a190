//! 点对点 TCP 链路
//!
//! 主机（组所有者）在固定端口监听并只接受一个客户端，
//! 客户端在超时内拨号到组所有者地址。

use log::{debug, info};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::transfer::TransferError;
use crate::wifi::Role;

/// 主机端监听器（只接受一个连接）
pub struct HostListener {
    listener: TcpListener,
}

impl HostListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransferError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransferError::AcceptFailure)?;
        info!("Listening for peer on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        Ok(self.listener.local_addr()?)
    }

    /// 接受一个客户端后关闭监听套接字
    pub async fn accept_one(self) -> Result<(TcpStream, SocketAddr), TransferError> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(TransferError::AcceptFailure)?;
        info!("Accepted peer {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed: {}", e);
        }
        Ok((stream, peer))
    }
}

/// 在超时内拨号
pub async fn dial(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, TransferError> {
    debug!("Dialing {} (timeout {:?})", addr, timeout);
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            info!("Connected to {}", addr);
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed: {}", e);
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(TransferError::DialFailure { addr, source }),
        Err(_) => Err(TransferError::DialTimeout { addr, timeout }),
    }
}

/// 按角色建立链路
///
/// 主机在 `address:port` 上等待一个客户端（通常是未指定地址），
/// 客户端拨号到组所有者的 `address:port`。
pub async fn open_link(
    role: Role,
    address: IpAddr,
    port: u16,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), TransferError> {
    let addr = SocketAddr::new(address, port);
    match role {
        Role::Host => HostListener::bind(addr).await?.accept_one().await,
        Role::Client => dial(addr, timeout).await.map(|stream| (stream, addr)),
    }
}
