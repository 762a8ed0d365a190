//! 基于 `wpa_cli` 的 Linux 平台实现
//!
//! 通过 `wpa_cli -i <iface> <command>` 驱动 wpa_supplicant 的 P2P 功能。
//! wpa_cli 没有回调，这里用轮询监视器把观察到的变化
//! （对端集合、组接口出现/消失）转换成 [`P2pEvent`] 流。

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::wifi::{
    ConnectRequest, ConnectionInfo, FailureReason, P2pEvent, P2pPlatform, PeerDevice, PeerStatus,
};

/// 监视器轮询间隔
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// wpa_cli 平台
pub struct WpaCliPlatform {
    /// P2P 设备接口（通常是 wlan0）
    interface: String,
}

impl WpaCliPlatform {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
        }
    }

    /// 在指定接口上执行 wpa_cli 命令，返回去掉首尾空白的输出
    async fn run_on(&self, interface: &str, args: &[&str]) -> Result<String, FailureReason> {
        trace!("wpa_cli -i {} {}", interface, args.join(" "));
        let output = Command::new("wpa_cli")
            .arg("-i")
            .arg(interface)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                warn!("Failed to run wpa_cli: {}", e);
                FailureReason::Unsupported
            })?;

        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            warn!("wpa_cli {} failed: {}", args.join(" "), err.trim());
            return Err(FailureReason::Error);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        classify_reply(&stdout)?;
        Ok(stdout)
    }

    async fn run(&self, args: &[&str]) -> Result<String, FailureReason> {
        self.run_on(&self.interface, args).await
    }

    /// 当前的 P2P 组接口（p2p-wlan0-0 之类）
    async fn group_interface(&self) -> Option<String> {
        let reply = self.run(&["interface"]).await.ok()?;
        parse_group_interface(&reply)
    }

    async fn peer_addresses(&self) -> Result<Vec<String>, FailureReason> {
        let reply = self.run(&["p2p_peers"]).await?;
        Ok(parse_peer_list(&reply))
    }

    /// 获取接口的 IPv4 地址
    async fn interface_ipv4(&self, interface: &str) -> Option<Ipv4Addr> {
        let output = Command::new("ip")
            .args(["-o", "-4", "addr", "show", interface])
            .output()
            .await
            .ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_inet_address(&stdout)
    }

    /// 启动轮询监视器
    ///
    /// 接收端被丢弃后监视任务自动退出。
    pub fn monitor(self: &Arc<Self>) -> mpsc::Receiver<P2pEvent> {
        let (tx, rx) = mpsc::channel(16);
        let platform = self.clone();
        tokio::spawn(async move {
            let mut enabled: Option<bool> = None;
            let mut peers: Vec<String> = Vec::new();
            let mut group: Option<String> = None;
            let mut ticker = tokio::time::interval(POLL_INTERVAL);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                let current = platform.peer_addresses().await;
                let now_enabled = current.is_ok();
                if enabled != Some(now_enabled) {
                    enabled = Some(now_enabled);
                    if tx
                        .send(P2pEvent::StateChanged {
                            enabled: now_enabled,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }

                if let Ok(mut current) = current {
                    current.sort();
                    if current != peers {
                        debug!("Peer set changed: {} peers", current.len());
                        peers = current;
                        if tx.send(P2pEvent::PeersChanged).await.is_err() {
                            break;
                        }
                    }
                }

                let now_group = platform.group_interface().await;
                if now_group != group {
                    let connected = now_group.is_some();
                    info!("P2P group interface: {:?}", now_group);
                    group = now_group;
                    if tx
                        .send(P2pEvent::ConnectionChanged { connected })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
            debug!("wpa_cli monitor stopped");
        });
        rx
    }
}

#[async_trait]
impl P2pPlatform for WpaCliPlatform {
    async fn create_group(&self) -> Result<(), FailureReason> {
        self.run(&["p2p_group_add"]).await.map(|_| ())
    }

    async fn remove_group(&self) -> Result<(), FailureReason> {
        match self.group_interface().await {
            Some(group) => self.run(&["p2p_group_remove", &group]).await.map(|_| ()),
            None => Ok(()),
        }
    }

    async fn discover_peers(&self) -> Result<(), FailureReason> {
        self.run(&["p2p_find"]).await.map(|_| ())
    }

    async fn stop_peer_discovery(&self) -> Result<(), FailureReason> {
        self.run(&["p2p_stop_find"]).await.map(|_| ())
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<(), FailureReason> {
        let intent = format!("go_intent={}", request.group_owner_intent);
        self.run(&["p2p_connect", &request.device_address, "pbc", &intent])
            .await
            .map(|_| ())
    }

    async fn request_peers(&self) -> Vec<PeerDevice> {
        let addresses = match self.peer_addresses().await {
            Ok(addresses) => addresses,
            Err(reason) => {
                warn!("p2p_peers failed: {}", reason);
                return Vec::new();
            }
        };

        let mut peers = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.run(&["p2p_peer", &address]).await {
                Ok(reply) => peers.push(parse_peer(&address, &reply)),
                Err(reason) => debug!("p2p_peer {} failed: {}", address, reason),
            }
        }
        peers
    }

    async fn request_connection_info(&self) -> ConnectionInfo {
        let Some(group) = self.group_interface().await else {
            return ConnectionInfo::default();
        };
        let status = match self.run_on(&group, &["status"]).await {
            Ok(reply) => parse_key_values(&reply),
            Err(reason) => {
                warn!("status on {} failed: {}", group, reason);
                return ConnectionInfo::default();
            }
        };

        let group_formed = status.get("wpa_state").is_some_and(|s| s == "COMPLETED");
        let is_group_owner = status.get("mode").is_some_and(|m| m.contains("GO"));
        let group_owner_address = if is_group_owner {
            None
        } else {
            // 组所有者通常是子网的 .1 地址
            self.interface_ipv4(&group)
                .await
                .map(|ip| IpAddr::V4(gateway_for(ip)))
        };

        ConnectionInfo {
            group_formed,
            is_group_owner,
            group_owner_address,
        }
    }
}

/// 检查回复中的失败标记
fn classify_reply(reply: &str) -> Result<(), FailureReason> {
    if reply.contains("BUSY") {
        Err(FailureReason::Busy)
    } else if reply.starts_with("UNKNOWN COMMAND") {
        Err(FailureReason::Unsupported)
    } else if reply.starts_with("FAIL") {
        Err(FailureReason::Error)
    } else {
        Ok(())
    }
}

fn parse_peer_list(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| is_mac_address(line))
        .map(str::to_string)
        .collect()
}

fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn parse_key_values(reply: &str) -> HashMap<String, String> {
    reply
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// 由 `p2p_peer <addr>` 的输出构造设备
fn parse_peer(address: &str, reply: &str) -> PeerDevice {
    let fields = parse_key_values(reply);
    let display_name = fields
        .get("device_name")
        .filter(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| address.to_string());

    let flags = fields.get("flags").map(String::as_str).unwrap_or_default();
    let status = if fields.get("member_in_go_dev").is_some_and(|m| is_mac_address(m) && m != "00:00:00:00:00:00") {
        PeerStatus::Connected
    } else if flags.contains("GO_NEG_REQ_SENT") || flags.contains("INVITATION") {
        PeerStatus::Invited
    } else {
        PeerStatus::Available
    };

    PeerDevice::new(address, display_name, status)
}

fn parse_group_interface(reply: &str) -> Option<String> {
    reply
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("p2p-") && !line.starts_with("p2p-dev-"))
        .map(str::to_string)
}

fn parse_inet_address(output: &str) -> Option<Ipv4Addr> {
    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(pos) = parts.iter().position(|&s| s == "inet")
            && let Some(ip) = parts
                .get(pos + 1)
                .and_then(|cidr| cidr.split('/').next())
                .and_then(|ip| ip.parse().ok())
        {
            return Some(ip);
        }
    }
    None
}

fn gateway_for(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reply() {
        assert_eq!(classify_reply("OK"), Ok(()));
        assert_eq!(classify_reply("FAIL-BUSY"), Err(FailureReason::Busy));
        assert_eq!(classify_reply("FAIL"), Err(FailureReason::Error));
        assert_eq!(
            classify_reply("UNKNOWN COMMAND"),
            Err(FailureReason::Unsupported)
        );
    }

    #[test]
    fn test_parse_peer_list() {
        let reply = "02:11:22:33:44:55\nde:ad:be:ef:00:01\n\nSelected interface 'wlan0'";
        assert_eq!(
            parse_peer_list(reply),
            vec!["02:11:22:33:44:55", "de:ad:be:ef:00:01"]
        );
    }

    #[test]
    fn test_parse_peer_details() {
        let reply = "02:11:22:33:44:55\n\
                     pri_dev_type=10-0050F204-5\n\
                     device_name=Pixel 8\n\
                     flags=[REPORTED]\n\
                     member_in_go_dev=00:00:00:00:00:00\n";
        let peer = parse_peer("02:11:22:33:44:55", reply);
        assert_eq!(peer.display_name, "Pixel 8");
        assert_eq!(peer.status, PeerStatus::Available);

        let invited = parse_peer("aa:bb:cc:dd:ee:ff", "flags=[GO_NEG_REQ_SENT]\n");
        assert_eq!(invited.display_name, "aa:bb:cc:dd:ee:ff");
        assert_eq!(invited.status, PeerStatus::Invited);
    }

    #[test]
    fn test_parse_group_interface() {
        let reply = "Available interfaces:\np2p-dev-wlan0\nwlan0\np2p-wlan0-0\n";
        assert_eq!(parse_group_interface(reply).as_deref(), Some("p2p-wlan0-0"));
        assert_eq!(parse_group_interface("wlan0\np2p-dev-wlan0\n"), None);
    }

    #[test]
    fn test_gateway_heuristic() {
        let out = "7: p2p-wlan0-0    inet 192.168.49.23/24 brd 192.168.49.255 scope global p2p-wlan0-0";
        let ip = parse_inet_address(out).unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 49, 23));
        assert_eq!(gateway_for(ip), Ipv4Addr::new(192, 168, 49, 1));
    }
}
