//! 对端注册表
//!
//! 每次发现广播都整体替换，从不合并或比较差异。

use std::sync::{Arc, PoisonError, RwLock};

use crate::wifi::PeerDevice;

/// 当前发现到的对端集合（可克隆的共享句柄）
#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<Arc<[PeerDevice]>>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(RwLock::new(Arc::from(Vec::new()))),
        }
    }

    /// 用新列表整体替换
    pub fn replace(&self, peers: Vec<PeerDevice>) {
        let next: Arc<[PeerDevice]> = peers.into();
        *self.peers.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// 当前快照（不可变）
    pub fn snapshot(&self) -> Arc<[PeerDevice]> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 在最新快照中按地址查找
    pub fn find(&self, address: &str) -> Option<PeerDevice> {
        self.snapshot()
            .iter()
            .find(|peer| peer.address == address)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wifi::PeerStatus;

    fn peer(address: &str, name: &str) -> PeerDevice {
        PeerDevice::new(address, name, PeerStatus::Available)
    }

    #[test]
    fn test_replace_discards_previous_peers() {
        let registry = PeerRegistry::new();
        registry.replace(vec![peer("a", "Alpha"), peer("b", "Beta")]);
        registry.replace(vec![peer("c", "Gamma")]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].address, "c");
        assert!(registry.find("a").is_none());
    }

    #[test]
    fn test_old_snapshot_is_unchanged() {
        let registry = PeerRegistry::new();
        registry.replace(vec![peer("a", "Alpha")]);
        let before = registry.snapshot();
        registry.replace(vec![peer("b", "Beta"), peer("c", "Gamma")]);

        assert_eq!(before.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_uses_latest_status() {
        let registry = PeerRegistry::new();
        registry.replace(vec![peer("a", "Alpha")]);
        registry.replace(vec![PeerDevice::new("a", "Alpha", PeerStatus::Invited)]);
        assert_eq!(registry.find("a").unwrap().status, PeerStatus::Invited);

        let handle = registry.clone();
        handle.clear();
        assert!(registry.is_empty());
    }
}
