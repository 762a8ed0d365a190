//! 应用配置和持久化
//!
//! 提供设备名称、下载目录、端口和各类超时设置的存储和读取。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// 默认传输端口
pub const DEFAULT_PORT: u16 = 8888;

/// 设备名称提供者
///
/// 在构造时注入到传输会话中，握手时读取一次。
pub trait DisplayNameProvider: Send + Sync {
    fn display_name(&self) -> String;
}

impl DisplayNameProvider for String {
    fn display_name(&self) -> String {
        self.clone()
    }
}

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称（握手时发送给对端）
    pub device_name: String,
    /// 接收文件的保存目录
    pub download_dir: PathBuf,
    /// WiFi 接口名称
    pub wifi_interface: String,
    /// TCP 传输端口
    pub port: u16,
    /// 出站连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 对端忙时的重试间隔（毫秒）
    pub busy_retry_ms: u64,
    /// 恢复后进入模式前的等待时间（毫秒）
    pub resume_delay_ms: u64,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            wifi_interface: "wlan0".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            busy_retry_ms: 1000,
            resume_delay_ms: 800,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nearshare");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

impl DisplayNameProvider for AppSettings {
    fn display_name(&self) -> String {
        self.device_name.clone()
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "NearShare".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.port, 8888);
        assert_eq!(settings.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(settings.busy_retry_delay(), Duration::from_millis(1000));
        assert!(!settings.device_name.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        // 缺失的字段回退到默认值
        let settings: AppSettings = toml::from_str("device_name = \"Pixel\"\nport = 9000\n").unwrap();
        assert_eq!(settings.device_name, "Pixel");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.busy_retry_ms, 1000);
        assert_eq!(settings.wifi_interface, "wlan0");
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = AppSettings {
            device_name: "Desk".to_string(),
            download_dir: PathBuf::from("/tmp/nearshare"),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: AppSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed.device_name, "Desk");
        assert_eq!(parsed.download_dir, PathBuf::from("/tmp/nearshare"));
    }

    #[test]
    fn test_display_name_provider() {
        let settings = AppSettings {
            device_name: "Living Room".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.display_name(), "Living Room");
        assert_eq!("Phone".to_string().display_name(), "Phone");
    }
}
