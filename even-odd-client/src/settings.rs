//! 客户端设置模块
//!
//! 提供设置数据结构和 JSON 持久化，网络部分可转换为运行时的 `SocketConfig`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use protocol::{
    BACKOFF_BASE_MS, BACKOFF_MAX_MS, DEFAULT_HEARTBEAT_MESSAGE, DEFAULT_SERVER_URL,
    ENDPOINT_DEBOUNCE_MS, HEARTBEAT_INTERVAL_MS, MAX_RETRIES,
};

use crate::network::{HeartbeatPayload, SocketConfig};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn display_name(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// EnvFilter 指令（作用于本客户端和协议库）
    pub fn directives(&self) -> [String; 2] {
        let level = self.display_name().to_lowercase();
        [
            format!("even_odd_client={level}"),
            format!("protocol={level}"),
        ]
    }
}

/// 网络设置（时间单位为毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// 自动重连
    pub reconnect: bool,
    /// 最大重连次数
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// 心跳
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_message: String,
    /// 消息历史容量（0 表示不限）
    pub max_messages: usize,
    /// WebSocket 子协议
    pub subprotocol: Option<String>,
    /// 传输层调试日志
    pub debug: bool,
    /// 切换服务器时的防抖延迟
    pub endpoint_debounce_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            reconnect: true,
            max_retries: MAX_RETRIES,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_max_ms: BACKOFF_MAX_MS,
            heartbeat_enabled: true,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            heartbeat_message: DEFAULT_HEARTBEAT_MESSAGE.to_string(),
            max_messages: 0,
            subprotocol: None,
            debug: false,
            endpoint_debounce_ms: ENDPOINT_DEBOUNCE_MS,
        }
    }
}

impl NetworkSettings {
    /// 转换为传输层配置
    pub fn to_socket_config(&self) -> SocketConfig {
        SocketConfig::default()
            .with_reconnect(self.reconnect, self.max_retries)
            .with_backoff(
                Duration::from_millis(self.backoff_base_ms),
                Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            )
            .with_heartbeat(
                self.heartbeat_enabled,
                Duration::from_millis(self.heartbeat_interval_ms),
            )
            .with_heartbeat_payload(HeartbeatPayload::Literal(self.heartbeat_message.clone()))
            .with_max_messages(self.max_messages)
            .with_subprotocol(self.subprotocol.clone())
            .with_debug(self.debug)
            .with_endpoint_debounce(Duration::from_millis(self.endpoint_debounce_ms))
    }
}

/// 客户端设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// 服务器地址
    pub server_url: String,
    /// 日志级别
    pub log_level: LogLevel,
    /// 网络设置
    pub network: NetworkSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            log_level: LogLevel::default(),
            network: NetworkSettings::default(),
        }
    }
}

impl ClientSettings {
    /// 默认设置文件路径
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("even-odd");
            path.push("settings.json");
            path
        })
    }

    /// 从默认路径加载设置
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::warn!("Config directory unavailable, using default settings");
                Self::default()
            }
        }
    }

    /// 从指定文件加载设置，任何失败都回退到默认值
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("Settings file not found, using defaults");
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    tracing::info!("Loaded settings: {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Invalid settings file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read settings file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// 保存到默认路径
    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path().context("Config directory unavailable")?;
        self.save_to(&path)
    }

    /// 保存到指定文件
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;

        tracing::info!("Settings saved: {:?}", path);
        Ok(())
    }
}
