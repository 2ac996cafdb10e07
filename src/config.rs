// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 客户端配置 - 通过JSON文件调整参数

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::acquisition::{Encoding, FetchRequest, Mode};
use crate::error::{Error, Result};

/// 客户端参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // === 服务器 ===
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,

    // === 采集模式 ===
    pub width: u16,
    pub height: u16,
    pub encoding: Encoding,

    // === 目录 ===
    pub raw_dir: PathBuf,    // 原始数据转储
    pub raster_dir: PathBuf, // 解码后的图像
    pub overlay_dir: PathBuf,
    pub weights_dir: PathBuf,
    pub dump_raw: bool,

    // === 检测 ===
    pub preset: String,
    pub conf_threshold: f32,
    pub batch_size: usize,

    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9977,
            connect_timeout_secs: Some(5),
            read_timeout_secs: Some(30),

            width: 1024,
            height: 1024,
            encoding: Encoding::Int8,

            raw_dir: PathBuf::from("tmp"),
            raster_dir: PathBuf::from("client_image"),
            overlay_dir: PathBuf::from("tmp"),
            weights_dir: PathBuf::from("weights"),
            dump_raw: false,

            preset: "small-ships".to_string(),
            conf_threshold: 0.25,
            batch_size: 4,

            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 从JSON文件加载配置; 文件不存在时写入默认配置
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!(path = %path.display(), "✅ config loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "⚠️ config unparseable, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "📝 config missing, writing defaults");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!(error = %e, "could not write default config");
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!(path = %path.display(), "💾 config saved");
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        Mode::new(self.encoding, self.width, self.height)
    }

    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            host: self.host.clone(),
            port: self.port,
            mode: self.mode(),
            raster_dir: self.raster_dir.clone(),
            raw_dump: self.dump_raw.then(|| self.raw_dir.join("output.raw")),
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            read_timeout: self.read_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let config = AppConfig::load(&path);
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
        assert_eq!(AppConfig::load(&path), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, r#"{"port": 1234, "encoding": "UInt16"}"#).unwrap();
        let config = AppConfig::load(&path);
        assert_eq!(config.port, 1234);
        assert_eq!(config.encoding, Encoding::UInt16);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_garbage_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(AppConfig::load(&path), AppConfig::default());
    }

    #[test]
    fn test_fetch_request() {
        let config = AppConfig {
            dump_raw: true,
            ..AppConfig::default()
        };
        let req = config.fetch_request();
        assert_eq!(req.raw_dump, Some(PathBuf::from("tmp").join("output.raw")));
        assert_eq!(req.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(req.mode.width, 1024);
    }
}
