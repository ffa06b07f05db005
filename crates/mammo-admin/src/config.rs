//! 配置管理
//!
//! 配置来源依次为内置默认值、可选的 TOML 文件、`MAMMO_` 前缀的环境变量。
//! 环境变量用双下划线分隔层级，例如 `MAMMO_STORAGE__DATA_DIR`。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// 平台完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub identity: IdentityConfig,
    pub diagnostics: DiagnosticsConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// `file` 或 `memory`
    pub backend: String,
    /// 文件存储目录
    pub data_dir: String,
}

/// 账户与验证码配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// 验证码有效期（分钟）
    pub code_ttl_minutes: i64,
    /// 验证码最多允许失败的次数
    pub max_code_attempts: u32,
    /// 口令摘要迭代次数
    pub hash_iterations: u32,
}

/// AI诊断服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    /// `emailjs` 或 `outbox`
    pub provider: String,
    pub endpoint: String,
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
    pub reply_to: String,
    pub timeout_secs: u64,
    /// 本地发件箱的落盘文件，缺省时位于数据目录下
    pub outbox_path: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或完整的过滤表达式
    pub level: String,
    /// `plain` 或 `json`
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            code_ttl_minutes: 15,
            max_code_attempts: 5,
            hash_iterations: mammo_core::password::DEFAULT_ITERATIONS,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key: String::new(),
            timeout_secs: 60,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            provider: "outbox".to_string(),
            endpoint: "https://api.emailjs.com/api/v1.0/email/send".to_string(),
            service_id: String::new(),
            template_id: String::new(),
            public_key: String::new(),
            reply_to: "support@xaiplatform.org".to_string(),
            timeout_secs: 15,
            outbox_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

/// 数据目录下的发件箱文件名
pub const OUTBOX_FILE: &str = "outbox.jsonl";

impl AppConfig {
    /// 发件箱落盘路径
    ///
    /// 显式配置优先；文件存储时放在数据目录下；内存存储时不落盘。
    pub fn outbox_spool_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.notification.outbox_path {
            return Some(PathBuf::from(path));
        }
        match self.storage.backend.as_str() {
            "file" => Some(Path::new(&self.storage.data_dir).join(OUTBOX_FILE)),
            _ => None,
        }
    }
}

impl DiagnosticsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl NotificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: AppConfig,
    config_path: Option<PathBuf>,
    validator: ConfigValidator,
}

impl ConfigManager {
    /// 加载并校验配置
    ///
    /// 未指定文件时只使用默认值和环境变量。
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
            validator,
        })
    }

    fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("MAMMO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration sources")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 校验后替换配置并写回文件
    pub fn update_config(&mut self, new_config: AppConfig) -> Result<()> {
        self.validator.validate(&new_config)?;
        self.config = new_config;
        if self.config_path.is_some() {
            self.save_config()?;
        }
        info!("Configuration updated");
        Ok(())
    }

    /// 把当前配置写为 TOML
    pub fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No configuration file to save to"))?;
        Self::write_toml(&self.config, path)
    }

    /// 写出配置文件，`config init` 使用
    pub fn write_toml(config: &AppConfig, path: &Path) -> Result<()> {
        let config_str =
            toml::to_string_pretty(config).context("Failed to serialize configuration")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, config_str)
            .with_context(|| format!("Failed to write configuration file {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    pub fn reload_config(&mut self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;
        self.config = new_config;
        Ok(())
    }

    /// 按点分路径读取配置值
    pub fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self
            .extract_nested_value(path)
            .with_context(|| format!("Configuration path not found: {}", path))?;

        serde_json::from_value(value).context("Failed to deserialize configuration value")
    }

    fn extract_nested_value(&self, path: &str) -> Result<serde_json::Value> {
        let config_json =
            serde_json::to_value(&self.config).context("Failed to serialize config to JSON")?;

        let mut current = &config_json;
        for part in path.split('.') {
            match current {
                serde_json::Value::Object(map) => {
                    current = map
                        .get(part)
                        .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?;
                }
                _ => return Err(anyhow::anyhow!("Invalid path at segment: {}", part)),
            }
        }

        Ok(current.clone())
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&AppConfig) -> Result<()>,
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} must be one of {:?}, got '{}'",
            field,
            allowed,
            value
        ))
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "storage.backend",
                validator: |config| one_of("backend", &config.storage.backend, &["file", "memory"]),
            },
            ValidationRule {
                field_path: "storage.data_dir",
                validator: |config| {
                    let storage = &config.storage;
                    if storage.backend == "file" && storage.data_dir.trim().is_empty() {
                        Err(anyhow::anyhow!("Data directory cannot be empty"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "identity.code_ttl_minutes",
                validator: |config| {
                    if config.identity.code_ttl_minutes <= 0 {
                        Err(anyhow::anyhow!("Code TTL must be positive"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "identity.max_code_attempts",
                validator: |config| {
                    if config.identity.max_code_attempts == 0 {
                        Err(anyhow::anyhow!("At least one code attempt must be allowed"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "identity.hash_iterations",
                validator: |config| {
                    if config.identity.hash_iterations == 0 {
                        Err(anyhow::anyhow!("Hash iterations cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "diagnostics.timeout_secs",
                validator: |config| {
                    if config.diagnostics.timeout_secs == 0 {
                        Err(anyhow::anyhow!("Diagnostic timeout cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "notification.provider",
                validator: |config| {
                    one_of("provider", &config.notification.provider, &["emailjs", "outbox"])?;
                    let n = &config.notification;
                    if n.provider == "emailjs"
                        && (n.service_id.is_empty()
                            || n.template_id.is_empty()
                            || n.public_key.is_empty())
                    {
                        return Err(anyhow::anyhow!(
                            "emailjs requires service_id, template_id and public_key"
                        ));
                    }
                    Ok(())
                },
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| one_of("format", &config.logging.format, &["plain", "json"]),
            },
        ];

        Self { validation_rules }
    }

    pub fn validate(&self, config: &AppConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());
        assert_eq!(config.identity.code_ttl_minutes, 15);
        assert_eq!(config.identity.max_code_attempts, 5);
    }

    #[test]
    fn test_outbox_follows_data_dir() {
        let mut config = AppConfig::default();
        config.storage.data_dir = "/srv/mammo".to_string();
        assert_eq!(
            config.outbox_spool_path(),
            Some(Path::new("/srv/mammo").join(OUTBOX_FILE))
        );

        config.notification.outbox_path = Some("/var/spool/mammo.jsonl".to_string());
        assert_eq!(
            config.outbox_spool_path(),
            Some(PathBuf::from("/var/spool/mammo.jsonl"))
        );

        config.notification.outbox_path = None;
        config.storage.backend = "memory".to_string();
        assert_eq!(config.outbox_spool_path(), None);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mammo.toml");
        std::fs::write(
            &path,
            "[storage]\nbackend = \"memory\"\n\n[identity]\nhash_iterations = 50\n",
        )
        .unwrap();

        let manager = ConfigManager::new(Some(&path)).unwrap();
        let config = manager.get_config();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.identity.hash_iterations, 50);
        assert_eq!(config.identity.code_ttl_minutes, 15);
        assert_eq!(manager.get_value::<u32>("identity.hash_iterations").unwrap(), 50);
        assert!(manager.get_value::<String>("identity.missing").is_err());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mammo.toml");
        std::fs::write(&path, "[notification]\nprovider = \"emailjs\"\n").unwrap();
        assert!(ConfigManager::new(Some(&path)).is_err());

        std::fs::write(&path, "[logging]\nformat = \"xml\"\n").unwrap();
        assert!(ConfigManager::new(Some(&path)).is_err());
    }

    #[test]
    fn test_update_saves_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mammo.toml");
        ConfigManager::write_toml(&AppConfig::default(), &path).unwrap();

        let mut manager = ConfigManager::new(Some(&path)).unwrap();
        let mut updated = manager.get_config().clone();
        updated.logging.format = "json".to_string();
        manager.update_config(updated.clone()).unwrap();

        manager.reload_config().unwrap();
        assert_eq!(manager.get_config(), &updated);

        let mut broken = updated;
        broken.identity.hash_iterations = 0;
        assert!(manager.update_config(broken).is_err());
        assert_eq!(manager.get_config().identity.hash_iterations, 10_000);
    }
}
