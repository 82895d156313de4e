use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};

/// 环境变量前缀 / Environment variable prefix (`VDATE_SERVER__WS_PORT` -> `server.ws_port`)
pub const ENV_PREFIX: &str = "VDATE";

lazy_static! {
    static ref GLOBAL_CONFIG_MANAGER: RwLock<Option<Arc<ConfigManager>>> = RwLock::new(None);
}

/// 配置错误类型 / Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置项 '{key}' 不存在 / config key '{key}' not found")]
    KeyNotFound { key: String },
    #[error("配置项 '{key}' 类型转换失败 / config key '{key}' has wrong type: {message}")]
    TypeConversionError { key: String, message: String },
    #[error("配置初始化失败 / config initialisation failed: {message}")]
    InitializationError { message: String },
}

/// 配置源 / Configuration source
///
/// 按添加顺序叠加，后添加者覆盖先添加者
/// Sources are layered in insertion order, later ones override earlier ones
pub enum ConfigSource {
    /// 文件配置源 / File source
    File { path: String, required: bool },
    /// 环境变量配置源 / Environment source
    Env {
        prefix: String,
        separator: &'static str,
    },
    /// 字符串配置源（测试常用）/ Inline string source (mostly for tests)
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    fn describe(&self) -> String {
        match self {
            ConfigSource::File { path, required } => {
                format!("file:{} (required={})", path, required)
            }
            ConfigSource::Env { prefix, separator } => {
                format!("env:{}_*(separator={})", prefix, separator)
            }
            ConfigSource::String { .. } => "inline".to_string(),
        }
    }

    fn add_to_builder(
        self,
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        match self {
            ConfigSource::File { path, required } => {
                if required && !std::path::Path::new(&path).exists() {
                    return Err(anyhow!("必需的配置文件不存在 / required config file missing: {}", path));
                }
                Ok(builder.add_source(File::with_name(&path).required(required)))
            }
            ConfigSource::Env { prefix, separator } => Ok(builder.add_source(
                Environment::with_prefix(&prefix)
                    .prefix_separator("_")
                    .separator(separator)
                    .try_parsing(true)
                    .ignore_empty(true),
            )),
            ConfigSource::String { content, format } => {
                Ok(builder.add_source(File::from_str(&content, format)))
            }
        }
    }
}

/// 配置管理器 / Configuration manager
pub struct ConfigManager {
    config: Config,
    loaded_sources: Vec<String>,
}

impl ConfigManager {
    /// 使用指定的配置源创建 / Build from explicit sources
    pub fn with_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut loaded_sources = Vec::new();
        for source in sources {
            // 可选文件不存在时跳过 / skip optional files that are absent
            if let ConfigSource::File { path, required: false } = &source {
                if !std::path::Path::new(path).exists() {
                    continue;
                }
            }
            loaded_sources.push(source.describe());
            builder = source.add_to_builder(builder)?;
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("构建配置失败 / failed to build config: {}", e))?;
        Ok(Self {
            config,
            loaded_sources,
        })
    }

    /// 默认源 + 指定文件 + 环境变量 / Defaults, then the given file, then environment
    pub fn from_file(path: &str) -> Result<Self> {
        Self::with_sources(vec![
            ConfigSource::File {
                path: "config/default.toml".to_string(),
                required: false,
            },
            ConfigSource::File {
                path: path.to_string(),
                required: true,
            },
            ConfigSource::Env {
                prefix: ENV_PREFIX.to_string(),
                separator: "__",
            },
        ])
    }

    /// 无文件时仅使用默认源 / Defaults only (no explicit file)
    pub fn from_defaults() -> Result<Self> {
        Self::with_sources(vec![
            ConfigSource::File {
                path: "config/default.toml".to_string(),
                required: false,
            },
            ConfigSource::Env {
                prefix: ENV_PREFIX.to_string(),
                separator: "__",
            },
        ])
    }

    /// 获取指定 key 的配置值 / Read a typed value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config
            .get(key)
            .map_err(|e| anyhow!("获取配置 '{}' 失败 / failed to read '{}': {}", key, key, e))
    }

    /// 不存在时返回默认值 / Read a typed value or fall back to `default`
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// 区分“缺失”与“类型错误” / Distinguish missing keys from type mismatches
    pub fn get_safe<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, ConfigError> {
        self.config.get(key).map_err(|e| match e {
            config::ConfigError::NotFound(_) => ConfigError::KeyNotFound {
                key: key.to_string(),
            },
            other => ConfigError::TypeConversionError {
                key: key.to_string(),
                message: other.to_string(),
            },
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.config.get::<serde_json::Value>(key).is_ok()
    }

    /// 已加载的配置源描述 / Descriptions of the sources that were loaded
    pub fn loaded_sources(&self) -> &[String] {
        &self.loaded_sources
    }
}

/// 安装全局配置管理器 / Install the process-wide manager
pub fn init_global_config(manager: ConfigManager) -> Result<Arc<ConfigManager>> {
    let manager = Arc::new(manager);
    let mut slot = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败 / config lock poisoned: {}", e))?;
    *slot = Some(Arc::clone(&manager));
    Ok(manager)
}

/// 从文件初始化全局配置 / Initialise the process-wide manager from a file
pub fn init_global_config_with_file(path: &str) -> Result<Arc<ConfigManager>> {
    init_global_config(ConfigManager::from_file(path)?)
}

/// 获取全局配置管理器，未初始化时按默认源创建
/// Get the process-wide manager, creating it from defaults on first use
pub fn get_global_config_manager() -> Result<Arc<ConfigManager>> {
    {
        let slot = GLOBAL_CONFIG_MANAGER
            .read()
            .map_err(|e| anyhow!("读取全局配置管理器锁失败 / config lock poisoned: {}", e))?;
        if let Some(manager) = slot.as_ref() {
            return Ok(Arc::clone(manager));
        }
    }
    let mut slot = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败 / config lock poisoned: {}", e))?;
    match slot.as_ref() {
        Some(manager) => Ok(Arc::clone(manager)),
        None => {
            let manager = Arc::new(ConfigManager::from_defaults()?);
            *slot = Some(Arc::clone(&manager));
            Ok(manager)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ConfigManager, ConfigSource};
    use config::FileFormat;
    use std::io::Write;

    #[test]
    fn test_config_from_string() {
        let source = ConfigSource::String {
            content: "[server]\nws_port = 5300\n[presence]\ngrace_ms = 100".to_string(),
            format: FileFormat::Toml,
        };
        let manager = ConfigManager::with_sources(vec![source]).unwrap();
        assert_eq!(manager.get::<i64>("server.ws_port").unwrap(), 5300);
        assert_eq!(manager.get_or("presence.grace_ms", 30_000_u64), 100);
        assert_eq!(manager.get_or("presence.missing", 7_u64), 7);
    }

    #[test]
    fn test_later_sources_override_earlier() {
        let manager = ConfigManager::with_sources(vec![
            ConfigSource::String {
                content: "[quota]\npolicy = \"enforcing\"".to_string(),
                format: FileFormat::Toml,
            },
            ConfigSource::String {
                content: "[quota]\npolicy = \"permissive\"".to_string(),
                format: FileFormat::Toml,
            },
        ])
        .unwrap();
        assert_eq!(manager.get::<String>("quota.policy").unwrap(), "permissive");
    }

    #[test]
    fn test_missing_key_is_distinguishable() {
        let manager = ConfigManager::with_sources(vec![]).unwrap();
        assert!(matches!(
            manager.get_safe::<String>("auth.center_url"),
            Err(ConfigError::KeyNotFound { .. })
        ));
        assert!(!manager.exists("auth.center_url"));
    }

    #[test]
    fn test_required_file_must_exist() {
        assert!(ConfigManager::from_file("/definitely/not/here.toml").is_err());

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nhost = \"0.0.0.0\"").unwrap();
        let manager = ConfigManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(manager.get::<String>("server.host").unwrap(), "0.0.0.0");
        assert!(manager
            .loaded_sources()
            .iter()
            .any(|s| s.starts_with("file:")));
    }
}
