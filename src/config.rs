//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__TRANSPORT__FLAVOR=azure`）。
//! 凭据未写入配置时回落到 `OPENAI_API_KEY` / `AZURE_OPENAI_API_KEY` / `AZURE_OPENAI_ENDPOINT`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{OrchestratorError, RunSettings};
use crate::llm::ImageModels;
use crate::transport::{RetryConfig, TransportFlavor, TransportSettings};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub transport: TransportSection,
    pub run: RunSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未给出命令行参数时发送的消息
    pub default_query: Option<String>,
}

/// [transport] 段：远端服务连接
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub flavor: TransportFlavor,
    /// openai 风格默认 https://api.openai.com/v1；azure 风格为资源地址
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
    /// Agent 使用的模型（azure 下为部署名）
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            flavor: TransportFlavor::OpenAi,
            endpoint: None,
            api_key: None,
            api_version: "2024-05-01-preview".to_string(),
            model: "gpt-4o".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl TransportSection {
    /// 校验并补全连接参数；缺少凭据或地址非法时返回 Configuration
    pub fn resolve(&self) -> Result<TransportSettings, OrchestratorError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// 同 resolve，环境变量由 env 提供
    pub fn resolve_with<F>(&self, env: F) -> Result<TransportSettings, OrchestratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let key_var = match self.flavor {
            TransportFlavor::OpenAi => "OPENAI_API_KEY",
            TransportFlavor::Azure => "AZURE_OPENAI_API_KEY",
        };
        let api_key = non_empty(self.api_key.clone())
            .or_else(|| non_empty(env(key_var)))
            .ok_or_else(|| {
                OrchestratorError::Configuration(format!("missing API key: set transport.api_key or {key_var}"))
            })?;

        let endpoint = match self.flavor {
            TransportFlavor::OpenAi => {
                non_empty(self.endpoint.clone()).unwrap_or_else(|| OPENAI_BASE_URL.to_string())
            }
            TransportFlavor::Azure => non_empty(self.endpoint.clone())
                .or_else(|| non_empty(env("AZURE_OPENAI_ENDPOINT")))
                .ok_or_else(|| {
                    OrchestratorError::Configuration(
                        "missing endpoint: set transport.endpoint or AZURE_OPENAI_ENDPOINT".to_string(),
                    )
                })?,
        };
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| OrchestratorError::Configuration(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OrchestratorError::Configuration(format!(
                "endpoint must be http(s): {endpoint}"
            )));
        }

        let mut base_url = endpoint.trim_end_matches('/').to_string();
        if self.flavor == TransportFlavor::Azure && !base_url.ends_with("/openai") {
            base_url.push_str("/openai");
        }
        if self.model.trim().is_empty() {
            return Err(OrchestratorError::Configuration("transport.model must not be empty".to_string()));
        }

        Ok(TransportSettings {
            flavor: self.flavor,
            base_url,
            api_key,
            api_version: self.api_version.clone(),
            model: self.model.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        })
    }
}

/// [run] 段：轮询与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    /// get_run / list_messages 失败后的重试次数
    pub status_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_wait_secs: 300,
            status_retries: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

impl RunSection {
    pub fn settings(&self) -> Result<RunSettings, OrchestratorError> {
        if self.poll_interval_ms == 0 {
            return Err(OrchestratorError::Configuration("run.poll_interval_ms must be > 0".to_string()));
        }
        if self.max_wait_secs == 0 {
            return Err(OrchestratorError::Configuration("run.max_wait_secs must be > 0".to_string()));
        }
        if self.max_backoff_ms < self.retry_backoff_ms {
            return Err(OrchestratorError::Configuration(
                "run.max_backoff_ms must be >= run.retry_backoff_ms".to_string(),
            ));
        }
        Ok(RunSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: Duration::from_secs(self.max_wait_secs),
            retry: RetryConfig {
                max_retries: self.status_retries,
                initial_backoff: Duration::from_millis(self.retry_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms),
            },
        })
    }
}

/// [tools] 段：工具超时与图像模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）；包含转发给其他 Agent 的整轮对话
    pub timeout_secs: u64,
    pub image_model: String,
    pub vision_model: String,
    pub analysis_max_tokens: u32,
}

impl Default for ToolsSection {
    fn default() -> Self {
        let models = ImageModels::default();
        Self {
            timeout_secs: 300,
            image_model: models.image_model,
            vision_model: models.vision_model,
            analysis_max_tokens: models.analysis_max_tokens,
        }
    }
}

impl ToolsSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn image_models(&self) -> ImageModels {
        ImageModels {
            image_model: self.image_model.clone(),
            vision_model: self.vision_model.clone(),
            analysis_max_tokens: self.analysis_max_tokens,
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 依次查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.transport.flavor, TransportFlavor::OpenAi);
        let run = cfg.run.settings().unwrap();
        assert_eq!(run, RunSettings::default());
        assert_eq!(cfg.tools.timeout(), Duration::from_secs(300));
        assert_eq!(cfg.tools.image_models().image_model, "dall-e-3");
    }

    #[test]
    fn test_openai_key_from_env() {
        let section = TransportSection::default();
        let settings = section
            .resolve_with(env_of(&[("OPENAI_API_KEY", "sk-env")]))
            .unwrap();
        assert_eq!(settings.api_key, "sk-env");
        assert_eq!(settings.base_url, OPENAI_BASE_URL);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = TransportSection::default().resolve_with(env_of(&[])).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(ref m) if m.contains("OPENAI_API_KEY")));
    }

    #[test]
    fn test_azure_endpoint_rules() {
        let section = TransportSection {
            flavor: TransportFlavor::Azure,
            ..TransportSection::default()
        };
        let err = section
            .resolve_with(env_of(&[("AZURE_OPENAI_API_KEY", "k")]))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(ref m) if m.contains("AZURE_OPENAI_ENDPOINT")));

        let settings = section
            .resolve_with(env_of(&[
                ("AZURE_OPENAI_API_KEY", "k"),
                ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com/"),
            ]))
            .unwrap();
        assert_eq!(settings.base_url, "https://res.openai.azure.com/openai");

        let bad = TransportSection {
            endpoint: Some("ftp://res".to_string()),
            ..section
        };
        assert!(bad.resolve_with(env_of(&[("AZURE_OPENAI_API_KEY", "k")])).is_err());
    }

    #[test]
    fn test_run_section_validation() {
        let zero = RunSection {
            poll_interval_ms: 0,
            ..RunSection::default()
        };
        assert!(zero.settings().is_err());

        let inverted = RunSection {
            retry_backoff_ms: 1000,
            max_backoff_ms: 10,
            ..RunSection::default()
        };
        assert!(inverted.settings().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[transport]\nflavor = \"azure\"\nmodel = \"gpt-4o-mini\"\n\n[run]\npoll_interval_ms = 250\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.transport.flavor, TransportFlavor::Azure);
        assert_eq!(cfg.transport.model, "gpt-4o-mini");
        assert_eq!(cfg.run.poll_interval_ms, 250);
        // 未写的键保持默认
        assert_eq!(cfg.run.max_wait_secs, 300);
        assert_eq!(cfg.transport.api_version, "2024-05-01-preview");
    }
}
