//! 运行配置
//!
//! 默认 shell、工作目录、终端尺寸以及缓冲区和终止策略等参数。
//! 默认值可通过 `REMOTE_SHELL_*` 环境变量覆盖；会话核心本身不读取环境变量，
//! 只接收解析后的 [`ShellConfig`]。

use ::config::{Config, ConfigError, Environment};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::rpc::types::{BackendKind, CreateSessionRequest, TermSize};
use crate::shell::detect::{default_shell_args, detect_default_shell};
use crate::utils::error::TerminalError;

/// 输出缓冲区容量上限（1 MiB）
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;
/// 推送路径轮询间隔
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_millis(20);
/// 优雅终止等待时间
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_millis(100);
/// 环境变量前缀
pub const ENV_PREFIX: &str = "REMOTE_SHELL";

/// 原生连接实现的选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// 按平台检测：Unix 使用伪终端，其他平台使用管道
    Auto,
    /// 强制伪终端
    Pty,
    /// 强制重定向管道
    Pipe,
}

impl BackendPreference {
    /// 解析为具体实现
    pub fn resolve(self) -> BackendKind {
        match self {
            BackendPreference::Auto => {
                if cfg!(unix) {
                    BackendKind::Pty
                } else {
                    BackendKind::Pipe
                }
            }
            BackendPreference::Pty => BackendKind::Pty,
            BackendPreference::Pipe => BackendKind::Pipe,
        }
    }
}

/// 单次创建会话使用的 shell 配置
#[derive(Debug, Clone, PartialEq)]
pub struct ShellConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub size: TermSize,
}

impl ShellConfig {
    /// 使用指定 shell 和默认尺寸创建配置
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            size: TermSize::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_size(mut self, size: TermSize) -> Self {
        self.size = size;
        self
    }
}

/// 全局运行配置
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub default_shell: String,
    pub default_args: Vec<String>,
    pub default_cwd: Option<PathBuf>,
    pub default_size: TermSize,
    pub backend: BackendPreference,
    pub push_interval: Duration,
    pub buffer_capacity: usize,
    pub terminate_grace: Duration,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_shell: detect_default_shell(),
            default_args: default_shell_args(),
            default_cwd: dirs::home_dir(),
            default_size: TermSize::default(),
            backend: BackendPreference::Auto,
            push_interval: DEFAULT_PUSH_INTERVAL,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

/// 可由 `REMOTE_SHELL_<KEY>` 覆盖的配置项
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnvOverrides {
    shell: Option<String>,
    args: Option<String>,
    cwd: Option<PathBuf>,
    backend: Option<BackendPreference>,
    push_interval_ms: Option<u64>,
    buffer_capacity: Option<usize>,
    terminate_grace_ms: Option<u64>,
}

impl EnvOverrides {
    /// 整体反序列化；有无效值时逐项加载，跳过无效项
    fn load(source: Environment) -> Self {
        let settings = match Config::builder().add_source(source).build() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("读取环境变量配置失败，使用默认值: {}", e);
                return Self::default();
            }
        };

        match settings.clone().try_deserialize() {
            Ok(overrides) => overrides,
            Err(e) => {
                tracing::debug!("环境变量配置整体解析失败，逐项加载: {}", e);
                Self {
                    shell: setting(&settings, "shell"),
                    args: setting(&settings, "args"),
                    cwd: setting(&settings, "cwd"),
                    backend: setting(&settings, "backend"),
                    push_interval_ms: setting(&settings, "push_interval_ms"),
                    buffer_capacity: setting(&settings, "buffer_capacity"),
                    terminate_grace_ms: setting(&settings, "terminate_grace_ms"),
                }
            }
        }
    }
}

fn setting<T: DeserializeOwned>(settings: &Config, key: &str) -> Option<T> {
    match settings.get::<T>(key) {
        Ok(value) => Some(value),
        Err(ConfigError::NotFound(_)) => None,
        Err(e) => {
            tracing::warn!(
                "忽略无效的 {}_{}: {}",
                ENV_PREFIX,
                key.to_ascii_uppercase(),
                e
            );
            None
        }
    }
}

/// `REMOTE_SHELL_*` 环境变量来源
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl TerminalConfig {
    /// 从进程环境变量加载配置，无效值记录警告并使用默认值
    pub fn from_env() -> Self {
        Self::from_source(env_source())
    }

    fn from_source(source: Environment) -> Self {
        let overrides = EnvOverrides::load(source);
        let mut config = Self::default();

        if let Some(shell) = overrides.shell.filter(|s| !s.trim().is_empty()) {
            config.default_shell = shell;
            config.default_args = Vec::new();
        }
        if let Some(args) = overrides.args {
            config.default_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(cwd) = overrides.cwd.filter(|p| !p.as_os_str().is_empty()) {
            config.default_cwd = Some(cwd);
        }
        if let Some(backend) = overrides.backend {
            config.backend = backend;
        }
        if let Some(ms) = overrides.push_interval_ms {
            config.push_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(capacity) = overrides.buffer_capacity.filter(|c| *c > 0) {
            config.buffer_capacity = capacity;
        }
        if let Some(ms) = overrides.terminate_grace_ms {
            config.terminate_grace = Duration::from_millis(ms);
        }

        config
    }

    /// 将创建请求与默认值合并为 shell 配置
    pub fn resolve(&self, request: CreateSessionRequest) -> Result<ShellConfig, TerminalError> {
        let size = TermSize::new(
            request.rows.unwrap_or(self.default_size.rows),
            request.cols.unwrap_or(self.default_size.cols),
        )?;

        let (shell, args) = match request.shell {
            Some(shell) if !shell.trim().is_empty() => (shell, request.args.unwrap_or_default()),
            _ => (
                self.default_shell.clone(),
                request.args.unwrap_or_else(|| self.default_args.clone()),
            ),
        };

        Ok(ShellConfig {
            shell,
            args,
            cwd: request.cwd.map(PathBuf::from).or_else(|| self.default_cwd.clone()),
            env: request.env.unwrap_or_default(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> TerminalConfig {
        let vars: ::config::Map<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TerminalConfig::from_source(env_source().source(Some(vars)))
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert!(!config.default_shell.is_empty());
        assert_eq!(config.buffer_capacity, 1024 * 1024);
        assert_eq!(config.terminate_grace, Duration::from_millis(100));
        assert_eq!(config.default_size, TermSize::default());
        assert_eq!(config.backend, BackendPreference::Auto);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("REMOTE_SHELL_SHELL", "/bin/sh"),
            ("REMOTE_SHELL_ARGS", "-i  -l"),
            ("REMOTE_SHELL_CWD", "/tmp"),
            ("REMOTE_SHELL_BACKEND", "pipe"),
            ("REMOTE_SHELL_PUSH_INTERVAL_MS", "50"),
            ("REMOTE_SHELL_BUFFER_CAPACITY", "4096"),
            ("REMOTE_SHELL_TERMINATE_GRACE_MS", "250"),
        ]);

        assert_eq!(config.default_shell, "/bin/sh");
        assert_eq!(config.default_args, vec!["-i", "-l"]);
        assert_eq!(config.default_cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.backend, BackendPreference::Pipe);
        assert_eq!(config.push_interval, Duration::from_millis(50));
        assert_eq!(config.buffer_capacity, 4096);
        assert_eq!(config.terminate_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_env_values_fall_back() {
        let config = config_from(&[
            ("REMOTE_SHELL_BACKEND", "teletype"),
            ("REMOTE_SHELL_BUFFER_CAPACITY", "lots"),
            ("REMOTE_SHELL_PUSH_INTERVAL_MS", "-1"),
        ]);
        assert_eq!(config.backend, BackendPreference::Auto);
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.push_interval, DEFAULT_PUSH_INTERVAL);
    }

    #[test]
    fn test_invalid_value_keeps_other_overrides() {
        let config = config_from(&[
            ("REMOTE_SHELL_SHELL", "/bin/sh"),
            ("REMOTE_SHELL_BACKEND", "teletype"),
            ("REMOTE_SHELL_TERMINATE_GRACE_MS", "250"),
        ]);
        assert_eq!(config.default_shell, "/bin/sh");
        assert_eq!(config.backend, BackendPreference::Auto);
        assert_eq!(config.terminate_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_unprefixed_variables_are_ignored() {
        let config = config_from(&[
            ("SHELL", "/definitely/not/used"),
            ("BUFFER_CAPACITY", "16"),
            ("REMOTE_SHELLX_BACKEND", "pipe"),
        ]);
        assert_ne!(config.default_shell, "/definitely/not/used");
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.backend, BackendPreference::Auto);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = config_from(&[
            ("REMOTE_SHELL_BUFFER_CAPACITY", "0"),
            ("REMOTE_SHELL_PUSH_INTERVAL_MS", "0"),
        ]);
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.push_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_backend_resolution() {
        assert_eq!(BackendPreference::Pipe.resolve(), BackendKind::Pipe);
        assert_eq!(BackendPreference::Pty.resolve(), BackendKind::Pty);
        #[cfg(unix)]
        assert_eq!(BackendPreference::Auto.resolve(), BackendKind::Pty);
        #[cfg(not(unix))]
        assert_eq!(BackendPreference::Auto.resolve(), BackendKind::Pipe);
    }

    #[test]
    fn test_resolve_uses_defaults() {
        let config = config_from(&[
            ("REMOTE_SHELL_SHELL", "/bin/sh"),
            ("REMOTE_SHELL_CWD", "/tmp"),
        ]);
        let shell = config.resolve(CreateSessionRequest::default()).unwrap();
        assert_eq!(shell.shell, "/bin/sh");
        assert!(shell.args.is_empty());
        assert_eq!(shell.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(shell.size, TermSize::default());
    }

    #[test]
    fn test_resolve_request_overrides() {
        let config = TerminalConfig::default();
        let request = CreateSessionRequest {
            shell: Some("/bin/bash".to_string()),
            args: Some(vec!["--noprofile".to_string()]),
            cwd: Some("/var".to_string()),
            env: Some(HashMap::from([("FOO".to_string(), "bar".to_string())])),
            rows: Some(50),
            cols: Some(132),
        };
        let shell = config.resolve(request).unwrap();
        assert_eq!(shell.shell, "/bin/bash");
        assert_eq!(shell.args, vec!["--noprofile"]);
        assert_eq!(shell.cwd, Some(PathBuf::from("/var")));
        assert_eq!(shell.env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(shell.size, TermSize { rows: 50, cols: 132 });
    }

    #[test]
    fn test_resolve_rejects_zero_size() {
        let config = TerminalConfig::default();
        let request = CreateSessionRequest {
            rows: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.resolve(request),
            Err(TerminalError::InvalidRequest(_))
        ));
    }
}
