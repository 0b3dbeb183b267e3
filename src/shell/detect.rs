//! Shell 检测
//!
//! 检测系统默认 shell 及其启动参数。

use std::env;

/// 检测系统默认 shell
pub fn detect_default_shell() -> String {
    #[cfg(unix)]
    {
        // Unix: 使用 SHELL 环境变量
        env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    #[cfg(windows)]
    {
        // Windows: 使用 COMSPEC 环境变量
        env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
}

/// 默认 shell 的启动参数
pub fn default_shell_args() -> Vec<String> {
    shell_args_for(&detect_default_shell())
}

/// 指定 shell 的推荐启动参数
pub fn shell_args_for(shell_path: &str) -> Vec<String> {
    match get_shell_name(shell_path).to_ascii_lowercase().as_str() {
        "powershell.exe" | "powershell" | "pwsh.exe" | "pwsh" => vec!["-NoLogo".to_string()],
        _ => Vec::new(),
    }
}

/// 获取 shell 名称
pub fn get_shell_name(shell_path: &str) -> &str {
    std::path::Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("shell")
}
