//! Shell 集成模块
//!
//! 负责默认 Shell 及其启动参数的检测。

pub mod detect;

pub use detect::{default_shell_args, detect_default_shell, get_shell_name};
