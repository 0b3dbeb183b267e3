//! 终端会话模块
//!
//! 负责原生连接（伪终端或管道）的创建、会话管理以及拉取 / 推送两种访问路径。

pub mod buffer;
pub mod connection;
#[cfg(unix)]
pub mod local;
pub mod output;
pub mod pipe;
pub mod push;
pub mod registry;
pub mod session;
pub mod terminate;

pub use buffer::OutputBuffer;
pub use connection::{open_connection, PtyConnection, ReadChunk};
#[cfg(unix)]
pub use local::LocalPty;
pub use output::{start_output_reader, OutputReaderHandle};
pub use pipe::PipeProcess;
pub use push::{OutputSink, PushConnection};
pub use registry::SessionRegistry;
pub use session::{SessionOptions, TerminalSession};
pub use terminate::{terminate, Terminable, TerminationReport, TerminationStep};
