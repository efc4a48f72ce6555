//! 进程监管：命令、提权、句柄、退出码策略

pub mod command;
pub mod elevation;
pub mod handle;
pub mod policy;
pub mod supervisor;

pub use command::{split_command_line, CommandSpec};
pub use elevation::{apply_elevation, Elevation, ElevationContext};
pub use handle::{OsProcess, ProcessExit, ProcessHandle};
pub use policy::{ExitCodePolicy, DEFAULT_SUCCESS_CODES};
pub use supervisor::{ProcessOutcome, ProcessSupervisor};
