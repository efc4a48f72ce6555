//! 核心：错误分类、运行上下文、清理注册表、关机协调

pub mod builder;
pub mod cleanup;
pub mod context;
pub mod error;
pub mod shutdown;

pub use builder::{create_context_builder, RunContextBuilder};
pub use cleanup::CleanupRegistry;
pub use context::RunContext;
pub use error::{ErrorReason, VcError};
pub use shutdown::{ShutdownManager, ShutdownReason};
