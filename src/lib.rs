pub mod config;
pub mod diagnostic;
pub mod layout;
pub mod lower;
pub mod sim;
pub mod sir;
pub mod span;
pub mod types;

// Re-exports for the driver entry points
pub use config::TargetConfig;
pub use diagnostic::Diagnostic;
pub use lower::{lower_ops, lower_ops_with, AxisMap, HlOp, LowerError, LoweredModule, MemOp};
