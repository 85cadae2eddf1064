//! 动作层：目录、分发、沙箱、文件处理器、桌面自动化

pub mod automation;
pub mod catalog;
mod code_scan;
pub mod dispatch;
pub mod file_handler;
pub mod sandbox;

pub use automation::{
    AutomationProvider, AutomationReport, HeadlessAutomation, InputOp, LauncherAutomation,
    WindowOp,
};
pub use catalog::{
    ActionCatalog, ActionRequest, ActionSpec, ClearHistoryParams, WindowOpName, CATALOG_VERSION,
};
pub use dispatch::{ActionDispatch, ActionOutcome};
pub use file_handler::{CreatedFile, FileHandler, LocalFileHandler};
pub use sandbox::{SandboxConfig, SandboxExecutor, SandboxResult, SandboxStatus};
