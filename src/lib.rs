//! DeskPilot - 对话式桌面助手的决策与记忆核心
//!
//! 模块划分：
//! - **agent**: 无头 Assistant 运行时（一轮：消解 -> 决策 -> 分发 -> 写回记忆）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话监管、状态投影、主控循环
//! - **decision**: Decision Engine、prompt 拼装、输出解析
//! - **llm**: 推理服务客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: Context Store（Turn / Artifact / 用户习惯）与快照持久化
//! - **resolver**: 指代消解
//! - **tools**: 动作目录、分发、沙箱、文件处理器、桌面自动化

pub mod agent;
pub mod config;
pub mod core;
pub mod decision;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod resolver;
pub mod tools;

pub use agent::{Assistant, TurnReply};
