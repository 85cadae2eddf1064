//! Agent 编排器：主控循环
//!
//! 负责：加载配置、创建 LLM 与 Assistant、建立 cmd / state / reply 三通道，
//! 并在后台任务中消费前端命令（Submit / Cancel / Quit）。一轮进行中到达的 Submit 排队，按到达顺序处理。

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::sync::{mpsc, watch};

use crate::agent::{Assistant, TurnReply};
use crate::config::{load_config, AppConfig};
use crate::core::{AgentPhase, SessionState};
use crate::llm::create_llm_from_config;

/// 从前端发往编排器的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 提交用户输入
    Submit(String),
    /// 中止进行中的一轮（Ctrl+C）
    Cancel,
    /// 中止进行中的一轮、丢弃排队消息并退出
    Quit,
}

pub type AgentChannels = (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<SessionState>,
    mpsc::UnboundedReceiver<TurnReply>,
);

/// 加载配置并创建 Agent 运行时；配置加载失败时使用默认值
pub async fn create_agent(config_path: Option<PathBuf>) -> anyhow::Result<AgentChannels> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    create_agent_from_config(&cfg)
}

pub fn create_agent_from_config(cfg: &AppConfig) -> anyhow::Result<AgentChannels> {
    let llm = create_llm_from_config(cfg);
    let assistant = Assistant::from_config(cfg, llm)?;
    Ok(spawn_agent(assistant))
}

/// 在后台任务中驱动 Assistant；返回命令发送端、状态接收端、回复接收端
pub fn spawn_agent(assistant: Assistant) -> AgentChannels {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(SessionState::default());
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<TurnReply>();

    tokio::spawn(async move {
        let supervisor = assistant.supervisor();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut quitting = false;
        // 发送端全部关闭：处理完已排队的消息后退出
        let mut closed = false;
        let mut last_turn = None;

        loop {
            let input = match queue.pop_front() {
                Some(input) => input,
                None if quitting || closed => break,
                None => match cmd_rx.recv().await {
                    Some(Command::Submit(input)) => input,
                    Some(Command::Cancel) => continue,
                    Some(Command::Quit) | None => break,
                },
            };

            let _ = state_tx.send(SessionState {
                phase: AgentPhase::Thinking,
                queued: queue.len(),
                last_turn,
            });

            let turn = assistant.process_message(&input);
            tokio::pin!(turn);
            let reply = loop {
                tokio::select! {
                    reply = &mut turn => break reply,
                    cmd = cmd_rx.recv(), if !quitting && !closed => match cmd {
                        Some(Command::Submit(next)) => {
                            queue.push_back(next);
                            let _ = state_tx.send(SessionState {
                                phase: AgentPhase::Thinking,
                                queued: queue.len(),
                                last_turn,
                            });
                        }
                        Some(Command::Cancel) => {
                            supervisor.cancel_current();
                        }
                        Some(Command::Quit) => {
                            quitting = true;
                            queue.clear();
                            supervisor.cancel_current();
                        }
                        None => closed = true,
                    },
                }
            };

            if reply.turn_id.is_some() {
                last_turn = reply.turn_id;
            }
            let phase = if reply.awaiting_confirmation {
                AgentPhase::AwaitingConfirmation
            } else {
                AgentPhase::Idle
            };
            let _ = state_tx.send(SessionState {
                phase,
                queued: queue.len(),
                last_turn,
            });
            if reply_tx.send(reply).is_err() {
                break;
            }
        }

        supervisor.shutdown();
        let _ = state_tx.send(SessionState {
            phase: AgentPhase::ShuttingDown,
            queued: 0,
            last_turn,
        });
        tracing::info!("agent loop stopped");
    });

    (cmd_tx, state_rx, reply_rx)
}
