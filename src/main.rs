//! DeskPilot - 对话式桌面助手
//!
//! 入口：加载配置、初始化日志、创建 Agent 编排器，并运行行式 REPL。
//! Ctrl+C 中止进行中的一轮，`/quit` 退出。

use std::io::Write;

use anyhow::Context;
use deskpilot::config::{load_config, AppConfig};
use deskpilot::core::{create_agent_from_config, Command};
use tokio::io::{AsyncBufReadExt, BufReader};

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(Into::into);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        AppConfig::default()
    });
    deskpilot::observability::init(&cfg.app.log_level);

    let (cmd_tx, _state_rx, mut reply_rx) =
        create_agent_from_config(&cfg).context("Failed to create agent")?;

    let cancel_tx = cmd_tx.clone();
    let interrupts = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel_tx.send(Command::Cancel).is_err() {
                break;
            }
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            println!("{}\n", reply.text);
            prompt();
        }
    });

    let name = cfg.app.name.as_deref().unwrap_or("DeskPilot");
    println!("{name} ready. Type a request, Ctrl+C to stop a running turn, /quit to exit.");
    prompt();

    // EOF 时处理完已提交的消息再退出；/quit 立即中止
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            prompt();
            continue;
        }
        if line == "/quit" || line == "/exit" {
            let _ = cmd_tx.send(Command::Quit);
            break;
        }
        if cmd_tx.send(Command::Submit(line.to_string())).is_err() {
            break;
        }
    }

    interrupts.abort();
    drop(cmd_tx);
    let _ = printer.await;
    Ok(())
}
