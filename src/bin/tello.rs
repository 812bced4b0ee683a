// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// Tello 指令客户端
///
/// 单条指令: `tello takeoff` / `tello flip f` / `tello battery?`
/// 交互模式: 不带参数, 从标准输入逐行读取SDK指令, 空行或 `quit` 退出
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::error;

use traffic_monitor::drone::{TelloClient, TelloCommand, TelloReply};
use traffic_monitor::logging::init_logger;
use traffic_monitor::MonitorConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tello 无人机指令客户端", long_about = None)]
struct Args {
    /// 配置文件 (可选, 只读)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 无人机地址
    #[arg(long)]
    address: Option<String>,

    /// 应答超时 (毫秒)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// 调试日志
    #[arg(short, long)]
    verbose: bool,

    /// SDK 指令, 例如 `rc 0 20 0 0`
    command: Vec<String>,
}

fn parse(text: &str) -> Result<TelloCommand> {
    TelloCommand::parse(text).ok_or_else(|| anyhow!("unknown Tello command: {}", text))
}

/// 单条指令前先进入SDK模式
fn one_shot(text: &str) -> Result<Vec<TelloCommand>> {
    let command = parse(text)?;
    if command == TelloCommand::Command {
        return Ok(vec![command]);
    }
    Ok(vec![TelloCommand::Command, command])
}

fn execute(client: &mut TelloClient, command: &TelloCommand) -> Result<()> {
    match client.send(command)? {
        TelloReply::Ok => println!("ok"),
        TelloReply::Value(v) => println!("{}", v),
        TelloReply::NoReply => {}
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose, false);

    let mut config = match &args.config {
        Some(path) => serde_json::from_str::<MonitorConfig>(&std::fs::read_to_string(path)?)?,
        None => MonitorConfig::default(),
    }
    .drone;
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(timeout) = args.timeout_ms {
        config.timeout_ms = timeout;
    }

    let mut client = TelloClient::connect(&config)?;

    if !args.command.is_empty() {
        for command in one_shot(&args.command.join(" "))? {
            execute(&mut client, &command)?;
        }
        client.shutdown();
        return Ok(());
    }

    // 交互模式先进入SDK模式
    execute(&mut client, &TelloCommand::Command)?;
    let stdin = std::io::stdin();
    loop {
        print!("tello> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() || line == "quit" {
            break;
        }
        if let Err(e) = parse(line).and_then(|command| execute(&mut client, &command)) {
            error!("❌ {}", e);
        }
    }
    client.shutdown();
    Ok(())
}
