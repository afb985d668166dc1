//! MTA CLI
//!
//! - `demo`: 在本机用 loopback 驱动跑一次完整的发送 → 接收
//! - `decode`: 解析并打印一条握手消息

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mta_core::{EngineConfig, Payload, SendRequest, TransferTask, codec};
use mta_transport::{
    LoopbackNetwork, LoopbackRadio, ReceiveOptions, ReceiveOutcome, ReceiveProgressCallback,
    Receiver, SendOptions, SendProgressCallback, Sender, describe_paths,
};
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mta", version, about = "互传联盟 (MTA) 协议工具")]
struct Cli {
    /// 引擎配置文件 (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 在本机回环上完成一次传输
    Demo {
        /// 要发送的文件
        files: Vec<PathBuf>,
        /// 发送一段文本而不是文件
        #[arg(short, long, conflicts_with = "files")]
        text: Option<String>,
        /// 保存目录 (默认: ~/Downloads)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 关闭会话加密
        #[arg(long)]
        plain: bool,
        /// 接收前询问确认
        #[arg(long)]
        manual: bool,
    },
    /// 解析一条握手消息，例如 `action:0:versionNegotiation?{"version":1}`
    Decode { frame: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（mta-core / mta-transport 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mta_core=debug,mta_transport=debug")),
        )
        .try_init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Demo {
            files,
            text,
            output,
            plain,
            manual,
        } => demo(config, files, text, output, plain, manual).await,
        Commands::Decode { frame } => decode(&frame),
    }
}

async fn demo(
    mut config: EngineConfig,
    files: Vec<PathBuf>,
    text: Option<String>,
    output: Option<PathBuf>,
    plain: bool,
    manual: bool,
) -> Result<()> {
    if plain {
        config.encryption = false;
    }

    tracing::info!(
        "Loopback demo: encryption {}, auto accept {}",
        config.encryption,
        !manual
    );

    let task = match text {
        Some(text) => TransferTask::text(text),
        None if files.is_empty() => bail!("nothing to send: pass files or --text"),
        None => TransferTask::new(describe_paths(&files).await?),
    };

    let output_dir = output
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    println!("📁 保存到: {}", output_dir.display());

    let sender = Sender::new(
        config.clone(),
        SendOptions {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..SendOptions::default()
        },
    );
    let receiver = Receiver::new(
        EngineConfig {
            auto_accept: !manual,
            ..config
        },
        ReceiveOptions {
            output_dir,
            ..ReceiveOptions::default()
        },
    );

    let radio = LoopbackRadio::new();
    let network = LoopbackNetwork::new();

    let (sent, received) = tokio::join!(
        sender.send(task, &radio, &network, &ConsoleSendCallback),
        receiver.receive(&radio, &network, &ConsoleReceiveCallback),
    );

    let task_id = sent?;
    let outcome = received?;
    log::debug!("Demo finished for task {}", task_id);
    println!("✅ 任务 {} 完成 ({} 个文件)", outcome.task_id, outcome.files.len());
    Ok(())
}

fn decode(frame: &str) -> Result<()> {
    let message = codec::decode(frame.as_bytes())?;
    println!("kind:     {}", message.kind);
    println!("sequence: {}", message.sequence);
    println!("action:   {} ({})", message.action, message.action.code());
    match &message.payload {
        Payload::Empty => println!("payload:  (none)"),
        Payload::Json(value) => println!("payload:\n{}", serde_json::to_string_pretty(value)?),
        Payload::Sealed(data) => println!("payload:  sealed, {} bytes", data.len()),
    }
    Ok(())
}

struct ConsoleSendCallback;

impl SendProgressCallback for ConsoleSendCallback {
    fn on_status(&self, status: &str) {
        println!("📤 {}", status);
    }

    fn on_progress(&self, sent: u64, total: u64) {
        println!("📤 {}/{} bytes", sent, total);
    }

    fn on_complete(&self, task_id: &str) {
        println!("📤 任务 {} 已送达", task_id);
    }

    fn on_error(&self, error: &str) {
        eprintln!("📤 发送失败: {}", error);
    }
}

struct ConsoleReceiveCallback;

/// 回调在 tokio worker 上执行，阻塞读取交给 `block_in_place`，
/// 同一运行时上的发送端不会因此停住
fn confirm(input: impl BufRead) -> bool {
    tokio::task::block_in_place(|| read_answer(input))
}

fn read_answer(mut input: impl BufRead) -> bool {
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

impl ReceiveProgressCallback for ConsoleReceiveCallback {
    fn on_status(&self, status: &str) {
        println!("📥 {}", status);
    }

    fn on_request(&self, request: &SendRequest) -> bool {
        print!(
            "📥 {} 想发送 {} 个文件 ({} bytes)，接受? [y/N] ",
            request.sender_name, request.file_count, request.total_size
        );
        let _ = io::stdout().flush();

        confirm(io::stdin().lock())
    }

    fn on_text(&self, text: &str) {
        println!("📥 文本: {}", text);
    }

    fn on_progress(&self, received: u64, total: u64) {
        println!("📥 {}/{} bytes", received, total);
    }

    fn on_complete(&self, outcome: &ReceiveOutcome) {
        for file in &outcome.files {
            println!("📥 {} → {}", file.name, file.path.display());
        }
    }

    fn on_error(&self, error: &str) {
        eprintln!("📥 接收失败: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[test]
    fn test_read_answer() {
        assert!(read_answer(Cursor::new("y\n")));
        assert!(read_answer(Cursor::new("yes\n")));
        assert!(!read_answer(Cursor::new("n\n")));
        assert!(!read_answer(Cursor::new("")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_confirm_keeps_runtime_running() {
        let (tx, rx) = std::sync::mpsc::channel::<&'static str>();

        // 唯一的 worker 阻塞在确认上，另一个任务仍需被调度才能提供输入
        let prompt = tokio::spawn(async move { confirm(ChannelInput(rx, Vec::new())) });
        let other = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send("y\n").unwrap();
        });

        let accepted = tokio::time::timeout(Duration::from_secs(5), prompt)
            .await
            .unwrap()
            .unwrap();
        assert!(accepted);
        other.await.unwrap();
    }

    /// 逐行从 channel 读取的阻塞输入
    struct ChannelInput(std::sync::mpsc::Receiver<&'static str>, Vec<u8>);

    impl io::Read for ChannelInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let data = self.fill_buf()?;
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            self.consume(n);
            Ok(n)
        }
    }

    impl BufRead for ChannelInput {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            if self.1.is_empty() {
                if let Ok(line) = self.0.recv() {
                    self.1 = line.as_bytes().to_vec();
                }
            }
            Ok(&self.1)
        }

        fn consume(&mut self, amt: usize) {
            self.1.drain(..amt);
        }
    }
}
