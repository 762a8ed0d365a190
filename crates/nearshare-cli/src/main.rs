//! NearShare CLI
//!
//! 终端前端：通过 WiFi Direct（wpa_cli）或现有局域网与另一台设备互发文本和文件

mod console;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::{HELP, Input, event_json, parse_input, render_event, render_peers};
use nearshare_core::{
    AppSettings, Command, FileKind, Mode, Pairing, PeerDevice, Role, TransferError,
    TransferEvent, TransportSession, WpaCliPlatform, event_channel, open_session,
};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nearshare", version, about = "Point-to-point text and file sharing over Wi-Fi Direct")]
struct Cli {
    /// 每个事件输出一行 JSON
    #[arg(long, global = true)]
    json: bool,

    /// 设备名称（覆盖设置）
    #[arg(long, global = true)]
    name: Option<String>,

    /// 接收文件的保存目录（覆盖设置）
    #[arg(long, global = true)]
    download_dir: Option<PathBuf>,

    /// WiFi 接口（覆盖设置）
    #[arg(long, global = true)]
    interface: Option<String>,

    /// TCP 端口（覆盖设置）
    #[arg(long, global = true)]
    port: Option<u16>,

    /// 详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 接收模式：创建 P2P 组并等待发送端
    Receive,
    /// 发送模式：发现附近设备并选择一个连接
    Send,
    /// 跳过 WiFi Direct，在局域网上等待一个连接
    Listen,
    /// 跳过 WiFi Direct，直接连接到指定地址
    Dial {
        /// 对端 IP 地址
        ip: IpAddr,
    },
}

/// 当前可用于发送的连接
enum Link {
    Paired(Pairing),
    Direct(TransportSession),
}

impl Link {
    fn send_text(&self, text: String) -> Result<(), TransferError> {
        match self {
            Link::Paired(pairing) => pairing.send_text(text).map(drop),
            Link::Direct(session) => {
                drop(session.send_text(text));
                Ok(())
            }
        }
    }

    fn send_file(&self, kind: FileKind, path: PathBuf) -> Result<(), TransferError> {
        match self {
            Link::Paired(pairing) => pairing.send_file(kind, path).map(drop),
            Link::Direct(session) => {
                drop(session.send_file(kind, path));
                Ok(())
            }
        }
    }

    async fn command(&self, command: Command) -> Result<()> {
        match self {
            Link::Paired(pairing) => pairing.command(command).await,
            Link::Direct(_) => {
                eprintln!("Not available in direct mode");
                Ok(())
            }
        }
    }

    async fn shutdown(self) {
        match self {
            Link::Paired(pairing) => pairing.shutdown().await,
            Link::Direct(session) => {
                session.close();
                session.join().await;
            }
        }
    }
}

fn init_logging(verbose: bool) {
    // 桥接 log crate（nearshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if verbose {
        "debug"
    } else {
        "info,nearshare_core=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_settings(cli: &Cli) -> AppSettings {
    let mut settings = AppSettings::load();
    if let Some(name) = &cli.name {
        settings.device_name = name.clone();
    }
    if let Some(dir) = &cli.download_dir {
        settings.download_dir = dir.clone();
    }
    if let Some(interface) = &cli.interface {
        settings.wifi_interface = interface.clone();
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    settings.verbose |= cli.verbose;
    settings
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli);
    init_logging(settings.verbose);

    tracing::info!(
        "NearShare starting as '{}', saving to {:?}",
        settings.device_name,
        settings.download_dir
    );

    let (tx, rx) = event_channel();
    let link = match cli.command {
        Commands::Receive | Commands::Send => {
            let mode = if matches!(cli.command, Commands::Receive) {
                Mode::Host
            } else {
                Mode::Client
            };
            let platform = Arc::new(WpaCliPlatform::new(&settings.wifi_interface));
            let platform_events = platform.monitor();
            let pairing = Pairing::start(mode, platform, platform_events, settings, tx);
            pairing.command(Command::PermissionsGranted).await?;
            pairing.command(Command::Resume).await?;
            Link::Paired(pairing)
        }
        Commands::Listen => {
            println!("⏳ Waiting for a peer on port {}...", settings.port);
            let address = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
            Link::Direct(open_session(Role::Host, address, &settings, tx).await?)
        }
        Commands::Dial { ip } => {
            Link::Direct(open_session(Role::Client, ip, &settings, tx).await?)
        }
    };

    let direct = matches!(link, Link::Direct(_));
    let result = run(&link, rx, cli.json, direct).await;
    link.shutdown().await;
    result
}

/// 主循环：输出事件并处理标准输入
async fn run(
    link: &Link,
    mut events: nearshare_core::EventReceiver,
    json: bool,
    exit_on_disconnect: bool,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut peers: Vec<PeerDevice> = Vec::new();
    let mut stdin_open = true;

    if !json {
        println!("{}", HELP);
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let TransferEvent::PeerListUpdated { peers: list } = &event {
                    peers = list.clone();
                }
                if json {
                    println!("{}", event_json(&event)?);
                } else {
                    println!("{}", render_event(&event));
                }
                if exit_on_disconnect && event == TransferEvent::Disconnected {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    continue;
                };
                if !handle_input(link, parse_input(&line), &peers).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// 返回 false 表示退出
async fn handle_input(link: &Link, input: Input, peers: &[PeerDevice]) -> Result<bool> {
    match input {
        Input::Text(text) => report(link.send_text(text)),
        Input::SendFile(kind, path) => report(link.send_file(kind, path)),
        Input::Connect(n) => match peers.get(n - 1) {
            Some(peer) => {
                println!("🔗 Connecting to {}...", peer.display_name);
                link.command(Command::SelectPeer(peer.address.clone())).await?;
            }
            None => eprintln!("No device [{}]", n),
        },
        Input::Retry => link.command(Command::Retry).await?,
        Input::Cancel => link.command(Command::CancelSelection).await?,
        Input::Peers => println!("{}", render_peers(peers)),
        Input::Help => println!("{}", HELP),
        Input::Quit => return Ok(false),
        Input::Empty => {}
        Input::Invalid(reason) => eprintln!("{}", reason),
    }
    Ok(true)
}

fn report(result: Result<(), TransferError>) {
    if let Err(e) = result {
        eprintln!("❌ {}", e);
    }
}
