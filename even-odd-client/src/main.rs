use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use even_odd_client::{
    is_valid_room_id, ClientSettings, ExitReason, GameSession, Intent, SessionUpdate, Snapshot,
    TransportEvent,
};
use protocol::{WsConnector, SIZE};

/// 关闭握手的等待时间
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// even-odd - 奇偶棋终端客户端
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 6 位数字房间号
    room_id: String,

    /// 服务器地址（覆盖设置文件）
    #[arg(short, long)]
    server: Option<String>,

    /// 设置文件路径
    #[arg(long)]
    settings: Option<PathBuf>,

    /// 输出传输层调试日志
    #[arg(short, long)]
    debug: bool,
}

enum Action {
    Update(SessionUpdate),
    Input(Option<String>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => ClientSettings::load_from(path),
        None => ClientSettings::load(),
    };
    if args.debug {
        settings.network.debug = true;
    }

    // 初始化日志（输出到 stderr，stdout 留给棋盘）
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in settings.log_level.directives() {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if !is_valid_room_id(&args.room_id) {
        bail!("Room id must be 6 digits, got {:?}", args.room_id);
    }

    let server = args.server.unwrap_or_else(|| settings.server_url.clone());
    info!("奇偶棋客户端启动中...");

    let mut session = GameSession::new(
        WsConnector,
        settings.network.to_socket_config(),
        args.room_id.clone(),
    );
    session.mount(server);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let reason = loop {
        let action = tokio::select! {
            update = session.next_update() => Action::Update(update),
            line = lines.next_line(), if stdin_open => {
                Action::Input(line.context("Failed to read stdin")?)
            }
        };

        match action {
            Action::Update(SessionUpdate::Exit(reason)) => break reason,
            Action::Update(SessionUpdate::Changed(event)) => {
                if redraw_on(&event) {
                    render(&session.snapshot());
                }
            }
            Action::Input(None) => {
                stdin_open = false;
            }
            Action::Input(Some(line)) => {
                let line = line.trim();
                match line {
                    "" => {}
                    "quit" | "q" => {
                        drop(session);
                        tokio::time::sleep(SHUTDOWN_GRACE).await;
                        return Ok(());
                    }
                    "help" | "h" => print_help(),
                    "reconnect" => session.socket_mut().reconnect(),
                    "board" | "b" => render(&session.snapshot()),
                    _ => match parse_intent(line) {
                        Some(intent) => match session.dispatch(intent) {
                            Ok(Some(reason)) => break reason,
                            Ok(None) => {}
                            Err(e) => println!("! {}", e),
                        },
                        None => println!("! Unknown command: {}", line),
                    },
                }
            }
        }
    };

    // 等待关闭握手发出
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    println!("Session ended: {}", reason.code());
    if reason != ExitReason::Left {
        warn!("Room {} closed: {}", session.room_id(), reason);
        std::process::exit(2);
    }
    Ok(())
}

fn parse_intent(line: &str) -> Option<Intent> {
    let mut parts = line.split_whitespace();
    let intent = match parts.next()? {
        "ready" | "r" => Intent::Ready,
        "reset" => Intent::Reset,
        "leave" | "l" => Intent::Leave,
        "move" | "m" => Intent::Move(parts.next()?.parse().ok()?),
        _ => return None,
    };
    parts.next().is_none().then_some(intent)
}

/// 心跳等事件不需要重绘
fn redraw_on(event: &TransportEvent) -> bool {
    !matches!(
        event,
        TransportEvent::Message { event: None, .. } | TransportEvent::ReconnectScheduled { .. }
    )
}

fn print_help() {
    println!("Commands:");
    println!("  ready | r        ready up");
    println!("  move N | m N     play cell N (0-{})", SIZE * SIZE - 1);
    println!("  reset            request a new round");
    println!("  leave | l        leave the room");
    println!("  reconnect        retry the connection");
    println!("  board | b        redraw the board");
    println!("  quit | q         exit");
    println!();
}

fn render(snapshot: &Snapshot) {
    println!();
    for row in snapshot.board.cells().chunks(SIZE) {
        let cells: Vec<String> = row.iter().map(|value| format!("{:>3}", value)).collect();
        println!("  {}", cells.join(" "));
    }

    let you = snapshot
        .player_id
        .map(|slot| slot.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  [{:?}] you: {}  phase: {}  joined: odd={} even={}  ready: odd={} even={}",
        snapshot.connection_status,
        you,
        snapshot.phase,
        snapshot.joined.odd,
        snapshot.joined.even,
        snapshot.ready.odd,
        snapshot.ready.even,
    );
    if snapshot.retries > 0 {
        println!("  reconnecting (attempt {})", snapshot.retries);
    }
    if let Some(error) = &snapshot.error {
        println!("  error: {}", error);
    }
    if let Some(at) = snapshot.last_message_at {
        println!(
            "  last message: {}",
            at.with_timezone(&chrono::Local).format("%H:%M:%S")
        );
    }
    if let Some(winner) = snapshot.winner {
        println!("  result: {}", winner);
    }
    if !snapshot.notification.is_empty() {
        println!("  > {}", snapshot.notification);
    }
}
