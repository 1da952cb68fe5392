use anyhow::Result;
use bluechat::transport::{
    enable_radio, PeerScanner, RfcommConfig, RfcommTransport, ScanConfig, TcpConfig, TcpTransport,
    DEFAULT_RFCOMM_CHANNEL,
};
use bluechat::{
    ConnectionConfig, ConnectionManager, ConnectionState, Notification, TransportConfig,
    TransportMode,
};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Chat with one nearby device over a Bluetooth RFCOMM link
#[derive(Parser, Debug)]
#[command(name = "bluechat", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Simulate the radio over TCP, listening on this address
    #[arg(long, value_name = "LISTEN_ADDR")]
    tcp: Option<String>,

    /// RFCOMM channel shared by both peers
    #[arg(long, default_value_t = DEFAULT_RFCOMM_CHANNEL)]
    channel: u8,

    /// Make this adapter discoverable while listening
    #[arg(long)]
    discoverable: bool,

    /// Dial this peer right after starting
    #[arg(long, value_name = "ADDRESS")]
    connect: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List paired and nearby devices to chat with
    Scan {
        /// How long to scan for
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

impl Cli {
    fn transport_config(&self) -> TransportConfig {
        let rfcomm = RfcommConfig {
            channel: self.channel,
            discoverable: self.discoverable,
            ..Default::default()
        };
        match &self.tcp {
            Some(listen_addr) => TransportConfig {
                mode: TransportMode::TcpSimulation,
                rfcomm,
                tcp: TcpConfig {
                    listen_addr: listen_addr.clone(),
                },
            },
            None => TransportConfig {
                mode: TransportMode::Rfcomm,
                rfcomm,
                tcp: TcpConfig::default(),
            },
        }
    }
}

/// One line typed by the user
#[derive(Debug, PartialEq, Eq)]
enum Input {
    /// `/connect ADDR`; no address means the user declined to pick one
    Connect(Option<String>),
    State,
    Quit,
    Message(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let mut words = line.split_whitespace();
    match words.next() {
        Some("/connect") => Input::Connect(words.next().map(str::to_string)),
        Some("/state") => Input::State,
        Some("/quit") => Input::Quit,
        _ => Input::Message(line.to_string()),
    }
}

fn title(state: ConnectionState, peer_name: Option<&str>) -> String {
    match (state, peer_name) {
        (ConnectionState::Connected, Some(name)) => format!("connected to {}", name),
        (ConnectionState::Connected, None) => "connected".into(),
        (ConnectionState::Connecting, _) => "connecting...".into(),
        (ConnectionState::Listening | ConnectionState::None, _) => "not connected".into(),
    }
}

/// Render a notification the way the chat window shows it
fn render(notification: Notification, peer_name: &mut Option<String>) -> String {
    match notification {
        Notification::StateChanged(state) => {
            if state != ConnectionState::Connected {
                *peer_name = None;
            }
            format!("-- {} --", title(state, peer_name.as_deref()))
        }
        Notification::PeerKnown { name } => {
            let line = format!("Connected to {}", name);
            *peer_name = Some(name);
            line
        }
        Notification::DataReceived { data, peer } => {
            format!("{}:  {}", peer.name, String::from_utf8_lossy(&data))
        }
        Notification::DataSent { data } => format!("Me:  {}", String::from_utf8_lossy(&data)),
        Notification::Failure { message } => format!("!! {}", message),
    }
}

async fn scan(seconds: u64) -> Result<()> {
    let adapter = enable_radio().await?;
    let scanner = PeerScanner::new(ScanConfig {
        scan_duration: Duration::from_secs(seconds),
        ..Default::default()
    });
    info!("Scanning for {}s on {}", seconds, adapter.name());

    for peer in scanner.scan(&adapter).await? {
        println!(
            "{}  {:<24} {:>5} {}",
            peer.address,
            peer.name.as_deref().unwrap_or("(unknown)"),
            peer.rssi.map(|r| r.to_string()).unwrap_or_default(),
            if peer.paired { "paired" } else { "" }
        );
    }
    Ok(())
}

async fn build_manager(
    transport: TransportConfig,
) -> Result<(ConnectionManager, mpsc::UnboundedReceiver<Notification>)> {
    let config = ConnectionConfig::default();
    let pair = match transport.mode {
        TransportMode::TcpSimulation => {
            info!("  TCP simulation on {}", transport.tcp.listen_addr);
            ConnectionManager::with_channel(TcpTransport::new(transport.tcp), config)
        }
        TransportMode::Rfcomm => {
            // The manager assumes the radio is already on
            let adapter = enable_radio().await?;
            info!("  Bluetooth adapter {}", adapter.name());
            ConnectionManager::with_channel(RfcommTransport::new(adapter, transport.rfcomm), config)
        }
    };
    Ok(pair)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    if let Some(Command::Scan { seconds }) = cli.command {
        return scan(seconds).await;
    }

    info!("BlueChat starting");
    let (manager, mut events) = build_manager(cli.transport_config()).await?;
    manager.start().await?;
    if let Some(address) = &cli.connect {
        manager.connect(address).await?;
    }

    let mut peer_name = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(notification) = events.recv() => {
                println!("{}", render(notification, &mut peer_name));
            }
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match parse_input(&line) {
                    Input::Connect(Some(address)) => manager.connect(&address).await?,
                    Input::Connect(None) => info!("No device picked"),
                    Input::State => println!("-- {} --", title(manager.state().await, peer_name.as_deref())),
                    Input::Quit => break,
                    Input::Message(text) => {
                        if let Err(e) = manager.write(text.into_bytes()).await {
                            warn!("Message not sent: {}", e);
                        }
                    }
                    Input::Empty => {}
                }
            }
        }
    }

    manager.stop().await;
    while let Ok(notification) = events.try_recv() {
        println!("{}", render(notification, &mut peer_name));
    }
    Ok(())
}
