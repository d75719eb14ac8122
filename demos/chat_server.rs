//! Chat server example with presence and private channels
//!
//! Run with: cargo run --example chat_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example chat_server                    # binds to 0.0.0.0:$PORT (8080)
//!   cargo run --example chat_server localhost          # binds to 127.0.0.1:8080
//!   cargo run --example chat_server 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! ## Environment
//!
//!   PORT          Port used when no BIND_ADDR is given (default 8080)
//!   AUTH_TOKEN    If set, clients must present it as ?bearer=... or
//!                 an `Authorization: Bearer ...` header
//!   WEBHOOK_URL   If set, every dispatched action is POSTed there
//!
//! ## Talking to it
//!
//! With websocat:
//!   websocat 'ws://localhost:8080/ws?name=alice&bearer=TOKEN'
//!
//! Then send one JSON envelope per line:
//!   {"action":"join_channel","name":"general"}
//!   {"action":"join_channel_private","data":"<other client id>"}
//!   {"action":"send_message","name":"<private channel name>","data":"hi"}

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use ws_hub::protocol::constants::DEFAULT_PORT;
use ws_hub::{
    Action, AuthResult, ClientRef, ConnectRequest, HubHandler, HubServer, Message, ServerConfig,
    StandardHandler, WebhookNotifier,
};

/// Standard auth and webhook, plus console logging and counters
struct ChatHandler {
    inner: StandardHandler,
    connected: AtomicU64,
    messages: AtomicU64,
}

impl ChatHandler {
    fn new(inner: StandardHandler) -> Self {
        Self {
            inner,
            connected: AtomicU64::new(0),
            messages: AtomicU64::new(0),
        }
    }
}

impl HubHandler for ChatHandler {
    fn authenticate(&self, request: &ConnectRequest) -> AuthResult {
        let result = self.inner.authenticate(request);
        println!(
            "[{}] Upgrade {} name={:?} -> {:?}",
            request.peer_addr, request.path, request.name, result
        );
        result
    }

    async fn on_connect(&self, client: &ClientRef) {
        let online = self.connected.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[{}] Connected ({} online)", client.id, online);
    }

    async fn on_action(&self, client: &ClientRef, action: Action) {
        println!("[{}] {}", client.id, action);
        self.inner.on_action(client, action).await;
    }

    async fn persist(&self, message: &Message) {
        let total = self.messages.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            channel = %message.name,
            len = message.data.len(),
            total = total,
            "Message delivered"
        );
    }

    async fn on_disconnect(&self, client: &ClientRef) {
        let online = self.connected.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        println!("[{}] Disconnected ({} online)", client.id, online);
    }
}

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:<port>
/// - "localhost:9000" -> 127.0.0.1:9000
/// - "127.0.0.1" -> 127.0.0.1:<port>
/// - "0.0.0.0:9000" -> 0.0.0.0:9000
fn parse_bind_addr(arg: &str, default_port: u16) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: chat_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:$PORT)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PORT, AUTH_TOKEN, WEBHOOK_URL");
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let port = match env_var("PORT") {
        Some(port) => port.parse::<u16>()?,
        None => DEFAULT_PORT,
    };

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str, port) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ws_hub=debug".parse()?)
                .add_directive("chat_server=debug".parse()?),
        )
        .init();

    let mut standard = StandardHandler::new();
    match env_var("AUTH_TOKEN") {
        Some(token) => standard = standard.with_auth_token(token),
        None => println!("AUTH_TOKEN not set: accepting every client"),
    }
    if let Some(url) = env_var("WEBHOOK_URL") {
        println!("Posting events to {}", url);
        standard = standard.with_webhook(WebhookNotifier::new(url));
    }

    let config = ServerConfig::with_addr(bind_addr);
    println!("Starting chat server on ws://{}/ws", config.bind_addr);

    let server = HubServer::new(config, ChatHandler::new(standard));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats();
            println!(
                "\nShutting down ({} connections served, {} rejected)",
                stats.total_connections, stats.rejected_connections
            );
        }
    }

    Ok(())
}
