//! Chat server example
//!
//! Every line a client sends is broadcast to all connected clients.
//!
//! Run with: cargo run --example chat_server [PORT]
//!
//! Then connect several terminals with: nc localhost 7100

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tcp_hub::{AddressFamily, ClientHandler, Connection, ServerConfig, TcpServer};

const MAX_CLIENTS: usize = 32;

/// Forwards received text to the broadcast task
struct Chat {
    messages: mpsc::Sender<String>,
}

impl ClientHandler for Chat {
    async fn on_connect(&self, conn: &Connection) -> bool {
        let _ = conn.send_text("welcome to the chat\n").await;
        let _ = self
            .messages
            .send(format!("* {} joined\n", conn.peer_addr()))
            .await;
        true
    }

    async fn on_data(&self, conn: &Connection) -> bool {
        match conn.read_string(1024).await {
            Ok(text) if !text.is_empty() => {
                let line = format!("{}: {}", conn.peer_addr(), text);
                self.messages.send(line).await.is_ok()
            }
            _ => true,
        }
    }

    async fn on_shutdown(&self, conn: &Connection) -> bool {
        let _ = self
            .messages
            .send(format!("* {} left\n", conn.peer_addr()))
            .await;
        false
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = match std::env::args().nth(1) {
        Some(p) => p.parse()?,
        None => 7100,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tcp_hub=info".parse()?),
        )
        .init();

    let (tx, mut rx) = mpsc::channel::<String>(256);

    let config = ServerConfig::default()
        .max_connections(MAX_CLIENTS)
        .send_timeout(Duration::from_secs(2));
    let server = Arc::new(TcpServer::new(config));
    let addr = server
        .start(AddressFamily::Any, Chat { messages: tx }, port, "")
        .await?;

    println!("Chat server listening on {}", addr);

    let broadcaster = Arc::clone(&server);
    let relay = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let report = broadcaster.send_to_all_text(&line).await;
            if report.failed > 0 {
                tracing::warn!(failed = report.failed, "Some clients missed a message");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    server.send_to_all_text("* server going down\n").await;
    server.stop().await;
    relay.abort();

    Ok(())
}
