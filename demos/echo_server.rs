//! Echo server example
//!
//! Run with: cargo run --example echo_server [PORT] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example echo_server                  # binds to [::]:7000 (dual-stack)
//!   cargo run --example echo_server 7001             # binds to [::]:7001
//!   cargo run --example echo_server 7001 127.0.0.1   # binds to 127.0.0.1:7001
//!
//! Try it with: nc localhost 7000

use std::sync::atomic::{AtomicU64, Ordering};

use tcp_hub::{AddressFamily, ClientHandler, Connection, ServerConfig, TcpServer};

/// Echoes everything back and counts bytes
struct Echo {
    bytes: AtomicU64,
}

impl ClientHandler for Echo {
    async fn on_connect(&self, conn: &Connection) -> bool {
        println!("[{}] connected", conn.peer_addr());
        true
    }

    async fn on_data(&self, conn: &Connection) -> bool {
        match conn.read_bytes(4096).await {
            Ok(data) if !data.is_empty() => {
                self.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                conn.send(&data).await.is_ok()
            }
            // EOF or error already closed the connection
            _ => true,
        }
    }

    async fn on_shutdown(&self, conn: &Connection) -> bool {
        println!(
            "[{}] disconnected ({} bytes echoed so far)",
            conn.peer_addr(),
            self.bytes.load(Ordering::Relaxed)
        );
        false
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = match args.get(1) {
        Some(p) => p.parse()?,
        None => 7000,
    };
    let bind_addr = args.get(2).map(String::as_str).unwrap_or("");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tcp_hub=debug".parse()?),
        )
        .init();

    let server = TcpServer::new(ServerConfig::default());
    let handler = Echo {
        bytes: AtomicU64::new(0),
    };
    let addr = server
        .start(AddressFamily::Any, handler, port, bind_addr)
        .await?;

    println!("Echo server listening on {}", addr);

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    server.stop().await;

    let stats = server.stats();
    println!(
        "Served {} connections ({} rejected)",
        stats.total_connections, stats.rejected_connections
    );

    Ok(())
}
