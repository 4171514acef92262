//! End-to-end commit benchmark for Scribble.
//!
//! Connects several clients to a running server, has them commit concurrently
//! into one room, and checks that every client converges on the same history.
//!
//! ```bash
//! cargo run --release -p scribble-server &
//! cargo run --release --bin e2e_commits -- --url ws://127.0.0.1:8080/ws --clients 16 --commits 200
//! ```

use clap::Parser;
use scribble_bench::line;
use scribble_core::Reconciler;
use scribble_protocol::Frame;
use scribble_transport::{connect, ClientConnection, Connection, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "e2e_commits")]
#[command(about = "Concurrent commit throughput and convergence against a running server")]
struct Args {
    /// Server WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Number of concurrent clients
    #[arg(long, default_value_t = 16)]
    clients: usize,

    /// Commits sent by each client
    #[arg(long, default_value_t = 200)]
    commits: usize,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let Args {
        url,
        clients: num_clients,
        commits: commits_per_client,
    } = Args::parse();
    let room = format!("e2e-{}", std::process::id());

    println!("Scribble end-to-end commit benchmark");
    println!("  server:  {url}");
    println!("  clients: {num_clients}, commits per client: {commits_per_client}");
    println!();

    let expected = num_clients * commits_per_client;
    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let url = url.clone();
        let room = room.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            run_client(client_id, &url, &room, commits_per_client, expected, barrier).await
        }));
    }

    barrier.wait().await;
    let start = Instant::now();
    println!("All {num_clients} clients joined, committing...");

    let mut clients = Vec::new();
    for handle in handles {
        clients.push(handle.await??);
    }
    let elapsed = start.elapsed();

    let Some(reference) = clients.first() else {
        return Err("no clients".into());
    };
    let converged = clients.iter().all(|c| {
        c.history_index() == reference.history_index() && c.shapes() == reference.shapes()
    });

    println!();
    println!("  commits:    {expected}");
    println!("  duration:   {:.2}s", elapsed.as_secs_f64());
    println!(
        "  throughput: {:.0} commits/s",
        expected as f64 / elapsed.as_secs_f64()
    );
    println!("  converged:  {converged}");

    if !converged {
        return Err("clients diverged".into());
    }
    Ok(())
}

async fn run_client(
    client_id: usize,
    url: &str,
    room: &str,
    commits: usize,
    expected: usize,
    barrier: Arc<Barrier>,
) -> Result<Reconciler, BoxError> {
    let mut conn = connect(url, MAX_MESSAGE_SIZE).await?;
    let mut client = Reconciler::new();

    apply_next(&mut conn, &mut client).await?;
    conn.send(client.join(room)).await?;
    while client.room().is_none() {
        apply_next(&mut conn, &mut client).await?;
    }

    barrier.wait().await;

    for i in 0..commits {
        let frame = client.commit(line(&format!("c{client_id}-{i}"), 8))?;
        conn.send(frame).await?;
    }

    tokio::time::timeout(SETTLE_TIMEOUT, async {
        while client.history_index() < expected || !client.pending().is_empty() {
            apply_next(&mut conn, &mut client).await?;
        }
        Ok::<_, BoxError>(())
    })
    .await??;

    conn.close().await?;
    Ok(client)
}

async fn apply_next(conn: &mut ClientConnection, client: &mut Reconciler) -> Result<(), BoxError> {
    let frame = conn
        .recv()
        .await?
        .ok_or(TransportError::ConnectionClosed)?;
    if let Frame::Error { message, .. } = &frame {
        eprintln!("server error: {message}");
    }
    client.apply(&frame)?;
    Ok(())
}
