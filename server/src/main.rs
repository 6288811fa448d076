//! Match server entry point: flag parsing, logging setup, listeners.

use clap::Parser;
use log::info;
use rand::Rng;

use server::network;
use server::server::Server;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// TCP listen address (empty to disable)
    #[clap(long, default_value = "localhost:1337")]
    tcp: String,

    /// WebSocket listen address (empty to disable)
    #[clap(long, default_value = "localhost:1338")]
    ws: String,

    /// Force debug-level logging
    #[clap(long)]
    debug: bool,

    /// Print dice roll statistics and exit
    #[clap(long)]
    statistics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
            .init();
    } else {
        env_logger::init();
        if std::env::var("RUST_LOG").is_err() {
            eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
            eprintln!("Recommended: RUST_LOG=info cargo run");
        }
    }

    if args.statistics {
        print_roll_statistics();
        return Ok(());
    }

    if args.tcp.is_empty() && args.ws.is_empty() {
        return Err("a TCP and/or WebSocket listen address must be specified".into());
    }

    let server = Server::new();
    if !args.tcp.is_empty() {
        network::listen_tcp(server.clone(), &args.tcp).await?;
    }
    if !args.ws.is_empty() {
        network::listen_ws(server.clone(), &args.ws).await?;
    }
    info!("Match server started");

    std::future::pending::<()>().await;
    Ok(())
}

/// Rolls a million dice pairs and reports how often a die repeats one of
/// the previous pair and how often doubles occur.
fn print_roll_statistics() {
    let mut rng = rand::thread_rng();
    let total = 1_000_000u32;
    let mut one_same = 0u32;
    let mut doubles = 0u32;
    let mut last_roll1 = 0u8;
    let mut last_roll2 = 0u8;

    for _ in 0..total {
        let roll1: u8 = rng.gen_range(1..=6);
        let roll2: u8 = rng.gen_range(1..=6);

        if roll1 == last_roll1 || roll1 == last_roll2 || roll2 == last_roll1 || roll2 == last_roll2
        {
            one_same += 1;
        }
        if roll1 == roll2 {
            doubles += 1;
        }

        last_roll1 = roll1;
        last_roll2 = roll2;
    }

    println!(
        "total: {}, one same: {} ({:.0}%), doubles: {} ({:.0}%)",
        total,
        one_same,
        f64::from(one_same) / f64::from(total) * 100.0,
        doubles,
        f64::from(doubles) / f64::from(total) * 100.0
    );
}
