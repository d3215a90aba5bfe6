//! viewguard binary entrypoint.
//!
//! `viewguard [serve]`            run the HTTP service
//! `viewguard scan`               run the abuse scanner once and print a report
//! `viewguard register ID PATH`   register a content item and its public path

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use viewguard::abuse::AbuseScanner;
use viewguard::clock::SystemClock;
use viewguard::config::Config;
use viewguard::{console, server, state};

const USAGE: &str = "usage: viewguard [serve | scan | register <content_id> <path>]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["serve"] => {
            let addr = config.bind_addr.clone();
            let state = state::build_state(config)?;
            console::print_banner();
            console::print_startup(&addr);
            tracing::info!("starting viewguard on {}", addr);
            server::run(state, &addr).await?;
        }
        ["scan"] => {
            let log = Arc::new(state::open_attempts(&config)?);
            let flagged = AbuseScanner::new(log, Arc::new(SystemClock)).scan(&config.scan)?;
            console::print_scan_report(&config.scan, &flagged);
        }
        ["register", id, path] => {
            state::open_content(&config)?.upsert(id, path)?;
            console::print_registered(id, path);
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
    Ok(())
}
