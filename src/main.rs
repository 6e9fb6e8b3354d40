//! ttlmap demo
//!
//! Walks through the two ways entries leave an [`ExpiringMap`]: a later write
//! scheduling a sweep, and a [`Reaper`] sweeping a map nobody writes to.

use std::time::Duration;

use anyhow::{ensure, Context};
use tokio::time::sleep;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use ttlmap::{ExpiringMap, Reaper};

/// Demo configuration
struct Config {
    /// TTL used by both demo maps
    ttl: Duration,
    /// Number of writes in the reaper demo
    rounds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1),
            rounds: 200,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--ttl-ms" | "-t" => {
                    if i + 1 < args.len() {
                        let ms: u64 = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid TTL");
                            std::process::exit(1);
                        });
                        config.ttl = Duration::from_millis(ms);
                        i += 2;
                    } else {
                        eprintln!("Error: --ttl-ms requires a value");
                        std::process::exit(1);
                    }
                }
                "--rounds" | "-r" => {
                    if i + 1 < args.len() {
                        config.rounds = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid round count");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --rounds requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("ttlmap-demo version {}", ttlmap::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }
}

fn print_help() {
    println!(
        r#"
ttlmap-demo - Expiring map walkthrough

USAGE:
    ttlmap-demo [OPTIONS]

OPTIONS:
    -t, --ttl-ms <MS>      TTL of the demo maps in milliseconds (default: 1000)
    -r, --rounds <N>       Writes performed in the reaper demo (default: 200)
    -v, --version          Print version information
    -h, --help             Print this help message
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .init();

    write_triggered_demo(config.ttl).await?;
    reaper_demo(config.ttl, config.rounds).await?;

    info!("Demo complete");
    Ok(())
}

/// A write after the TTL elapsed schedules a sweep that removes older entries.
async fn write_triggered_demo(ttl: Duration) -> anyhow::Result<()> {
    info!("Demo 1: write-triggered expiry");

    let map = ExpiringMap::new(ttl).context("invalid TTL")?;

    map.store("a", "foo");
    sleep(ttl * 2).await;

    map.store("b", "bar");
    sleep(ttl * 2).await;

    ensure!(map.load(&"a").is_none(), "entry a should have been swept");
    info!("Entry a is gone: the write of b scheduled a sweep");

    ensure!(map.load(&"b").is_some(), "entry b should still be present");
    info!("Entry b is still present although expired: nothing was written after it");

    Ok(())
}

/// A reaper keeps sweeping while the map sits idle.
async fn reaper_demo(ttl: Duration, rounds: u64) -> anyhow::Result<()> {
    info!("Demo 2: reaper");

    let map = ExpiringMap::builder(ttl)
        .on_expire(|key: u64, value: u64| info!(key, value, "Expired"))
        .build()
        .context("invalid TTL")?;

    // Unlike the map, the reaper must be closed to release its task.
    let reaper = Reaper::new(&map).context("failed to start reaper")?;

    for round in 0..rounds {
        let key = round.wrapping_mul(7919) % 1000;
        let value = round;
        map.store(key, value);

        let pause = Duration::from_millis(round.wrapping_mul(31) % 100);
        info!(key, value, pause_ms = pause.as_millis() as u64, "Stored");
        sleep(pause).await;
    }

    info!("Idling for three TTLs, the reaper keeps running");
    sleep(ttl * 3).await;

    let mut count = 0;
    map.range(|key, value| {
        count += 1;
        info!(key, value, "Still present");
        true
    });
    ensure!(count == 0, "expected the reaper to drain the map, {} left", count);
    info!(stats = ?map.stats(), "Map drained");

    reaper.close();
    Ok(())
}
