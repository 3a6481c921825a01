//! FlashMap - soak tool
//!
//! Builds a sharded map from command-line flags and hammers it with a mixed
//! set/set_ex/get/delete load while the background sweep runs, then prints
//! the aggregated partition statistics.

use flashmap::{MapConfig, ShardRouter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Soak configuration
struct Config {
    /// Number of partitions
    slots: usize,
    /// Interval between sweep passes in milliseconds
    interval_ms: u64,
    /// Number of worker tasks
    workers: usize,
    /// How long to run
    duration_secs: u64,
    /// Size of the key space
    keys: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slots: 64,
            interval_ms: 1_000,
            workers: 4,
            duration_secs: 10,
            keys: 100_000,
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
                "--slots" | "-s" => {
                    config.slots = flag_value(&args, i);
                    i += 2;
                }
                "--interval-ms" | "-i" => {
                    config.interval_ms = flag_value(&args, i);
                    i += 2;
                }
                "--workers" | "-w" => {
                    config.workers = flag_value(&args, i);
                    i += 2;
                }
                "--duration-secs" | "-d" => {
                    config.duration_secs = flag_value(&args, i);
                    i += 2;
                }
                "--keys" | "-k" => {
                    config.keys = flag_value(&args, i);
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashMap version {}", flashmap::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        if config.keys == 0 {
            eprintln!("Error: --keys must be greater than zero");
            std::process::exit(1);
        }

        config
    }

    fn map_config(&self) -> MapConfig {
        MapConfig::default()
            .with_slot_count(self.slots)
            .with_sweep_interval(Duration::from_millis(self.interval_ms))
    }
}

/// Parses the value following the flag at `args[i]`, exiting on error.
fn flag_value<T: FromStr>(args: &[String], i: usize) -> T {
    let flag = &args[i];
    match args.get(i + 1) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("Error: invalid value for {}: {}", flag, raw);
            std::process::exit(1);
        }),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
FlashMap - Soak tool for the sharded expiring map

USAGE:
    flashmap [OPTIONS]

OPTIONS:
    -s, --slots <N>            Number of partitions (default: 64)
    -i, --interval-ms <MS>     Sweep interval in milliseconds (default: 1000)
    -w, --workers <N>          Concurrent worker tasks (default: 4)
    -d, --duration-secs <S>    How long to run (default: 10)
    -k, --keys <N>             Size of the key space (default: 100000)
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    flashmap                                  # Default soak
    flashmap --slots 8 --interval-ms 50       # Small map, aggressive sweep
    RUST_LOG=flashmap=debug flashmap          # Log every partition sweep
"#
    );
}

/// One worker's share of the load. Returns the number of operations done.
async fn worker(
    id: usize,
    map: Arc<ShardRouter<u64>>,
    keys: u64,
    running: Arc<AtomicBool>,
) -> u64 {
    let mut ops = 0u64;
    // Multiplicative hashing spreads consecutive counters over the key space
    let mut cursor = (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);

    while running.load(Ordering::Relaxed) {
        cursor = cursor.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let key = format!("key:{}", cursor % keys);

        match cursor % 10 {
            0..=3 => {
                map.get(&key);
            }
            4 | 5 => map.set(&key, ops),
            6..=8 => {
                let ttl = Duration::from_millis(50 + cursor % 2_000);
                map.set_ex(&key, ops, ttl);
            }
            _ => {
                map.delete(&key);
            }
        }

        ops += 1;
        if ops % 1_024 == 0 {
            tokio::task::yield_now().await;
        }
    }

    ops
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!(
        "FlashMap v{} soak: {} slots, {} workers, {} keys, {}s",
        flashmap::VERSION,
        config.slots,
        config.workers,
        config.keys,
        config.duration_secs
    );

    let map = Arc::new(ShardRouter::<u64>::new(config.map_config())?);
    let running = Arc::new(AtomicBool::new(true));
    let started = Instant::now();

    let workers: Vec<JoinHandle<u64>> = (0..config.workers)
        .map(|id| {
            tokio::spawn(worker(
                id,
                Arc::clone(&map),
                config.keys,
                Arc::clone(&running),
            ))
        })
        .collect();
    info!(workers = workers.len(), "Workers started");

    let deadline = tokio::time::sleep(Duration::from_secs(config.duration_secs));
    tokio::pin!(deadline);
    let mut report = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Soak duration elapsed");
                break;
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received, stopping workers...");
                break;
            }
            _ = report.tick() => {
                let stats = map.stats();
                info!(
                    keys = stats.keys,
                    sweeps = stats.sweeps,
                    swept = stats.swept,
                    "Progress"
                );
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let mut total_ops = 0u64;
    for handle in workers {
        match handle.await {
            Ok(ops) => total_ops += ops,
            Err(e) => error!("Worker failed: {}", e),
        }
    }

    let elapsed = started.elapsed();
    let stats = map.stats();
    info!(
        ops = total_ops,
        ops_per_sec = (total_ops as f64 / elapsed.as_secs_f64()) as u64,
        keys = stats.keys,
        gets = stats.gets,
        sets = stats.sets,
        deletes = stats.deletes,
        lazy_expired = stats.lazy_expired,
        sweeps = stats.sweeps,
        swept = stats.swept,
        "Soak finished"
    );

    let mut map = Arc::try_unwrap(map)
        .map_err(|_| anyhow::anyhow!("map still shared after workers exited"))?;
    map.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}
