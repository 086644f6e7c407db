mod compare;
mod store;

use std::sync::Arc;
use std::time::Duration;

use coalesce_core::CoalescerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::store::QuoteStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Codes known to the simulated store; keys beyond it resolve to nothing.
const STORE_SIZE: u64 = 100_000;
const ROUND_TRIP: Duration = Duration::from_millis(20);
const JITTER_MS: u64 = 10;

fn print_usage() {
    eprintln!("Usage: coalesce-bench --compare <keys> [--config <path>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --compare <keys>  Look up <keys> codes unbatched, then coalesced, and print a JSON report");
    eprintln!("  --config <path>   Read the coalescer config from a JSON file");
    eprintln!("  --version         Print version and exit");
    eprintln!("  --help            Print this help message");
}

struct CompareArgs {
    keys: u64,
    config_path: Option<String>,
}

fn parse_compare_args(args: &[String]) -> anyhow::Result<CompareArgs> {
    let mut keys = None;
    let mut config_path = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--compare" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--compare requires a key count"))?;
                keys = Some(value.parse::<u64>().map_err(|e| {
                    anyhow::anyhow!("invalid key count '{}': {}", value, e)
                })?);
            }
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(value.clone());
            }
            other => anyhow::bail!("Unknown option: {}", other),
        }
    }
    Ok(CompareArgs {
        keys: keys.ok_or_else(|| anyhow::anyhow!("--compare is required"))?,
        config_path,
    })
}

fn load_config(path: Option<&str>) -> anyhow::Result<CoalescerConfig> {
    match path {
        Some(path) => Ok(CoalescerConfig::from_json_file(path)?),
        None => Ok(CoalescerConfig::named("bench")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--version" => {
            println!("coalesce-bench {}", VERSION);
            Ok(())
        }
        "--help" => {
            print_usage();
            Ok(())
        }
        _ => {
            let parsed = match parse_compare_args(&args[1..]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    eprintln!("{}", e);
                    print_usage();
                    std::process::exit(1);
                }
            };

            // Logs go to stderr so the report on stdout stays machine-readable.
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();

            let config = load_config(parsed.config_path.as_deref())?;
            info!("coalesce-bench {} comparing {} lookups", VERSION, parsed.keys);

            let store = Arc::new(QuoteStore::new(STORE_SIZE, ROUND_TRIP, JITTER_MS));
            let report = compare::run(store, config, parsed.keys).await?;
            info!("{}", report.metrics);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_compare_and_config() {
        let parsed = parse_compare_args(&args(&["--compare", "500", "--config", "c.json"])).unwrap();
        assert_eq!(parsed.keys, 500);
        assert_eq!(parsed.config_path.as_deref(), Some("c.json"));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_compare_args(&args(&["--compare"])).is_err());
        assert!(parse_compare_args(&args(&["--compare", "many"])).is_err());
        assert!(parse_compare_args(&args(&["--config", "c.json"])).is_err());
        assert!(parse_compare_args(&args(&["--stdio"])).is_err());
    }

    #[test]
    fn config_defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.name, "bench");
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "from-file", "maxBatchSize": 64}}"#).unwrap();
        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.name, "from-file");
        assert_eq!(config.max_batch_size, 64);
    }
}
