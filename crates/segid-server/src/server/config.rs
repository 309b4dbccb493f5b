use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use segid::{AllocatorConfig, RetryPolicy};

/// How a segment is reserved from the backing store.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Conditionally advance a per-tag counter by the batch size.
    Cas,
    /// Multiply a per-tag sequence value by the batch size.
    Multiply,
}

/// Where standby segments are refilled.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillMode {
    /// On the request that crosses the middle of the active segment.
    Inline,
    /// On a shared worker pool.
    Background,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Runtime configuration for the `segid-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is honored), with defaults suitable for production.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "segid-server",
    version,
    about = "An HTTP service for segment-allocated, per-tag monotonic IDs"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Number of IDs reserved per segment.
    ///
    /// Larger values mean fewer round trips to the backing store but more IDs
    /// lost when the process restarts.
    ///
    /// Environment variable: `BATCH_SIZE`
    #[arg(long, env = "BATCH_SIZE", default_value_t = segid::DEFAULT_BATCH_SIZE)]
    pub batch_size: u64,

    /// Segment reservation strategy.
    ///
    /// Environment variable: `STRATEGY`
    #[arg(long, env = "STRATEGY", value_enum, default_value_t = Strategy::Cas)]
    pub strategy: Strategy,

    /// Whether standby segments are refilled inline or in the background.
    ///
    /// Environment variable: `REFILL_MODE`
    #[arg(long, env = "REFILL_MODE", value_enum, default_value_t = RefillMode::Background)]
    pub refill_mode: RefillMode,

    /// Maximum number of background refills running at once. Defaults to the
    /// number of logical CPUs.
    ///
    /// Environment variable: `REFILL_WORKERS`
    #[arg(long, env = "REFILL_WORKERS")]
    pub refill_workers: Option<usize>,

    /// How long a swap waits for an in-flight background refill before
    /// falling back, in milliseconds.
    ///
    /// Environment variable: `SWAP_TIMEOUT_MS`
    #[arg(long, env = "SWAP_TIMEOUT_MS", default_value_t = 1500)]
    pub swap_timeout_ms: u64,

    /// Attempts per repository load.
    ///
    /// Environment variable: `LOAD_RETRY_ATTEMPTS`
    #[arg(long, env = "LOAD_RETRY_ATTEMPTS", default_value_t = segid::DEFAULT_LOAD_ATTEMPTS)]
    pub load_retry_attempts: u32,

    /// Attempts of the swap-time fallback loop.
    ///
    /// Environment variable: `FILL_RETRY_ATTEMPTS`
    #[arg(long, env = "FILL_RETRY_ATTEMPTS", default_value_t = segid::DEFAULT_FILL_ATTEMPTS)]
    pub fill_retry_attempts: u32,

    /// Pause between retry attempts, in milliseconds.
    ///
    /// Environment variable: `RETRY_DELAY_MS`
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Maximum number of IDs a single `/ids` request may ask for.
    ///
    /// Environment variable: `MAX_IDS_PER_REQUEST`
    #[arg(long, env = "MAX_IDS_PER_REQUEST", default_value_t = 10_000)]
    pub max_ids_per_request: usize,

    /// Seconds to wait for in-flight requests and refills on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub strategy: Strategy,
    pub allocator: AllocatorConfig,
    /// `None` refills inline.
    pub refill_workers: Option<usize>,
    pub max_ids_per_request: usize,
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.batch_size == 0 {
            bail!("BATCH_SIZE must be greater than 0");
        }
        if args.max_ids_per_request == 0 {
            bail!("MAX_IDS_PER_REQUEST must be greater than 0");
        }

        let refill_workers = match args.refill_mode {
            RefillMode::Inline => None,
            RefillMode::Background => {
                let workers = args.refill_workers.unwrap_or_else(num_cpus::get);
                if workers == 0 {
                    bail!("REFILL_WORKERS must be greater than 0");
                }
                Some(workers)
            }
        };

        let delay = Duration::from_millis(args.retry_delay_ms);
        let allocator = AllocatorConfig::default()
            .with_batch_size(args.batch_size)
            .with_swap_timeout(Duration::from_millis(args.swap_timeout_ms))
            .with_load_retry(RetryPolicy::new(args.load_retry_attempts, delay))
            .with_fill_retry(RetryPolicy::new(args.fill_retry_attempts, delay));
        allocator.validate()?;

        Ok(Self {
            server_addr: args.server_addr,
            strategy: args.strategy,
            allocator,
            refill_workers,
            max_ids_per_request: args.max_ids_per_request,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(core::iter::once("segid-server").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn defaults_build_a_background_config() {
        let config = ServerConfig::try_from(parse(&[])).unwrap();

        assert_eq!(config.strategy, Strategy::Cas);
        assert_eq!(config.allocator, AllocatorConfig::default());
        assert!(config.refill_workers.is_some_and(|n| n > 0));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn inline_mode_has_no_workers() {
        let config = ServerConfig::try_from(parse(&[
            "--refill-mode",
            "inline",
            "--strategy",
            "multiply",
            "--batch-size",
            "20",
        ]))
        .unwrap();

        assert_eq!(config.refill_workers, None);
        assert_eq!(config.strategy, Strategy::Multiply);
        assert_eq!(config.allocator.batch_size, 20);
    }

    #[test]
    fn rejects_zero_values() {
        for args in [
            ["--batch-size", "0"],
            ["--refill-workers", "0"],
            ["--load-retry-attempts", "0"],
            ["--max-ids-per-request", "0"],
        ] {
            assert!(ServerConfig::try_from(parse(&args)).is_err(), "{args:?}");
        }
    }
}
