//! Log output for the server.
//!
//! Events are filtered by `RUST_LOG` (default `info`) and printed either as
//! human-readable, multi-line records or as one JSON object per line.
//!
//! ```bash
//! RUST_LOG=segid=debug,info LOG_FORMAT=json cargo run --bin segid-server
//! ```

use tracing_subscriber::{
    EnvFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::server::config::LogFormat;

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_thread_ids(true)
                    .with_timer(ChronoLocal::rfc_3339()),
            )
            .try_init()?,
    }
    Ok(())
}
