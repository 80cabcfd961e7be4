use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "hls_downloader=info";

/// Build the env filter: `RUST_LOG` wins, then `level` for this crate, then the default.
pub fn build_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        Some(level) => EnvFilter::new(format!("hls_downloader={}", level)),
        None => EnvFilter::new(DEFAULT_FILTER),
    })
}

/// Install the global fmt subscriber. Repeated calls are ignored.
pub fn init_tracing(level: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
