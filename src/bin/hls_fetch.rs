use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use hls_downloader::core::progress_tracker::ProgressObserver;
use hls_downloader::utils::logging::init_tracing;
use hls_downloader::{AppConfig, DownloadManager, QualityPreference};

const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: hls-fetch <m3u8-url> [quality] [output-path]");
        eprintln!("  quality: best (default), worst, or a height such as 720");
        std::process::exit(1);
    }

    let url = args[1].clone();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Error: {error:#}");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_level.as_deref());

    let preference = args
        .get(2)
        .map(|value| value.parse::<QualityPreference>().unwrap_or_default())
        .unwrap_or_else(|| config.download.quality_preference());
    let output = args.get(3).map(PathBuf::from);

    let observer: Arc<dyn ProgressObserver> = Arc::new(|completed: usize, total: usize| {
        eprint!("\r[{completed}/{total}] segments");
        if completed == total {
            eprintln!();
        }
    });

    let manager = match DownloadManager::new(config) {
        Ok(manager) => manager.with_observer(observer),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    };
    let cancel = manager.cancel_handle();

    let mut download = Box::pin(manager.download(&url, preference, output.as_deref(), None));

    let result = tokio::select! {
        result = &mut download => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted, stopping workers...");
            cancel.cancel();
            // dropping the job aborts its in-flight segment tasks
            drop(download);
            std::process::exit(EXIT_INTERRUPTED);
        }
    };

    match result {
        Ok(path) => println!("{}", path.display()),
        Err(error) if error.is_interrupted() => std::process::exit(EXIT_INTERRUPTED),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}
