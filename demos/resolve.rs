//! Resolve a module handle example
//!
//! Resolves the handle given on the command line with the default resolver
//! chain and prints the local module directory:
//! - `https://...` handles are downloaded and unpacked into the cache
//! - local `.tar` / `.tgz` archives are unpacked into the cache
//! - existing directories are returned as they are
//!
//! Run several copies at once against the same handle to watch the lock
//! protocol: only one of them downloads.
//!
//! ```text
//! MODCACHE_DIR=/tmp/modules cargo run --example resolve -- https://example.com/model.tgz
//! ```
//!
//! Press Ctrl+C during a download to see the partial download cleaned up.

use modcache::{Config, DownloadCoordinator, default_resolver_with, resolve_with_shutdown};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let Some(handle) = std::env::args().nth(1) else {
        eprintln!("usage: resolve <handle> [config.json]");
        std::process::exit(2);
    };

    // Optional JSON config, e.g. {"lock": {"timeout": 60}}
    let config = match std::env::args().nth(2) {
        Some(path) => Config::from_file(std::path::Path::new(&path))?,
        None => Config::default(),
    };
    println!("Cache directory: {}", config.resolve_cache_dir()?.display());

    // Share one token between the coordinator and the signal handler
    let cancel = CancellationToken::new();
    let coordinator =
        DownloadCoordinator::local(config.lock.clone()).with_cancel_token(cancel.clone());
    let resolver = default_resolver_with(&config, coordinator)?;

    match resolve_with_shutdown(&resolver, &handle, &cancel).await {
        Ok(dir) => {
            println!("{}", dir.display());
            Ok(())
        }
        Err(modcache::Error::Cancelled) => {
            eprintln!("Interrupted, partial download removed");
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}
