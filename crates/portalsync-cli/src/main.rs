//! portalsync - fetch files from authenticated web portals with one shared,
//! persisted login session.

mod args;
mod credentials;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use portalsync_core::store::SessionCipher;
use portalsync_core::{Config, Crawler, Page};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Command};
use credentials::InteractiveCredentials;

/// Passphrase for crawlers with `encrypt_session` set
const SESSION_KEY_ENV: &str = "PORTALSYNC_SESSION_KEY";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=portalsync_core=debug).
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "portalsync.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref());

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Fetch {
            crawler,
            urls,
            jobs,
            output,
        } => fetch(&config, &crawler, urls, jobs, output).await,
        Command::Login { crawler, remember } => login(&config, &crawler, remember).await,
        Command::Logout { crawler, forget } => logout(&config, &crawler, forget),
    }
}

fn build_crawler(config: &Config, name: &str) -> Result<(Crawler, Arc<InteractiveCredentials>)> {
    let username = config.crawler(name)?.username.clone();
    let credentials = Arc::new(InteractiveCredentials::new(name, username));
    let cipher = std::env::var(SESSION_KEY_ENV)
        .ok()
        .filter(|key| !key.is_empty())
        .map(SessionCipher::new);
    let crawler = Crawler::from_config(config, name, credentials.clone(), cipher)?;
    Ok((crawler, credentials))
}

async fn fetch(
    config: &Config,
    name: &str,
    urls: Vec<String>,
    jobs: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let (crawler, _) = build_crawler(config, name)?;
    if let Some(ref dir) = output {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let failures = crawler
        .run(|ctx| async move {
            let mut results = stream::iter(urls)
                .map(|url| {
                    let ctx = ctx.clone();
                    async move {
                        let result = ctx.fetch(&url).await;
                        (url, result)
                    }
                })
                .buffer_unordered(jobs);

            let mut failures = 0usize;
            while let Some((url, result)) = results.next().await {
                match result.and_then(Page::error_for_status) {
                    Ok(page) => {
                        println!("{} {:>10} {}", page.status().as_u16(), page.body().len(), url);
                        if let Some(ref dir) = output {
                            save_page(dir, &page)?;
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(anyhow::Error::new(e)),
                    Err(e) => {
                        warn!(%url, error = %e, "Fetch failed");
                        eprintln!("error {}: {}", url, e);
                        failures += 1;
                    }
                }
            }
            Ok(failures)
        })
        .await
        .with_context(|| format!("Crawl '{}' aborted", name))?;

    if failures > 0 {
        anyhow::bail!("{} URL(s) could not be fetched", failures);
    }
    Ok(())
}

fn save_page(dir: &Path, page: &Page) -> Result<()> {
    let file_name = page
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("index.html");
    let path = dir.join(file_name);
    std::fs::write(&path, page.body())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = page.body().len(), "Saved");
    Ok(())
}

async fn login(config: &Config, name: &str, remember: bool) -> Result<()> {
    let (crawler, credentials) = build_crawler(config, name)?;

    crawler
        .run(|ctx| async move { ctx.coordinator().force_login().await })
        .await
        .with_context(|| format!("Login to '{}' failed", name))?;

    if remember && credentials.remember()? {
        eprintln!("Password stored in the OS keychain");
    }
    eprintln!("Logged in to '{}'", name);
    Ok(())
}

fn logout(config: &Config, name: &str, forget: bool) -> Result<()> {
    let crawler_config = config.crawler(name)?;
    let store = portalsync_core::SessionStore::new(config.state_dir(name)?);
    if store.clear()? {
        eprintln!("Removed saved session {}", store.path().display());
    } else {
        eprintln!("No saved session for '{}'", name);
    }

    if forget {
        if let Some(ref username) = crawler_config.username {
            portalsync_core::auth::CredentialStore::delete(name, username)?;
            eprintln!("Removed keychain password for {}", username);
        }
    }
    Ok(())
}
