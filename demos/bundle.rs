//! Bundle example
//!
//! This example demonstrates the core functionality of wiki-bundler:
//! - Configuring the output and rendering service
//! - Building a manifest from interwiki-prefixed titles
//! - Subscribing to progress events
//! - Running a bundle to completion
//!
//! Usage: `cargo run --example bundle -- <output> <prefix:Title>...`

use tracing_subscriber::EnvFilter;
use wiki_bundler::{BundleConfig, Bundler, Event};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let output = args.next().unwrap_or_else(|| "bundle.zip".to_string());
    let articles: Vec<(String, String)> = args
        .filter_map(|arg| {
            arg.split_once(':')
                .map(|(prefix, title)| (prefix.to_string(), title.to_string()))
        })
        .collect();
    if articles.is_empty() {
        eprintln!("usage: bundle <output> <prefix:Title>...");
        std::process::exit(2);
    }

    // Build configuration
    let mut config = BundleConfig::new(output);
    config.fetch.render_service =
        Some(std::env::var("PARSOID_URL").unwrap_or_else(|_| "http://localhost:8000/".to_string()));
    config.output.compat = std::env::var_os("BUNDLE_COMPAT").is_some();

    let bundler = Bundler::new(config)?;

    // Subscribe to events
    let mut events = bundler.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::StageStarted { stage, steps } => {
                    println!("== {} ({} steps)", stage, steps);
                }
                Event::Status {
                    percent,
                    file: Some(file),
                    ..
                } => {
                    println!("{:5.1}% {}", percent, file);
                }
                Event::Status { .. } => {}
                Event::Done { output } => {
                    println!("✓ Bundle written to {}", output.display());
                    break;
                }
                Event::Failed { code, error } => {
                    println!("✗ Bundle failed [{}]: {}", code, error);
                    break;
                }
            }
        }
    });

    let manifest = bundler.manifest_from_articles(&articles).await?;
    let result = bundler.bundle(manifest).await;
    printer.await?;

    let report = result?;
    println!(
        "{} articles, {}/{} images downloaded",
        report.articles, report.downloaded, report.images
    );
    Ok(())
}
