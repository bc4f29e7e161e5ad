use std::fs::File;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use iiif_browser::core::config::{self, BrowserConfig};
use iiif_browser::core::persistence::FileStateStore;
use iiif_browser::fetch::HttpFetcher;
use iiif_browser::output::OutputStore;
use iiif_browser::search::{SearchIndexer, SearchSource};
use iiif_browser::{Browser, Emitter, ResolveOptions, ResolveState};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

#[derive(Parser)]
#[command(name = "iiif-browser", about = "Headless IIIF resource browser")]
struct Args {
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Namespace for persisted history
    #[arg(long)]
    storage_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve targets in order (the configured home page if none given)
    Resolve {
        targets: Vec<String>,
        /// Fetch again even if already resolved
        #[arg(short, long)]
        force: bool,
    },
    /// Show visited resources and the navigation stack
    History,
    /// Search pages, visited resources and the last collection
    Search {
        #[arg(default_value = "")]
        query: String,
        #[arg(short, long, value_enum)]
        source: Option<SearchSource>,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Forget history and cached resolutions
    Clear,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    dotenv::dotenv().ok();

    // Initialize file logger - writes to iiif-browser.log in current directory
    let log_config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Ok(log_file) = File::create("iiif-browser.log") {
        let _ = WriteLogger::init(level, log_config, log_file);
    }

    let file_config = config::load_config().unwrap_or_else(|e| {
        log::warn!("{}, using defaults", e);
        BrowserConfig::default()
    });
    let mut resolved = config::resolve(&file_config, args.storage_key.as_deref());
    if let Command::Search {
        limit: Some(limit), ..
    } = &args.command
    {
        resolved.search.number_of_results = *limit;
    }
    log::info!("iiif-browser starting up with storage key {}", resolved.storage_key);

    let store = Arc::new(FileStateStore::new(FileStateStore::default_dir()?));
    let emitter = Arc::new(Emitter::new());
    let fetcher = Arc::new(HttpFetcher::new(&resolved.fetch));
    let browser = Browser::new(
        fetcher,
        Arc::clone(&emitter),
        store,
        resolved.browser_settings(),
    );
    let indexer = SearchIndexer::attach(&emitter, resolved.search).map_err(std::io::Error::other)?;
    let output = Arc::new(OutputStore::new(resolved.links, Vec::new()));
    output.attach(&emitter);

    browser.restore();
    indexer.bulk_load_history(&browser.history_list());

    match args.command {
        Command::Resolve { targets, force } => {
            let targets = if targets.is_empty() {
                vec![resolved.home.clone()]
            } else {
                targets
            };
            for target in targets {
                let options = ResolveOptions {
                    force,
                    parent: None,
                };
                browser.resolve(&target, options).await;
                report(&browser, &output);
            }
        }
        Command::History => {
            let items = browser.history_list();
            if items.is_empty() {
                println!("No history yet.");
            }
            for item in items {
                println!(
                    "{:<11} {}  {}",
                    item.resource.kind,
                    item.label.as_deref().unwrap_or("(untitled)"),
                    item.url
                );
            }
            let stack = browser.history();
            println!();
            for (index, entry) in stack.entries().iter().enumerate() {
                let marker = if index == stack.cursor() { ">" } else { " " };
                println!("{marker} {}", entry.route);
            }
        }
        Command::Search { query, source, .. } => {
            for item in indexer.search(&query, source) {
                println!(
                    "{:<11} {}  {}",
                    item.source,
                    item.label,
                    item.url().unwrap_or("")
                );
            }
        }
        Command::Clear => {
            browser.clear_history();
            browser.clear_cache();
            println!("History cleared.");
        }
    }

    Ok(())
}

fn report(browser: &Browser, output: &OutputStore) {
    match browser.state() {
        ResolveState::Loaded { url } => {
            let resource = browser
                .current()
                .and_then(|entry| entry.resource)
                .and_then(|id| browser.resource(&id));
            match resource {
                Some(resource) => {
                    println!("✓ {} {}  {}", resource.kind, resource.display_label(), url);
                    for child in &resource.items {
                        println!(
                            "    {:<11} {}",
                            child.kind,
                            child.label.as_deref().unwrap_or(&child.id)
                        );
                    }
                }
                None => println!("✓ {url}"),
            }
            for item in output.selected_items() {
                println!("  selectable: {} {}", item.kind(), item.id());
            }
        }
        ResolveState::Error { url, message } => eprintln!("✗ {url}: {message}"),
        other => println!("{other:?}"),
    }
}
