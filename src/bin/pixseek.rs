//! Command line front end for Pixseek.
//!
//! ```text
//! pixseek [--config pixseek.json] [--index images.redb] <command>
//!
//!   ingest <path>     caption and index an image or a directory
//!   search <query>    print matching image paths, best first
//!   remove <path>     drop an image from the index
//!   export <file>     write every caption to a text file
//!   watch             index new images in the watched directories until Ctrl-C
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pixseek::{
    ChangeWatcher, Config, EventSubscription, ImageSearcher, IndexEvent, IngestSource, Result,
};

#[derive(Parser)]
#[command(name = "pixseek")]
#[command(version)]
#[command(about = "Search a local image library by describing the picture", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to the local Ollama setup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index file, overriding the configured one
    #[arg(short, long, global = true)]
    index: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Caption and index an image, or every image directly inside a directory
    Ingest { path: PathBuf },
    /// Print the images best matching a description
    Search { query: String },
    /// Remove an image from the index
    Remove { path: PathBuf },
    /// Write a numbered listing of every caption to a file
    Export { file: PathBuf },
    /// Index new images in the watched directories until interrupted
    Watch,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(file) => Config::from_json_file(file)?,
        None => Config::with_ollama(),
    };
    if let Some(index) = &cli.index {
        config.index_path = index.clone();
    }
    Ok(config)
}

fn print_event(event: &IndexEvent) {
    match event {
        IndexEvent::Started { path } => println!("processing {}", path.display()),
        IndexEvent::Progress {
            file,
            processed,
            total,
            fraction,
            ..
        } => println!(
            "[{processed}/{total}] {:>3.0}% {}",
            fraction * 100.0,
            file.display()
        ),
        IndexEvent::Completed {
            path,
            documents_added,
            files,
        } => println!(
            "indexed {} ({files} image(s), {documents_added} captions)",
            path.display()
        ),
        IndexEvent::Failed {
            path,
            error,
            retryable,
        } => {
            let hint = if *retryable { " (retryable)" } else { "" };
            eprintln!("failed {}: {error}{hint}", path.display());
        }
        IndexEvent::Removed {
            path,
            documents_removed,
        } => println!("removed {} ({documents_removed} captions)", path.display()),
    }
}

/// Prints events until the bus is dropped.
fn spawn_printer(events: EventSubscription) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while let Some(event) = events.recv() {
            print_event(&event);
        }
    })
}

fn ingest(searcher: ImageSearcher, path: PathBuf) -> Result<()> {
    let printer = spawn_printer(searcher.subscribe());
    let result = searcher.ingest(&path, IngestSource::Foreground);
    // Closing drops the event bus, which ends the printer
    searcher.close()?;
    let _ = printer.join();
    result.map(|_| ())
}

fn search(searcher: &ImageSearcher, query: &str) -> Result<()> {
    let paths = searcher.search(query)?;
    if paths.is_empty() {
        println!("no matches");
    }
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn watch(searcher: ImageSearcher) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| pixseek::PixseekError::watcher(format!("cannot install Ctrl-C handler: {e}")))?;
    }

    let searcher = Arc::new(searcher);
    let events = searcher.subscribe();
    let watcher = ChangeWatcher::start(Arc::clone(&searcher))?;
    for root in watcher.roots() {
        println!("watching {}", root.display());
    }

    while running.load(Ordering::SeqCst) {
        if let Some(event) = events.recv_timeout(Duration::from_millis(200)) {
            print_event(&event);
        }
    }

    let report = watcher.stop()?;
    for event in events.drain() {
        print_event(&event);
    }
    println!(
        "stopped: {} ingested, {} failed, {} not yet started",
        report.ingested,
        report.failed,
        report.dropped.len()
    );
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let searcher = ImageSearcher::open(config)?;

    match cli.command {
        Commands::Ingest { path } => ingest(searcher, path),
        Commands::Search { query } => {
            search(&searcher, &query)?;
            searcher.close()
        }
        Commands::Remove { path } => {
            let removed = searcher.remove(&path)?;
            println!("removed {removed} captions for {}", path.display());
            searcher.close()
        }
        Commands::Export { file } => {
            let written = searcher.store().export_text(&file)?;
            println!("exported {written} captions to {}", file.display());
            searcher.close()
        }
        Commands::Watch => watch(searcher),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
