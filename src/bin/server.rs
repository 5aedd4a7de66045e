//! smallpack daemon
//!
//! Loads the configuration, runs the flush loop and serves host calls over
//! TCP until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use smallpack::network::Server;
use smallpack::{Config, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// Small-file packer daemon
#[derive(Parser, Debug)]
#[command(name = "smallpackd")]
#[command(about = "Packs small files into verified archive containers")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Run a single flush tick and exit
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("smallpackd: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,smallpack={}", config.log_level)));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("smallpack v{} [{}]", smallpack::VERSION, config.script_id);
    tracing::info!("Working directory: {}", config.working_dir.display());
    for rejected in &config.rejected_bins {
        tracing::warn!("Bin definition {} ignored: {}", rejected.name, rejected.reason);
    }

    let engine = match Engine::open(config.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.once {
        let code = match engine.tick() {
            Ok(report) => {
                tracing::info!("Tick: {}", report);
                ExitCode::SUCCESS
            }
            Err(e) => {
                tracing::error!("Tick failed: {}", e);
                ExitCode::FAILURE
            }
        };
        return close(&engine, code);
    }

    let server = match Server::bind(&config, Arc::clone(&engine)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let shutdown = server.shutdown_handle();

    let handler_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal, stopping...");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        tracing::error!("Cannot install signal handler: {}", e);
        return ExitCode::FAILURE;
    }

    let flush_engine = Arc::clone(&engine);
    let flush_flag = Arc::clone(&shutdown);
    let flush_loop = thread::Builder::new()
        .name("flush-loop".to_string())
        .spawn(move || {
            let result = flush_engine.run(&flush_flag);
            // A fatal flush loop takes the server down with it
            flush_flag.store(true, Ordering::SeqCst);
            result
        });
    let flush_loop = match flush_loop {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Cannot start flush loop: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut code = ExitCode::SUCCESS;
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        shutdown.store(true, Ordering::SeqCst);
        code = ExitCode::FAILURE;
    }

    match flush_loop.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!("Flush loop failed: {}", e);
            code = ExitCode::FAILURE;
        }
        Err(_) => {
            tracing::error!("Flush loop panicked");
            code = ExitCode::FAILURE;
        }
    }

    close(&engine, code)
}

fn close(engine: &Engine, code: ExitCode) -> ExitCode {
    if let Err(e) = engine.close() {
        tracing::error!("Failed to sync journals: {}", e);
        return ExitCode::FAILURE;
    }
    tracing::info!("Stopped");
    code
}
