//! manifest-sniffer - find the HLS manifests a web page fetches.
//!
//! CLI entry point.

use clap::Parser;
use manifest_sniffer::console::ConsoleOutput;
use manifest_sniffer::server::{self, AppState};
use manifest_sniffer::session::ChromiumLauncher;
use manifest_sniffer::{
    Commands, Config, EmptyResultMode, ExtractResponse, Extraction, ManifestFile, ServeConfig,
    SetupConfig, SniffConfig, Sniffer, SnifferError,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// `sniff` exit code when the page loaded but had no manifest.
const EXIT_NOT_FOUND: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.verbose {
            EnvFilter::new("manifest_sniffer=debug,tower_http=debug,info")
        } else {
            EnvFilter::new("manifest_sniffer=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match config.command {
        Commands::Serve(serve_config) => run_serve(serve_config).await,
        Commands::Sniff(sniff_config) => run_sniff(sniff_config).await,
        Commands::Setup(setup_config) => run_setup(setup_config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

async fn run_serve(serve_config: ServeConfig) -> Result<(), ExitCode> {
    let launcher = Arc::new(ChromiumLauncher::new(serve_config.browser.launch_options()));
    let sniffer = match Sniffer::new(launcher, serve_config.sniffer_options()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create sniffer: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if let Some(limit) = serve_config.max_sessions {
        info!("Browser sessions capped at {}", limit);
    }

    let state = AppState {
        sniffer: Arc::new(sniffer),
        policy: serve_config.response_policy(),
    };

    if let Err(e) = server::serve(&serve_config.bind_addr(), state).await {
        error!("Server error: {}", e);
        return Err(ExitCode::FAILURE);
    }

    Ok(())
}

async fn run_sniff(sniff_config: SniffConfig) -> Result<(), ExitCode> {
    let console = ConsoleOutput::new(sniff_config.json);
    let target = sniff_config.target();

    let launcher = Arc::new(ChromiumLauncher::new(sniff_config.browser.launch_options()));
    let sniffer = match Sniffer::new(launcher, sniff_config.browser.sniffer_options(None)) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create sniffer: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    console.print_start(&target);
    let spinner = console.spinner("Watching network traffic...");
    let start = Instant::now();

    // Dropping the extraction on a signal drops the Browser, which kills Chrome
    let extraction = tokio::select! {
        extraction = sniffer.extract(Some(target.as_str())) => extraction,
        _ = server::shutdown_signal() => {
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }
            eprintln!("\nSignal received, closing browser...");
            return Err(ExitCode::from(130));
        }
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    if sniff_config.json {
        let body = ExtractResponse::from_extraction(&extraction, EmptyResultMode::NotFound);
        match serde_json::to_string_pretty(&body) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("{}", SnifferError::from(e));
                return Err(ExitCode::FAILURE);
            }
        }
    } else {
        console.print_extraction(&extraction, start.elapsed());
    }

    match extraction {
        Extraction::Found(streams) => {
            if let Some(ref output_path) = sniff_config.output {
                let file = ManifestFile::new(&streams, chrono::Utc::now().timestamp());
                if let Err(e) = file.write_to(output_path) {
                    error!("Failed to write output file: {}", e);
                    return Err(ExitCode::FAILURE);
                }
                console.print_info(&format!("Saved {}", output_path.display()));
            }
            Ok(())
        }
        Extraction::NotFound => Err(ExitCode::from(EXIT_NOT_FOUND)),
        Extraction::Failed(_) => Err(ExitCode::FAILURE),
    }
}

async fn run_setup(setup_config: SetupConfig) -> Result<(), ExitCode> {
    eprintln!("Setting up Chromium browser...");
    match manifest_sniffer::browser::download_chrome(setup_config.force).await {
        Ok(path) => {
            eprintln!("Chromium ready at: {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Setup failed: {}", e);
            Err(ExitCode::FAILURE)
        }
    }
}
