//! nimpkgdir - Nim package directory service

use anyhow::Result;
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};

use nimpkgdir::cli::{Cli, Commands};
use nimpkgdir::state::{AppState, SharedState, State};
use nimpkgdir::{cache, logging, manifest, poller, scanner, server};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_config());

    let result = match &cli.command {
        Commands::Serve(args) => cmd_serve(&cli, args.host.clone(), args.port),
        Commands::PollOnce => cmd_poll_once(&cli),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Load everything from disk and build the shared state handle.
async fn bootstrap(cli: &Cli, client: &reqwest::Client) -> Result<SharedState> {
    let config = cli.to_config()?;
    std::fs::create_dir_all(&config.workspace)?;
    let shared = AppState::new(config, State::default());

    poller::ensure_local_manifest(&shared, client).await?;

    let mut state = shared.lock();
    state.history = cache::load_history(&shared.config.cache_file);
    state.manifest = manifest::ManifestStore::load_file(&shared.config.packages_file)?;
    tracing::info!(packages = state.manifest.len(), "manifest loaded");
    scanner::scan(&mut state, &shared.config.workspace);
    drop(state);

    Ok(shared)
}

fn cmd_serve(cli: &Cli, host: String, port: u16) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let shared = bootstrap(cli, &client).await?;

        tokio::spawn(poller::run(shared.clone(), client));

        server::run_server(shared, server::ServerConfig { host, port }).await?;
        Ok(())
    })
}

fn cmd_poll_once(cli: &Cli) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let shared = bootstrap(cli, &client).await?;
        let outcome = poller::tick(&shared, &client).await?;
        tracing::info!(?outcome, "poll finished");
        Ok(())
    })
}
