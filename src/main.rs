use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use package_harvester::cli::{Cli, Command, FetchArgs, RateLimitArgs};
use package_harvester::client::{ClientOptions, GithubClient};
use package_harvester::config::Config;
use package_harvester::context::RunContext;
use package_harvester::harvest::{
    CancellationCoordinator, GitCli, HarvestPipeline, OutcomeLog, PipelineOptions,
};
use package_harvester::model::RetrievalMode;
use package_harvester::sources::load_candidates;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbose, cli.quiet);

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Fetch(args) => {
            tracing::info!(ecosystem = ?args.ecosystem, mode = ?args.mode, "Starting fetch");
            fetch(config, args).await?;
        }
        Command::RateLimit(args) => rate_limit(config, args).await?,
    }

    Ok(())
}

fn init_logging(verbosity: u8, quiet: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if quiet {
        "error"
    } else {
        match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("package_harvester={}", level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn build_client(config: &Config, token: Option<&str>) -> Result<GithubClient> {
    let token = config.resolve_token(token)?;
    if token.is_none() {
        tracing::warn!("No GitHub token configured, requests are unauthenticated");
    }
    GithubClient::new(ClientOptions {
        api_base: config.github.api_base.clone(),
        token,
        user_agent: config.github.user_agent.clone(),
        request_timeout: Duration::from_secs(config.github.request_timeout_secs),
    })
    .context("Failed to build HTTP client")
}

async fn fetch(mut config: Config, args: FetchArgs) -> Result<()> {
    // Flags override the file
    if let Some(output) = args.output {
        config.output.root = output;
    }
    if let Some(retries) = args.retries {
        config.clone.retries = retries;
    }
    if let Some(delay) = args.retry_delay {
        config.clone.retry_delay_secs = delay;
    }
    if let Some(n) = args.concurrency {
        config.crawl.concurrency = n;
    }
    if let Some(n) = args.clone_concurrency {
        config.clone.concurrency = n;
    }
    if args.recursive {
        config.crawl.recursive = true;
    }
    config.validate()?;

    let ecosystems = args.ecosystem.ecosystems();
    if args.input.is_some() && ecosystems.len() > 1 {
        bail!("--input needs a single --ecosystem");
    }
    let mode = RetrievalMode::from(args.mode);

    let client = Arc::new(build_client(&config, args.token.as_deref())?);
    let git = Arc::new(
        GitCli::new(&config.clone.git_program)
            .with_timeout(config.clone.timeout_secs.map(Duration::from_secs)),
    );
    let coordinator = Arc::new(CancellationCoordinator::new(Arc::new(RunContext::new())));
    let _interrupts = coordinator.listen();

    let options = PipelineOptions {
        api_base: config.github.api_base.clone(),
        recursive: config.crawl.recursive,
        max_depth: config.crawl.max_depth,
        listing_concurrency: config.crawl.concurrency,
        clone_concurrency: config.clone_concurrency(),
    };
    let mut pipeline = HarvestPipeline::new(
        Arc::clone(&client),
        git,
        config.retry_strategy(),
        Arc::clone(&coordinator),
        config.output.root.clone(),
    )
    .with_options(options);

    if mode == RetrievalMode::Clone {
        let path = config.outcome_log_path();
        let log = OutcomeLog::open(&path)
            .with_context(|| format!("Failed to open outcome log '{}'", path.display()))?;
        pipeline = pipeline.with_outcome_log(Arc::new(log));
    }

    for ecosystem in ecosystems {
        if coordinator.context().is_cancelled() {
            break;
        }

        let candidates = match &args.input {
            Some(input) => load_candidates(input, &client)
                .await
                .with_context(|| format!("Failed to load candidates from '{}'", input))?,
            None => {
                let source = config.source_for(ecosystem);
                match load_candidates(&source, &client).await {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        tracing::error!(
                            %ecosystem,
                            error = %e,
                            "Skipping ecosystem, cannot load candidates"
                        );
                        continue;
                    }
                }
            }
        };

        let summary = pipeline.run(ecosystem, candidates, mode).await;
        println!("{}", summary);
    }

    if coordinator.context().is_cancelled() {
        eprintln!(
            "Interrupted; completed results are kept under {}",
            config.output.root.display()
        );
    }
    Ok(())
}

async fn rate_limit(config: Config, args: RateLimitArgs) -> Result<()> {
    let client = build_client(&config, args.token.as_deref())?;
    let quota = client
        .rate_limit()
        .await
        .context("Failed to query rate limit")?;
    println!("{}", serde_json::to_string_pretty(&quota)?);
    Ok(())
}
