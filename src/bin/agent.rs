use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mongowatch::{
    actors::controller::{Collaborators, Controller, ControllerOptions, SignalListener},
    api::ApiClient,
    config::{Overrides, read_config_file},
    error::MonitorError,
    util::{get_api_host, get_api_key},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Poll MongoDB servers and forward their statistics to the monitoring API
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// API key (overrides the config file)
    #[arg(short = 'k', long)]
    apikey: Option<String>,

    /// Update frequency in seconds: 5, 15, 60, 300, 900, 3600 or 21600
    #[arg(short, long)]
    frequency: Option<u64>,

    /// Alternate API endpoint
    #[arg(short = 'a', long)]
    apihost: Option<String>,

    /// Stop at the first error instead of retrying
    #[arg(short, long)]
    debug: bool,

    /// Log every submitted sample
    #[arg(short, long)]
    verbose: bool,
}

fn init(args: &Args) {
    let level = if args.debug {
        LevelFilter::TRACE
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let filter = filter::Targets::new().with_targets(vec![
        ("mongowatch", level),
        ("mongowatch_agent", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(&args);
    trace!("started with args: {args:?}");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = read_config_file(&args.config)?;

    let overrides = Overrides {
        api_key: args.apikey.clone().or_else(get_api_key),
        api_host: args.apihost.clone().or_else(get_api_host),
        frequency: args.frequency,
    };
    let settings = config.resolve(overrides)?;
    info!("update frequency set to {}s", settings.frequency);

    // Handlers go in before any worker exists
    let mut signals = SignalListener::register()?;

    let api = Arc::new(ApiClient::new(&settings.api_host, &settings.api_key)?);
    let options = ControllerOptions {
        verbose: args.verbose,
        debug: args.debug,
        ..Default::default()
    };

    let controller = match Controller::start_interruptible(
        settings.services,
        Collaborators::mongo(api),
        options,
        &mut signals,
    )
    .await
    {
        Ok(controller) => controller,
        Err(MonitorError::Interrupted(signal)) => {
            info!("{signal} received before monitoring started, exiting");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    if controller.worker_count() == 0 {
        anyhow::bail!("no service could be started, nothing will be monitored");
    }
    info!("monitoring {}", controller.services().join(", "));

    let exits = controller.run(signals).await;
    let fatal = exits.iter().filter(|exit| exit.is_fatal()).count();
    info!("{} workers joined, {fatal} of them had died", exits.len());

    Ok(())
}
