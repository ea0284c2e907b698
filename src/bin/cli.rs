//! zotrm CLI
//!
//! Send tagged Zotero papers to a reMarkable tablet and pull annotations back.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zotrm::config::{Config, CONFIG_ENV};
use zotrm::device::Rmapi;
use zotrm::library::ZoteroClient;
use zotrm::sync::{
    AnnotationTool, CommandTransform, PageTransform, Remarks, SyncDirection, SyncEngine,
    SyncOptions,
};

#[derive(Parser)]
#[command(name = "zotrm")]
#[command(about = "Send papers from Zotero to reMarkable tablet and pull annotations back")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// More output (-v for progress, -vv for every device call)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Rotate pages to landscape before uploading
    #[arg(short, long)]
    landscape: bool,

    /// Show what would happen without changing the tablet or the library
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Only send papers to the tablet
    #[arg(short, long, conflicts_with = "pull_only")]
    send_only: bool,

    /// Only pull annotations from the tablet
    #[arg(short, long)]
    pull_only: bool,
}

impl Cli {
    fn direction(&self) -> SyncDirection {
        if self.send_only {
            SyncDirection::OutboundOnly
        } else if self.pull_only {
            SyncDirection::InboundOnly
        } else {
            SyncDirection::Both
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "zotrm=warn",
        1 => "zotrm=info",
        _ => "zotrm=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    let library = ZoteroClient::new(&config.zotero).context("creating Zotero client")?;
    let device = Rmapi::new(&config.rmapi.path);
    let remarks = config.remarks.clone().map(Remarks::new);
    let transform = cli
        .landscape
        .then(|| CommandTransform::new(config.transform.clone().unwrap_or_default()));

    let engine = SyncEngine::new(&config, &library, &device)
        .with_tool(remarks.as_ref().map(|r| r as &dyn AnnotationTool))
        .with_transform(transform.as_ref().map(|t| t as &dyn PageTransform));

    let report = engine.run(SyncOptions {
        direction: cli.direction(),
        dry_run: cli.dry_run,
    })?;

    if cli.dry_run {
        println!("Dry run: {}", report);
    } else {
        println!("{}", report);
    }
    Ok(!report.has_failures())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        // Per-paper failures were already logged
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("zotrm: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
