use backupd::engine::config::EngineConfig;
use backupd::engine::orchestrator::Orchestrator;
use backupd::engine::result_error::error::Error;
use backupd::engine::result_error::WithMsg;
use backupd::engine::scheduler::Scheduler;
use clap::Parser;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use tracing::error;
use validator::Validate;

/// Backup orchestration daemon: runs configured jobs on their recurrence,
/// applies post-processing, and enforces retention
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let res = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, EngineConfig>(f)
                .map_err(Error::from)
                .with_msg(format!("Parse YAML config failed: {:?}", &args.config))
        })
        .and_then(|config| {
            config
                .validate()
                .map_err(Error::from)
                .map(|_| config)
                .with_msg(format!("Config validation failed: {:?}", &args.config))
        })
        .and_then(|config| {
            let orchestrator = Orchestrator::from_config(&config)?;
            let scheduler = Scheduler::start(orchestrator, *config.poll_interval())?;
            scheduler.join();
            Ok(())
        });

    match res {
        Ok(_) => error!("Scheduler loop should never stop without an error"),
        Err(e) => error!("{e}"),
    }

    exit(1);
}
