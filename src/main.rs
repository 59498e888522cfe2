//! fleetshell CLI
//!
//! Runs one command on a host described by a JSON parameter file and prints
//! its normalized output.
//!
//! ```text
//! fleetshell [--dump] <target.json> <command>...
//! ```
//!
//! Settings are read from the file named by `FLEETSHELL_CONFIG`, if set.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use fleetshell::{
    dump_output, init_logging, parse, ConnectionParameters, RusshTransport, SessionCache,
    SessionSettings,
};
use tracing::error;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const CONFIG_ENV: &str = "FLEETSHELL_CONFIG";

struct Args {
    dump: bool,
    target: PathBuf,
    command: String,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut rest = args.as_slice();
    let mut dump = false;

    while let Some((flag, tail)) = rest.split_first() {
        match flag.as_str() {
            "--version" | "-V" => {
                println!("fleetshell {}", VERSION);
                std::process::exit(0);
            }
            "--dump" => dump = true,
            _ => break,
        }
        rest = tail;
    }

    let (target, command) = rest.split_first()?;
    if command.is_empty() {
        return None;
    }

    Some(Args {
        dump,
        target: PathBuf::from(target),
        command: command.join(" "),
    })
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match std::env::var_os(CONFIG_ENV) {
        Some(path) => SessionSettings::load(&PathBuf::from(path)).await?,
        None => SessionSettings::default(),
    };

    let content = tokio::fs::read_to_string(&args.target).await?;
    let params: ConnectionParameters = serde_json::from_str(&content)?;

    let resource_dir = settings.resource_dir();
    let cache = SessionCache::new(Arc::new(RusshTransport::new()), settings);
    let session = cache.get_session(&params).await?;

    let output = parse(&session.run_direct(&args.command).await?);
    println!("{}", output);

    if args.dump {
        let path = dump_output(&resource_dir, &output).await?;
        eprintln!("Output written to {}", path.display());
    }

    cache.close_all().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let Some(args) = parse_args() else {
        eprintln!("usage: fleetshell [--dump] <target.json> <command>...");
        return ExitCode::from(2);
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
