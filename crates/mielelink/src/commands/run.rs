//! `mielelink run`: mirror the account into an in-memory tree until
//! interrupted, printing changes and executing write intents from stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use mielelink_config::{Profile, UpdateMode};
use mielelink_core::{
    Command, Controller, MemoryStateTree, ServiceConfig, ServiceStatus, StateSink,
};

use crate::cli::{GlobalOpts, RunArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output::{self, Printer};

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = service_config(&args, global)?;
    let printer = Printer::new(global.output, global.color, global.quiet);

    let tree = Arc::new(MemoryStateTree::new());
    let controller = Controller::new(config, Arc::clone(&tree) as Arc<dyn StateSink>);
    let mut changes = tree.subscribe();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        result = controller.connect() => {
            if let Err(e) = result {
                controller.shutdown().await;
                return Err(e.into());
            }
        }
        _ = &mut ctrl_c => {
            info!("interrupted during login");
            controller.shutdown().await;
            return Ok(());
        }
    }

    let mut status = controller.status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = !args.no_stdin;
    let mut failure = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if let ServiceStatus::Failed(reason) = current {
                    failure = Some(reason);
                    break;
                }
            }
            change = changes.recv() => match change {
                Ok(change) => printer.change(&change),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind, changes dropped"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => write_intent(&controller, &printer, &line).await,
                Ok(None) => {
                    debug!("stdin closed, no more write intents");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "could not read stdin, ignoring it from now on");
                    stdin_open = false;
                }
            },
        }
    }

    controller.shutdown().await;
    match failure {
        Some(reason) => Err(CliError::ServiceFailed { reason }),
        None => Ok(()),
    }
}

/// Execute one `path=value` line. Errors are reported, never fatal.
async fn write_intent(controller: &Controller, printer: &Printer, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    let Some((path, raw)) = line.split_once('=') else {
        warn!(line, "expected path=value");
        return;
    };
    let path = path.trim();
    let command = match Command::from_path(path, output::parse_value(raw)) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "ignoring write intent");
            return;
        }
    };
    match controller.execute(command).await {
        Ok(outcome) => printer.outcome(path, &outcome),
        Err(e) => warn!(path, error = %e, "command failed"),
    }
}

/// Profile values with the CLI overrides applied on top.
fn service_config(args: &RunArgs, global: &GlobalOpts) -> Result<ServiceConfig, CliError> {
    let cfg = util::load_config(global)?;
    let (name, mut profile) = util::active_profile(global, &cfg)?;
    apply_overrides(&mut profile, args);
    Ok(mielelink_config::profile_to_service_config(
        &profile,
        &name,
        &cfg.defaults,
    )?)
}

fn apply_overrides(profile: &mut Profile, args: &RunArgs) {
    if let Some(url) = &args.base_url {
        profile.base_url = Some(url.clone());
    }
    if let Some(locale) = &args.locale {
        profile.locale = Some(locale.clone());
    }
    if args.poll {
        profile.mode = UpdateMode::Poll;
    }
    if let Some(secs) = args.poll_interval {
        profile.mode = UpdateMode::Poll;
        profile.poll_interval = secs;
        profile.poll_unit = 1;
    }
    if args.debounce {
        profile.debounce = true;
    }
}
