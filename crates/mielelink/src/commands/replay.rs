//! `mielelink replay`: run recorded device/action events through the
//! reconciler offline and print the resulting tree.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{info, warn};

use mielelink_api::models::{ActionBatch, DeviceBatch};
use mielelink_api::{DEFAULT_BASE_URL, OAuthCredentials};
use mielelink_core::{
    DebounceConfig, FeedEvent, MemoryStateTree, NodeChange, ServiceConfig, StateSink,
};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output::Printer;

/// One recorded event, named like the stream events.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum RecordedEvent {
    Devices(DeviceBatch),
    Actions(ActionBatch),
}

impl From<RecordedEvent> for FeedEvent {
    fn from(event: RecordedEvent) -> Self {
        match event {
            RecordedEvent::Devices(batch) => Self::Devices(batch),
            RecordedEvent::Actions(batch) => Self::Actions(batch),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordedFile {
    Many(Vec<RecordedEvent>),
    One(RecordedEvent),
}

pub async fn handle(args: ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut events = Vec::new();
    for path in &args.files {
        events.extend(read_events(path)?);
    }
    info!(events = events.len(), files = args.files.len(), "replaying");

    let config = offline_config(&args)?;
    let printer = Printer::new(global.output, global.color, global.quiet);
    let tree = Arc::new(MemoryStateTree::new());
    let mut changes = tree.subscribe();

    mielelink_core::replay(Arc::clone(&tree) as Arc<dyn StateSink>, &config, events).await;

    if args.summary {
        for path in tree.paths() {
            if let Some(value) = tree.value(&path) {
                printer.change(&NodeChange { path, value });
            }
        }
    } else {
        loop {
            match changes.try_recv() {
                Ok(change) => printer.change(&change),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "too many changes buffered, use --summary");
                }
                Err(_) => break,
            }
        }
    }
    Ok(())
}

fn read_events(path: &Path) -> Result<Vec<FeedEvent>, CliError> {
    let raw = std::fs::read_to_string(path)?;
    let file: RecordedFile =
        serde_json::from_str(&raw).map_err(|source| CliError::ReplayFile {
            path: path.display().to_string(),
            source,
        })?;
    let events = match file {
        RecordedFile::Many(events) => events.into_iter().map(FeedEvent::from).collect(),
        RecordedFile::One(event) => vec![event.into()],
    };
    Ok(events)
}

/// Replay never logs in, so the credentials stay empty.
fn offline_config(args: &ReplayArgs) -> Result<ServiceConfig, CliError> {
    let base_url = DEFAULT_BASE_URL
        .parse()
        .map_err(|e| CliError::Internal(format!("default base URL: {e}")))?;
    let credentials = OAuthCredentials {
        client_id: String::new(),
        client_secret: SecretString::from(String::new()),
        username: String::new(),
        password: SecretString::from(String::new()),
        country: String::new(),
    };
    let mut config = ServiceConfig::new(base_url, credentials, args.locale.clone());
    config.debounce = DebounceConfig {
        enabled: args.debounce,
        window: Duration::from_millis(args.debounce_window_ms),
        ..DebounceConfig::default()
    };
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn single_record_and_arrays_both_parse() {
        let mut one = tempfile::NamedTempFile::new().unwrap();
        write!(one, r#"{{"event":"actions","data":{{"D1":{{"powerOn":true}}}}}}"#).unwrap();
        let events = read_events(one.path()).unwrap();
        assert!(matches!(events.as_slice(), [FeedEvent::Actions(_)]));

        let mut many = tempfile::NamedTempFile::new().unwrap();
        write!(
            many,
            r#"[{{"event":"devices","data":{{"D1":{{"ident":{{}},"state":{{}}}}}}}},
                {{"event":"actions","data":{{}}}}]"#
        )
        .unwrap();
        let events = read_events(many.path()).unwrap();
        assert!(matches!(
            events.as_slice(),
            [FeedEvent::Devices(_), FeedEvent::Actions(_)]
        ));
    }

    #[test]
    fn unknown_event_names_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"event":"ping","data":{{}}}}"#).unwrap();
        assert!(matches!(
            read_events(file.path()),
            Err(CliError::ReplayFile { .. })
        ));
    }
}
