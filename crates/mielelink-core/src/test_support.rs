// Scripted collaborators shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use mielelink_api::models::{
    ActionBatch, ActionRequest, Acknowledgement, DeviceActions, DeviceBatch, Program,
    ProgramRequest,
};
use mielelink_api::{EventStream, OAuthCredentials, SseFrame, TokenResponse};

use crate::api::CloudApi;
use crate::config::SessionTiming;
use crate::error::CoreError;
use crate::presentation::{CommandHandler, NodeUpdate, StateSink};
use crate::session::{SessionManager, TokenEndpoint};

pub(crate) fn frame(event: &str, data: &str) -> Result<SseFrame, mielelink_api::Error> {
    Ok(SseFrame {
        event: event.into(),
        data: data.into(),
    })
}

/// A stream that yields `frames` and then stays open forever.
pub(crate) fn pending_after(frames: Vec<Result<SseFrame, mielelink_api::Error>>) -> EventStream {
    stream::iter(frames).chain(stream::pending()).boxed()
}

pub(crate) fn device_batch(json: serde_json::Value) -> DeviceBatch {
    serde_json::from_value(json).unwrap()
}

pub(crate) fn action_batch(json: serde_json::Value) -> ActionBatch {
    serde_json::from_value(json).unwrap()
}

// ── Tokens ───────────────────────────────────────────────────────

/// Grants a fresh one-hour token every time, unless refreshes are refused.
#[derive(Default)]
pub(crate) struct StaticTokens {
    pub password_grants: AtomicUsize,
    pub refresh_grants: AtomicUsize,
    pub refuse_refresh: AtomicBool,
}

#[async_trait]
impl TokenEndpoint for StaticTokens {
    async fn password_grant(
        &self,
        _creds: &OAuthCredentials,
    ) -> Result<TokenResponse, mielelink_api::Error> {
        self.password_grants.fetch_add(1, Ordering::SeqCst);
        Ok(token())
    }

    async fn refresh_grant(
        &self,
        _creds: &OAuthCredentials,
        _refresh_token: &SecretString,
    ) -> Result<TokenResponse, mielelink_api::Error> {
        self.refresh_grants.fetch_add(1, Ordering::SeqCst);
        if self.refuse_refresh.load(Ordering::SeqCst) {
            return Err(mielelink_api::Error::Authentication {
                message: "invalid_grant".into(),
            });
        }
        Ok(token())
    }

    async fn logout(&self, _token: &SecretString) -> Result<(), mielelink_api::Error> {
        Ok(())
    }
}

fn token() -> TokenResponse {
    serde_json::from_value(serde_json::json!({
        "access_token": "access",
        "refresh_token": "refresh",
        "token_type": "Bearer",
        "expires_in": 3600,
    }))
    .unwrap()
}

pub(crate) fn credentials() -> OAuthCredentials {
    OAuthCredentials {
        client_id: "client".into(),
        client_secret: SecretString::from("secret".to_string()),
        username: "user@example.com".into(),
        password: SecretString::from("password".to_string()),
        country: "de-DE".into(),
    }
}

pub(crate) fn session() -> Arc<SessionManager> {
    session_with(Arc::new(StaticTokens::default()))
}

pub(crate) fn session_with(tokens: Arc<StaticTokens>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        tokens,
        credentials(),
        SessionTiming::default(),
        CancellationToken::new(),
    ))
}

// ── Cloud ────────────────────────────────────────────────────────

/// In-memory [`CloudApi`] with scripted responses and call counters.
#[derive(Default)]
pub(crate) struct FakeCloud {
    pub devices: Mutex<Option<DeviceBatch>>,
    pub actions: Mutex<ActionBatch>,
    pub programs: Mutex<Option<Vec<Program>>>,
    /// Delay applied to every program fetch.
    pub program_latency: Mutex<Duration>,
    /// When set, writes fail with this message.
    pub put_error: Mutex<Option<String>>,
    /// Scripted handshake results; an empty queue refuses the connection.
    pub streams: Mutex<VecDeque<Result<EventStream, CoreError>>>,

    pub opens: AtomicUsize,
    pub device_fetches: AtomicUsize,
    pub action_fetches: AtomicUsize,
    pub program_fetches: AtomicUsize,
    pub action_puts: Mutex<Vec<(String, ActionRequest)>>,
    pub program_puts: Mutex<Vec<(String, ProgramRequest)>>,
}

impl FakeCloud {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push_stream(&self, stream: EventStream) {
        self.streams.lock().unwrap().push_back(Ok(stream));
    }

    pub(crate) fn push_open_error(&self, error: CoreError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    fn rejection(&self) -> Option<CoreError> {
        self.put_error
            .lock()
            .unwrap()
            .clone()
            .map(|message| CoreError::Rejected {
                status: 400,
                message,
            })
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn fetch_devices(&self) -> Result<DeviceBatch, CoreError> {
        self.device_fetches.fetch_add(1, Ordering::SeqCst);
        self.devices
            .lock()
            .unwrap()
            .clone()
            .ok_or(CoreError::ServerError {
                status: 503,
                message: "unavailable".into(),
            })
    }

    async fn fetch_actions(&self, device_id: &str) -> Result<DeviceActions, CoreError> {
        self.action_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .actions
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .unwrap_or_else(DeviceActions::all_disabled))
    }

    async fn fetch_programs(&self, _device_id: &str) -> Result<Vec<Program>, CoreError> {
        self.program_fetches.fetch_add(1, Ordering::SeqCst);
        let latency = *self.program_latency.lock().unwrap();
        tokio::time::sleep(latency).await;
        self.programs
            .lock()
            .unwrap()
            .clone()
            .ok_or(CoreError::TransportError {
                message: "connection reset".into(),
            })
    }

    async fn put_action(
        &self,
        device_id: &str,
        request: &ActionRequest,
    ) -> Result<Acknowledgement, CoreError> {
        self.action_puts
            .lock()
            .unwrap()
            .push((device_id.to_owned(), request.clone()));
        match self.rejection() {
            Some(e) => Err(e),
            None => Ok(Acknowledgement::NoContent),
        }
    }

    async fn put_program(
        &self,
        device_id: &str,
        request: &ProgramRequest,
    ) -> Result<Acknowledgement, CoreError> {
        self.program_puts
            .lock()
            .unwrap()
            .push((device_id.to_owned(), request.clone()));
        match self.rejection() {
            Some(e) => Err(e),
            None => Ok(Acknowledgement::Accepted),
        }
    }

    async fn open_events(&self) -> Result<EventStream, CoreError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(CoreError::TransportError {
                    message: "connection refused".into(),
                })
            })
    }
}

// ── Sink ─────────────────────────────────────────────────────────

/// [`StateSink`] that keeps every upsert in arrival order.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub updates: Mutex<Vec<NodeUpdate>>,
    pub connection: Mutex<Vec<bool>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every value written to `path`, in order.
    pub(crate) fn values(&self, path: &str) -> Vec<serde_json::Value> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.path == path)
            .filter_map(|u| u.value.clone())
            .collect()
    }

    /// Number of upserts of `path`, structural ones included.
    pub(crate) fn count(&self, path: &str) -> usize {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.path == path)
            .count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.updates.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl StateSink for RecordingSink {
    async fn upsert_node(&self, update: NodeUpdate) -> Result<(), CoreError> {
        self.updates.lock().unwrap().push(update);
        Ok(())
    }

    async fn notify_connection(&self, connected: bool) -> Result<(), CoreError> {
        self.connection.lock().unwrap().push(connected);
        Ok(())
    }

    fn on_command(&self, _handler: CommandHandler) {}
}
