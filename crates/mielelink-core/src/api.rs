// ── Authenticated cloud access ──
//
// The background tasks never handle tokens. They call through `CloudApi`,
// whose production implementation pulls the bearer token from the
// session manager on every request.

use std::sync::Arc;

use async_trait::async_trait;

use mielelink_api::models::{
    ActionRequest, Acknowledgement, DeviceActions, DeviceBatch, Program, ProgramRequest,
};
use mielelink_api::{CloudClient, EventStream};

use crate::error::CoreError;
use crate::session::SessionManager;

/// Cloud operations used by the stream connector, poller, reconciler,
/// and command dispatcher.
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    async fn fetch_devices(&self) -> Result<DeviceBatch, CoreError>;

    async fn fetch_actions(&self, device_id: &str) -> Result<DeviceActions, CoreError>;

    async fn fetch_programs(&self, device_id: &str) -> Result<Vec<Program>, CoreError>;

    async fn put_action(
        &self,
        device_id: &str,
        request: &ActionRequest,
    ) -> Result<Acknowledgement, CoreError>;

    async fn put_program(
        &self,
        device_id: &str,
        request: &ProgramRequest,
    ) -> Result<Acknowledgement, CoreError>;

    /// Open the server-sent event stream for every device of the account.
    async fn open_events(&self) -> Result<EventStream, CoreError>;
}

/// [`CloudApi`] backed by a [`CloudClient`] and the live session.
pub struct CloudGateway {
    client: CloudClient,
    session: Arc<SessionManager>,
}

impl CloudGateway {
    pub fn new(client: CloudClient, session: Arc<SessionManager>) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl CloudApi for CloudGateway {
    async fn fetch_devices(&self) -> Result<DeviceBatch, CoreError> {
        let token = self.session.access_token()?;
        Ok(self.client.list_devices(&token).await?)
    }

    async fn fetch_actions(&self, device_id: &str) -> Result<DeviceActions, CoreError> {
        let token = self.session.access_token()?;
        Ok(self.client.list_actions(&token, device_id).await?)
    }

    async fn fetch_programs(&self, device_id: &str) -> Result<Vec<Program>, CoreError> {
        let token = self.session.access_token()?;
        Ok(self.client.list_programs(&token, device_id).await?)
    }

    async fn put_action(
        &self,
        device_id: &str,
        request: &ActionRequest,
    ) -> Result<Acknowledgement, CoreError> {
        let token = self.session.access_token()?;
        Ok(self.client.put_action(&token, device_id, request).await?)
    }

    async fn put_program(
        &self,
        device_id: &str,
        request: &ProgramRequest,
    ) -> Result<Acknowledgement, CoreError> {
        let token = self.session.access_token()?;
        Ok(self.client.put_program(&token, device_id, request).await?)
    }

    async fn open_events(&self) -> Result<EventStream, CoreError> {
        let token = self.session.access_token()?;
        Ok(self.client.open_event_stream(&token).await?)
    }
}

/// [`CloudApi`] that refuses every call. Used to replay recorded feed
/// events without a network.
pub struct OfflineCloud;

impl OfflineCloud {
    fn refuse<T>() -> Result<T, CoreError> {
        Err(CoreError::TransportError {
            message: "offline replay, no cloud access".into(),
        })
    }
}

#[async_trait]
impl CloudApi for OfflineCloud {
    async fn fetch_devices(&self) -> Result<DeviceBatch, CoreError> {
        Self::refuse()
    }

    async fn fetch_actions(&self, _device_id: &str) -> Result<DeviceActions, CoreError> {
        Self::refuse()
    }

    async fn fetch_programs(&self, _device_id: &str) -> Result<Vec<Program>, CoreError> {
        Self::refuse()
    }

    async fn put_action(
        &self,
        _device_id: &str,
        _request: &ActionRequest,
    ) -> Result<Acknowledgement, CoreError> {
        Self::refuse()
    }

    async fn put_program(
        &self,
        _device_id: &str,
        _request: &ProgramRequest,
    ) -> Result<Acknowledgement, CoreError> {
        Self::refuse()
    }

    async fn open_events(&self) -> Result<EventStream, CoreError> {
        Self::refuse()
    }
}
