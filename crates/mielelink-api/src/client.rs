// Cloud API HTTP client
//
// Wraps `reqwest::Client` with endpoint URL construction, bearer token
// injection, and the cloud's status-code conventions. Token exchange lives
// in `auth.rs` and the event stream in `sse.rs`, both as inherent methods
// on the same client.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::models::{
    Acknowledgement, ActionRequest, DeviceActions, DeviceBatch, MessageBody, Program,
    ProgramRequest,
};
use crate::transport::TransportConfig;

/// Production endpoint of the cloud API.
pub const DEFAULT_BASE_URL: &str = "https://api.mcs3.miele.com/";

/// Raw HTTP client for the cloud API.
///
/// Stateless with respect to credentials: every call takes the bearer
/// token explicitly, so the session layer above owns token lifetime.
#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    base_url: Url,
    locale: String,
}

impl CloudClient {
    /// Create a new client from a `TransportConfig`.
    ///
    /// `locale` is sent as the `language` query parameter and the
    /// `Accept-Language` header of the event stream.
    pub fn new(base_url: Url, locale: &str, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stream_http: transport.build_stream_client()?,
            base_url: normalize_base(base_url),
            locale: locale.to_owned(),
        })
    }

    /// Create a client from a pre-built `reqwest::Client` (used by tests).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client, locale: &str) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self {
            stream_http: http.clone(),
            http,
            base_url: normalize_base(base_url),
            locale: locale.to_owned(),
        })
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The locale requested from the cloud.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn stream_http(&self) -> &reqwest::Client {
        &self.stream_http
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Resolve an endpoint path relative to the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    fn device_endpoint(&self, device_id: &str, resource: &str) -> Result<Url, Error> {
        self.endpoint(&format!("v1/devices/{device_id}/{resource}"))
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// `GET v1/devices/?language=<locale>` -- every device of the account.
    pub async fn list_devices(&self, token: &SecretString) -> Result<DeviceBatch, Error> {
        let mut url = self.endpoint("v1/devices/")?;
        url.query_pairs_mut().append_pair("language", &self.locale);
        self.get_json(token, url).await
    }

    /// `GET v1/devices/{id}/actions` -- actions the device currently accepts.
    ///
    /// A 404 means the cloud does not know the device; that is reported as
    /// "all actions disabled" rather than an error.
    pub async fn list_actions(
        &self,
        token: &SecretString,
        device_id: &str,
    ) -> Result<DeviceActions, Error> {
        let url = self.device_endpoint(device_id, "actions")?;
        match self.get_json(token, url).await {
            Err(e) if e.is_not_found() => {
                info!(device = device_id, "device unknown to the cloud, disabling all actions");
                Ok(DeviceActions::all_disabled())
            }
            other => other,
        }
    }

    /// `GET v1/devices/{id}/programs?language=<locale>`.
    pub async fn list_programs(
        &self,
        token: &SecretString,
        device_id: &str,
    ) -> Result<Vec<Program>, Error> {
        let mut url = self.device_endpoint(device_id, "programs")?;
        url.query_pairs_mut().append_pair("language", &self.locale);
        self.get_json(token, url).await
    }

    /// `PUT v1/devices/{id}/actions`.
    pub async fn put_action(
        &self,
        token: &SecretString,
        device_id: &str,
        request: &ActionRequest,
    ) -> Result<Acknowledgement, Error> {
        let url = self.device_endpoint(device_id, "actions")?;
        self.put_json(token, url, request).await
    }

    /// `PUT v1/devices/{id}/programs`.
    pub async fn put_program(
        &self,
        token: &SecretString,
        device_id: &str,
        request: &ProgramRequest,
    ) -> Result<Acknowledgement, Error> {
        let url = self.device_endpoint(device_id, "programs")?;
        self.put_json(token, url, request).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
        token: &SecretString,
    ) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send a GET request and deserialize the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        token: &SecretString,
        url: Url,
    ) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .authorized(self.http.get(url), token)
            .send()
            .await
            .map_err(Error::Transport)?;

        let resp = check_status(resp).await?;
        parse_json(resp).await
    }

    /// Send a JSON body with PUT and interpret the acknowledgement.
    pub(crate) async fn put_json<B: Serialize + Sync>(
        &self,
        token: &SecretString,
        url: Url,
        body: &B,
    ) -> Result<Acknowledgement, Error> {
        debug!("PUT {}", url);

        let resp = self
            .authorized(self.http.put(url), token)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let resp = check_status(resp).await?;
        acknowledgement(resp).await
    }

    /// POST a JSON body and interpret the acknowledgement.
    pub(crate) async fn post_json<B: Serialize + Sync>(
        &self,
        token: &SecretString,
        url: Url,
        body: &B,
    ) -> Result<Acknowledgement, Error> {
        debug!("POST {}", url);

        let resp = self
            .authorized(self.http.post(url), token)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let resp = check_status(resp).await?;
        acknowledgement(resp).await
    }
}

// ── Response handling ────────────────────────────────────────────────

/// Pass successful responses through; map everything else onto [`Error`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let path = resp.url().path().to_owned();
    let body = resp.text().await.unwrap_or_default();
    Err(classify_error(status, &body, &path))
}

/// Map a non-success status and its body onto the error taxonomy.
pub(crate) fn classify_error(status: StatusCode, body: &str, path: &str) -> Error {
    let server_message = serde_json::from_str::<MessageBody>(body)
        .ok()
        .and_then(|b| b.message);

    match status {
        StatusCode::UNAUTHORIZED => Error::Authentication {
            message: server_message.unwrap_or_else(|| "OAuth2 access token has expired".into()),
        },
        StatusCode::NOT_FOUND => Error::NotFound { path: path.to_owned() },
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited,
        StatusCode::INTERNAL_SERVER_ERROR => Error::Server {
            status: 500,
            message: "Error 500: Internal Server Error.".into(),
        },
        StatusCode::GATEWAY_TIMEOUT => Error::Server {
            status: 504,
            message: "Error 504: Gateway timeout".into(),
        },
        s if s.is_server_error() => Error::Server {
            status: s.as_u16(),
            message: server_message.unwrap_or_else(|| format!("Error {}", s.as_u16())),
        },
        s => Error::Rejected {
            status: s.as_u16(),
            message: server_message.unwrap_or_else(|| {
                s.canonical_reason()
                    .map_or_else(|| format!("HTTP {}", s.as_u16()), str::to_owned)
            }),
        },
    }
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = resp.text().await.map_err(Error::Transport)?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

async fn acknowledgement(resp: reqwest::Response) -> Result<Acknowledgement, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;

    if let Some(message) = serde_json::from_str::<MessageBody>(&body)
        .ok()
        .and_then(|b| b.message)
    {
        debug!(message = %message, "cloud returned information");
        return Ok(Acknowledgement::Message(message));
    }

    Ok(match status {
        StatusCode::ACCEPTED => Acknowledgement::Accepted,
        StatusCode::NO_CONTENT => Acknowledgement::NoContent,
        _ => Acknowledgement::Ok,
    })
}

fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn well_known_server_errors_use_fixed_texts() {
        let err = classify_error(StatusCode::INTERNAL_SERVER_ERROR, "", "/v1/devices/");
        assert_eq!(err.to_string(), "Error 500: Internal Server Error.");

        let err = classify_error(StatusCode::GATEWAY_TIMEOUT, "<html>", "/v1/devices/");
        assert_eq!(err.to_string(), "Error 504: Gateway timeout");
    }

    #[test]
    fn bad_request_carries_the_server_message() {
        let err = classify_error(StatusCode::BAD_REQUEST, r#"{"message":"busy"}"#, "/x");
        assert!(matches!(err, Error::Rejected { status: 400, ref message } if message == "busy"));
    }

    #[test]
    fn unauthorized_and_rate_limit_are_typed() {
        assert!(classify_error(StatusCode::UNAUTHORIZED, "", "/x").is_auth());
        assert!(matches!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, "", "/x"),
            Error::RateLimited
        ));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = normalize_base(Url::parse("http://localhost:8080/api").unwrap());
        assert_eq!(url.as_str(), "http://localhost:8080/api/");
    }
}
