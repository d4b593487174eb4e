// OAuth2 token exchange
//
// Password grant for the initial login, refresh grant for renewal, and the
// best-effort logout call. Both grants POST form-encoded bodies to the same
// token endpoint; the access token returned is what every other call sends
// as `Authorization: Bearer`.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::{CloudClient, check_status};
use crate::error::Error;
use crate::models::Acknowledgement;

const TOKEN_PATH: &str = "thirdparty/token/";
const LOGOUT_PATH: &str = "thirdparty/logout/";

/// Account and application credentials for the password grant.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
    /// Country code of the account (`vg`, e.g. `de-DE`).
    pub country: String,
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl CloudClient {
    /// Exchange account credentials for a token pair (password grant).
    ///
    /// A 401 means the credentials were refused and surfaces as
    /// [`Error::Authentication`]; callers decide whether anything else is
    /// worth retrying.
    pub async fn password_grant(&self, creds: &OAuthCredentials) -> Result<TokenResponse, Error> {
        let form = [
            ("grant_type", "password"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.expose_secret()),
            ("username", creds.username.as_str()),
            ("password", creds.password.expose_secret()),
            ("vg", creds.country.as_str()),
        ];
        debug!(username = %creds.username, "requesting token via password grant");
        self.token_request(&form).await
    }

    /// Renew the token pair with a refresh token.
    pub async fn refresh_grant(
        &self,
        creds: &OAuthCredentials,
        refresh_token: &SecretString,
    ) -> Result<TokenResponse, Error> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
        ];
        debug!("requesting token via refresh grant");
        self.token_request(&form).await
    }

    /// Invalidate `token` on the server. Best effort: callers log and move on.
    pub async fn logout(&self, token: &SecretString) -> Result<Acknowledgement, Error> {
        let url = self.endpoint(LOGOUT_PATH)?;
        let body = json!({ "token": token.expose_secret() });
        self.post_json(token, url, &body).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let url = self.endpoint(TOKEN_PATH)?;
        debug!("POST {}", url);

        let resp = self
            .http()
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json;charset=utf-8")
            .form(form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let resp = check_status(resp).await?;
        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            // Never echo a body that may hold tokens.
            body: String::new(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_output_is_redacted() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"DE_abc","refresh_token":"DE_def","expires_in":3600}"#,
        )
        .unwrap();
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("DE_abc"));
        assert!(!rendered.contains("DE_def"));
        assert_eq!(token.token_type, "Bearer");
    }
}
