//! Async client for the Miele 3rd-party cloud API.
//!
//! Three concerns live here:
//! - OAuth2 token exchange ([`auth`]): password grant, refresh grant, logout.
//! - REST calls ([`client`]): devices, actions, programs, and writes.
//! - The server-sent event stream ([`sse`]).
//!
//! Session lifetime, reconnection, and reconciliation are layered on top
//! by `mielelink-core`.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod sse;
pub mod transport;

pub use auth::{OAuthCredentials, TokenResponse};
pub use client::{CloudClient, DEFAULT_BASE_URL};
pub use error::Error;
pub use sse::{EventStream, SseFrame};
pub use transport::{TlsMode, TransportConfig};
