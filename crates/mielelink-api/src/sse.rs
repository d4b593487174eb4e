//! Server-sent event stream.
//!
//! Opens `GET v1/devices/all/events` and yields one [`SseFrame`] per
//! dispatched event. The cloud uses four named channels: `devices`,
//! `actions`, `ping`, and `error`. Reconnection is the caller's concern;
//! this module only reports that the stream ended or failed.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};

use crate::client::{CloudClient, check_status};
use crate::error::Error;

const EVENTS_PATH: &str = "v1/devices/all/events";

/// Stream of parsed frames. Ends when the server closes the connection.
pub type EventStream = BoxStream<'static, Result<SseFrame, Error>>;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `"message"` when the server sent no `event:` field.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

impl CloudClient {
    /// Perform the event stream handshake and return the frame stream.
    ///
    /// Non-success handshakes are mapped through the same status taxonomy
    /// as REST calls, so a refused token surfaces as
    /// [`Error::Authentication`].
    pub async fn open_event_stream(&self, token: &SecretString) -> Result<EventStream, Error> {
        let url = self.endpoint(EVENTS_PATH)?;
        debug!("GET {} (event stream)", url);

        let resp = self
            .stream_http()
            .get(url)
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::ACCEPT_LANGUAGE, self.locale())
            .send()
            .await
            .map_err(|e| Error::EventStream(e.to_string()))?;

        let resp = check_status(resp).await?;
        let bytes = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = SseParser::default();
            futures_util::pin_mut!(bytes);

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        trace!(len = chunk.len(), "event stream chunk");
                        for frame in parser.feed(&chunk) {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        yield Err(Error::EventStream(e.to_string()));
                        break;
                    }
                }
            }
            debug!("event stream ended");
        };

        Ok(stream.boxed())
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Incremental SSE parser.
///
/// Bytes are buffered until a blank line terminates an event. `\r\n` and
/// `\r` line endings are normalized, including a `\r\n` pair split across
/// chunks. Invalid UTF-8 is replaced with U+FFFD. Comment lines (leading
/// `:`) and `id:`/`retry:` fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl SseParser {
    /// Feed raw bytes and return every frame completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.push_text(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.push_text(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.push_text("\u{FFFD}");
                            rest = &after[len..];
                        }
                        // A chunk boundary split a multi-byte character.
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            match ch {
                '\r' => {
                    self.buffer.push('\n');
                    self.last_was_cr = true;
                }
                '\n' => {
                    if !self.last_was_cr {
                        self.buffer.push('\n');
                    }
                    self.last_was_cr = false;
                }
                _ => {
                    self.buffer.push(ch);
                    self.last_was_cr = false;
                }
            }
        }
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_owned()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }

    Some(SseFrame {
        event: event.unwrap_or_else(|| "message".into()),
        data: data.join("\n"),
    })
}
