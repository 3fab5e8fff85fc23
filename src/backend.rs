//! Chat backend port
//!
//! One round trip per user message: `POST /chat` with `{ "message": ... }`,
//! answered by `{ "response": ..., "action"?: ..., "url"?: ..., "error"?: ... }`.
//! A non-2xx status or a populated `error` field is a failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Reply surfaced instead of a raw failure
pub const APOLOGY: &str = "I'm sorry, I'm having trouble connecting to my backend services. Please check your connection and try again.";

/// Action name that asks the front-end to open a URL
const OPEN_WEBSITE: &str = "open_website";

/// Side effect requested alongside a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAction {
    /// Open an external resource
    OpenResource { url: String },
}

/// A successful backend reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub response: String,
    pub action: Option<ReplyAction>,
}

impl ChatReply {
    /// Plain text reply without an action
    #[must_use]
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            action: None,
        }
    }
}

/// Remote conversational backend
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one user message and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns error on network failure, non-success status, or an error payload
    async fn send(&self, message: &str) -> Result<ChatReply>;

    /// Whether the backend answers its health check
    async fn health(&self) -> bool;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPayload {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ChatPayload {
    fn into_reply(self) -> Result<ChatReply> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Err(Error::Backend(error));
        }

        let response = self
            .response
            .ok_or_else(|| Error::Backend("reply has no response field".to_string()))?;

        let action = match (self.action.as_deref(), self.url) {
            (Some(OPEN_WEBSITE), Some(url)) if !url.is_empty() => {
                Some(ReplyAction::OpenResource { url })
            }
            (Some(other), _) if other != OPEN_WEBSITE => {
                tracing::debug!(action = other, "ignoring unknown reply action");
                None
            }
            _ => None,
        };

        Ok(ChatReply { response, action })
    }
}

/// Parse a `/chat` response body
///
/// # Errors
///
/// Returns error if the body is not JSON, carries an `error`, or lacks `response`
pub fn parse_reply(body: &str) -> Result<ChatReply> {
    let payload: ChatPayload = serde_json::from_str(body)?;
    payload.into_reply()
}

/// Backend reached over HTTP
pub struct HttpChatBackend {
    client: reqwest::Client,
    chat_url: Url,
    health_url: Url,
}

impl HttpChatBackend {
    /// Create a client for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |path: &str| {
            base.join(path)
                .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            chat_url: join("chat")?,
            health_url: join("health")?,
        })
    }

    #[must_use]
    pub const fn chat_url(&self) -> &Url {
        &self.chat_url
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send(&self, message: &str) -> Result<ChatReply> {
        tracing::debug!(url = %self.chat_url, chars = message.chars().count(), "sending chat message");

        let response = self
            .client
            .post(self.chat_url.clone())
            .json(&ChatRequest { message })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "backend returned error status");
            return Err(Error::Backend(format!("HTTP error! status: {status}")));
        }

        let body = response.text().await?;
        parse_reply(&body)
    }

    async fn health(&self) -> bool {
        match self.client.get(self.health_url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "backend health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_reply() {
        let reply = parse_reply(r#"{"response": "Lights are on"}"#).unwrap();
        assert_eq!(reply, ChatReply::text("Lights are on"));
    }

    #[test]
    fn open_website_action() {
        let reply = parse_reply(
            r#"{"response": "Opening Youtube for you", "action": "open_website", "url": "https://www.youtube.com"}"#,
        )
        .unwrap();
        assert_eq!(
            reply.action,
            Some(ReplyAction::OpenResource {
                url: "https://www.youtube.com".to_string()
            })
        );
    }

    #[test]
    fn open_website_without_url_is_ignored() {
        let reply = parse_reply(r#"{"response": "Hmm", "action": "open_website"}"#).unwrap();
        assert_eq!(reply.action, None);
    }

    #[test]
    fn null_action_is_none() {
        let reply = parse_reply(r#"{"response": "ok", "action": null}"#).unwrap();
        assert_eq!(reply.action, None);
    }

    #[test]
    fn error_field_is_failure() {
        let err = parse_reply(r#"{"error": "No message provided"}"#).unwrap_err();
        assert!(matches!(err, Error::Backend(msg) if msg == "No message provided"));
    }

    #[test]
    fn missing_response_is_failure() {
        assert!(parse_reply("{}").is_err());
        assert!(parse_reply("not json").is_err());
    }

    #[test]
    fn endpoints_are_joined_under_base() {
        let backend =
            HttpChatBackend::new("http://localhost:5000/api", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.chat_url().as_str(), "http://localhost:5000/api/chat");

        let backend = HttpChatBackend::new("http://localhost:5000", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.health_url.as_str(), "http://localhost:5000/health");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpChatBackend::new("not a url", Duration::from_secs(5)),
            Err(Error::Config(_))
        ));
    }
}
