//! Message delivery channels

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ChannelConfig, ChannelKind};
use crate::error::{Error, Result};

/// A destination for rendered alert messages
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Deliver `message` to `target`; `Ok` means the channel accepted it
    async fn send(&self, target: &str, message: &str) -> Result<()>;
}

/// Build the configured channel
pub fn build_channel(config: &ChannelConfig, timeout: Duration) -> Result<Arc<dyn MessageChannel>> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(match config.kind {
        ChannelKind::Telegram => Arc::new(TelegramChannel::new(
            client,
            &config.telegram_api_base,
            &config.telegram_bot_token,
        )),
        ChannelKind::Webhook => Arc::new(WebhookChannel::new(client, &config.webhook_url)),
    })
}

/// Drop the request URL from a transport error; Telegram URLs embed the
/// bot token and webhook URLs often carry their own secret
fn transport(e: reqwest::Error) -> Error {
    Error::from(e.without_url())
}

async fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(Error::from_status(operation, status.as_u16(), body))
    }
}

/// Telegram Bot API channel
pub struct TelegramChannel {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    /// Create a channel posting through `api_base` with bot `token`
    pub fn new(client: Client, api_base: &str, token: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, target: &str, message: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let payload = TelegramMessage {
            chat_id: target,
            text: message,
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        let body: TelegramResponse = check_status("telegram.sendMessage", response)
            .await?
            .json()
            .await
            .map_err(transport)?;

        if !body.ok {
            return Err(Error::dispatch(format!(
                "Telegram rejected message: {}",
                body.description.unwrap_or_default()
            )));
        }

        info!(chat_id = target, "Telegram message sent");
        Ok(())
    }
}

/// Generic JSON webhook channel
pub struct WebhookChannel {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    text: &'a str,
}

impl WebhookChannel {
    /// Create a channel posting to `url`
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl MessageChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, target: &str, message: &str) -> Result<()> {
        let payload = WebhookPayload {
            target,
            text: message,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        check_status("webhook", response).await?;

        info!(target, "Webhook notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_telegram_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_json(json!({
                "chat_id": "-100200",
                "text": "hello",
                "disable_web_page_preview": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let channel = TelegramChannel::new(Client::new(), &server.uri(), "123:abc");
        channel.send("-100200", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_telegram_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "description": "Too Many Requests: retry after 5"
            })))
            .mount(&server)
            .await;

        let channel = TelegramChannel::new(Client::new(), &server.uri(), "t");
        let err = channel.send("1", "hello").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_telegram_not_ok_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let channel = TelegramChannel::new(Client::new(), &server.uri(), "t");
        let err = channel.send("1", "hello").await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_telegram_transport_error_hides_token() {
        // nothing listens on port 1
        let channel =
            TelegramChannel::new(Client::new(), "http://127.0.0.1:1", "123456:SECRET-TOKEN");
        let err = channel.send("1", "hello").await.unwrap_err();

        assert!(err.is_transient());
        assert!(!err.to_string().contains("SECRET-TOKEN"));
        assert!(!format!("{err:?}").contains("SECRET-TOKEN"));
    }

    #[tokio::test]
    async fn test_webhook_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/cdn"))
            .and(body_json(json!({"target": "alerts", "text": "hello"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(Client::new(), &format!("{}/hooks/cdn", server.uri()));
        channel.send("alerts", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(Client::new(), &server.uri());
        assert!(channel.send("alerts", "hello").await.unwrap_err().is_transient());
    }
}
