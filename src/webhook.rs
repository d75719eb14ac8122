//! Webhook notification and the standard handler
//!
//! [`WebhookNotifier`] posts `{"client_id": .., "event": ..}` to a fixed URL.
//! [`StandardHandler`] is the stock [`HubHandler`]: an optional shared bearer
//! token guarding the upgrade, plus an optional webhook fired after every
//! dispatched action.

use std::time::Duration;

use serde::Serialize;

use crate::client::ClientId;
use crate::error::Result;
use crate::protocol::{Action, ClientRef};
use crate::server::{AuthResult, ConnectRequest, HubHandler};

/// Upper bound on one webhook round trip
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    client_id: ClientId,
    event: &'a str,
}

/// Posts client events to an HTTP endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post one event
    ///
    /// Non-success statuses are returned as errors. Nothing is retried.
    pub async fn notify(&self, client_id: ClientId, event: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&WebhookPayload { client_id, event })
            .send()
            .await?
            .error_for_status()?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(
            client_id = %client_id,
            event = event,
            status = %status,
            body = %body,
            "Webhook delivered"
        );

        Ok(())
    }
}

/// Bearer-token access control plus webhook notification
#[derive(Debug, Clone, Default)]
pub struct StandardHandler {
    auth_token: Option<String>,
    webhook: Option<WebhookNotifier>,
}

impl StandardHandler {
    /// Open access, no webhook
    pub fn new() -> Self {
        Self::default()
    }

    /// Require this token from every client
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Post every dispatched action to this notifier
    pub fn with_webhook(mut self, webhook: WebhookNotifier) -> Self {
        self.webhook = Some(webhook);
        self
    }
}

impl HubHandler for StandardHandler {
    fn authenticate(&self, request: &ConnectRequest) -> AuthResult {
        let Some(expected) = self.auth_token.as_deref() else {
            return AuthResult::Accept;
        };

        match request.bearer_token.as_deref() {
            Some(token) if token == expected => AuthResult::Accept,
            Some(_) => AuthResult::Reject("invalid bearer token".to_string()),
            None => AuthResult::Reject("missing bearer token".to_string()),
        }
    }

    async fn on_action(&self, client: &ClientRef, action: Action) {
        let Some(webhook) = &self.webhook else {
            return;
        };

        if let Err(e) = webhook.notify(client.id, action.as_str()).await {
            tracing::warn!(
                client_id = %client.id,
                event = %action,
                error = %e,
                "Webhook notification failed"
            );
        }
    }
}
