//! Sends every event as JSON to a web endpoint.
//!
//! Options (`modules.http.*`): `url`, `method`, `bearer`, `username`,
//! `password`, `timeout` (seconds). Deliveries go through [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info};

use spyglass_common::event::Event;

use crate::error::{ModuleError, SinkError};
use crate::modules::runtime::{EventHandler, ModuleContext};
use crate::output::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

pub struct HttpOutput {
    client: Option<Client>,
    url: String,
    method: Method,
    auth: Auth,
    policy: RetryPolicy,
    sent: usize,
}

impl Default for HttpOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpOutput {
    pub fn new() -> Self {
        Self {
            client: None,
            url: String::new(),
            method: Method::POST,
            auth: Auth::None,
            policy: RetryPolicy::default(),
            sent: 0,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn send(&self, client: &Client, body: &serde_json::Value) -> Result<(), SinkError> {
        let mut request = client.request(self.method.clone(), &self.url).json(body);
        request = match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                SinkError::Fatal(e.to_string())
            } else {
                SinkError::Transient(e.to_string())
            }
        })?;
        classify(response.status())
    }
}

/// Maps a response status to a delivery outcome. Every failed response is
/// retried; only requests that cannot be built give up.
fn classify(status: StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        return Ok(());
    }
    let reason = format!("HTTP {status}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(SinkError::RateLimited(reason)),
        _ => Err(SinkError::Transient(reason)),
    }
}

fn auth_from(ctx: &ModuleContext) -> Auth {
    if let Some(token) = ctx.option_str("bearer") {
        return Auth::Bearer(token.to_string());
    }
    match (ctx.option_str("username"), ctx.option_str("password")) {
        (Some(username), password) => Auth::Basic {
            username: username.to_string(),
            password: password.unwrap_or_default().to_string(),
        },
        _ => Auth::None,
    }
}

#[async_trait]
impl EventHandler for HttpOutput {
    async fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let Some(url) = ctx.option_str("url") else {
            return Err(ModuleError::Failed {
                module: ctx.name.clone(),
                reason: "no url configured (modules.http.url)".to_string(),
            });
        };
        let method = ctx.option_str("method").unwrap_or("POST").to_uppercase();
        self.method = Method::from_bytes(method.as_bytes()).map_err(|e| ModuleError::Failed {
            module: ctx.name.clone(),
            reason: format!("invalid method {method:?}: {e}"),
        })?;
        self.url = url.to_string();
        self.auth = auth_from(ctx);

        let timeout = Duration::from_secs(ctx.option_u64("timeout", 10));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModuleError::Failed {
                module: ctx.name.clone(),
                reason: e.to_string(),
            })?;
        self.client = Some(client);
        debug!("Sending events to {} {}", self.method, self.url);
        Ok(())
    }

    async fn handle_event(&mut self, event: Arc<Event>, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let Some(client) = self.client.clone() else {
            return Err(ModuleError::NotRunning {
                module: ctx.name.clone(),
            });
        };
        let body = event.to_json();
        let what = event.description();
        self.policy
            .deliver(&what, || self.send(&client, &body))
            .await
            .map_err(|e| ModuleError::Failed {
                module: ctx.name.clone(),
                reason: e.to_string(),
            })?;
        self.sent += 1;
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        if self.client.is_some() {
            info!("{} delivered {} events to {}", ctx.name, self.sent, self.url);
        }
        Ok(())
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
