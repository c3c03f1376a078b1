//! HTTP client node
//!
//! Every request passes the network admission check and is counted against
//! the per-run call ceiling before it leaves the process. Redirects are not
//! followed, so an admitted host cannot bounce the request to an internal one.
//! The connection goes to the addresses admission vetted, never to a fresh
//! DNS answer, and the response body is read under a byte ceiling.

use super::first_input;
use crate::error::{GovernorError, Resource};
use crate::runtime::admission::AdmittedUrl;
use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::Node;
use anyhow::{anyhow, bail};
use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"];

/// `http` node
///
/// Config: `url`, `method` (default GET), `headers` (string values), `body`.
/// POST/PUT/PATCH without a `body` send the first input. Output is
/// `{status, headers, data, success}` with `data` parsed as JSON when possible.
#[derive(Debug, Clone, Default)]
pub struct HttpExecutor;

impl HttpExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Client for a single admitted request
///
/// A named host is resolved to the admitted addresses only. Redirects stay off.
fn client_for(admitted: &AdmittedUrl) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(host) = admitted.pinned_host() {
        builder = builder.resolve_to_addrs(host, &admitted.addrs);
    }
    builder
        .build()
        .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))
}

/// Read the body, refusing anything past `limit` bytes
async fn read_body(
    mut response: reqwest::Response,
    limit: usize,
    max_chars: usize,
) -> anyhow::Result<String> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| anyhow!("Failed to read response body: {}", e))?
    {
        if body.len() + chunk.len() > limit {
            return Err(GovernorError::ResourceLimitExceeded {
                resource: Resource::StringLength,
                limit: max_chars,
            }
            .into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn method_of(node: &Node) -> anyhow::Result<Method> {
    let method = node.config_str("method").unwrap_or("GET").to_uppercase();
    if !METHODS.contains(&method.as_str()) {
        bail!("unsupported HTTP method '{}'", method);
    }
    Method::from_bytes(method.as_bytes()).map_err(|e| anyhow!("invalid HTTP method: {}", e))
}

impl NodeExecutor for HttpExecutor {
    fn type_tag(&self) -> &str {
        "http"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        node.require_str("url")?;
        method_of(node)?;
        if let Some(headers) = node.config_value("headers") {
            let headers = headers
                .as_object()
                .ok_or_else(|| anyhow!("'headers' must be an object"))?;
            if let Some((name, _)) = headers.iter().find(|(_, v)| !v.is_string()) {
                bail!("header '{}' must be a string", name);
            }
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let raw_url = node.require_str("url")?;
            let method = method_of(node)?;

            let admitted = ctx.admit_url(raw_url).await?;
            ctx.increment_http_call()?;

            let client = client_for(&admitted)?;
            let url = admitted.url;

            tracing::debug!("🌍 HTTP Request: {} {}", method, url);

            let mut request = client
                .request(method.clone(), url.clone())
                .timeout(ctx.config().max_node_execution_time);

            if let Some(headers) = node.config_value("headers").and_then(Value::as_object) {
                for (key, value) in headers {
                    if let Some(value) = value.as_str() {
                        request = request.header(key.as_str(), value);
                    }
                }
            }

            let body = match node.config_value("body") {
                Some(body) => Some(body.clone()),
                None if [Method::POST, Method::PUT, Method::PATCH].contains(&method) => {
                    first_input(ctx).await.ok()
                }
                None => None,
            };
            match body {
                Some(Value::String(text)) => {
                    request = request.header("Content-Type", "text/plain").body(text);
                }
                Some(Value::Null) | None => {}
                Some(data) => {
                    request = request.json(&data);
                }
            }

            let response = request
                .send()
                .await
                .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

            let status = response.status();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                .collect();

            // UTF-8 is at most 4 bytes per char
            let max_chars = ctx.config().max_string_length;
            let text = read_body(response, max_chars.saturating_mul(4), max_chars).await?;
            let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

            tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);

            Ok(json!({
                "status": status.as_u16(),
                "headers": headers,
                "data": data,
                "success": status.is_success()
            }))
        })
    }
}
