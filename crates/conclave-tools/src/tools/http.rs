//! Outbound HTTP tool (spec.md §4.3), host-pattern-allowlisted. Grounded
//! in `aof-tools/src/tools/http.rs`'s `HttpTool`, with a construction-time
//! [`ToolPolicy`] checked against the request's host before any request
//! is sent.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult, SideEffectClass, Tool, ToolDefinition, ToolInput, ToolResult};
use tracing::debug;

use super::common::{create_schema, get_arg, get_arg_or, tool_definition};
use crate::policy::ToolPolicy;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Issue an outbound HTTP request to an allowlisted host.
pub struct HttpTool {
    policy: ToolPolicy,
}

impl HttpTool {
    pub fn new(allowed_hosts: Vec<String>) -> ConclaveResult<Self> {
        Ok(Self {
            policy: ToolPolicy::new(allowed_hosts)?,
        })
    }
}

#[async_trait]
impl Tool for HttpTool {
    async fn execute(&self, input: ToolInput) -> ConclaveResult<ToolResult> {
        let url: String = get_arg(&input.args, "url")?;
        let method: String = get_arg_or(&input.args, "method", "GET".to_string())?;
        let headers: HashMap<String, String> = get_arg_or(&input.args, "headers", HashMap::new())?;
        let body: Option<String> = input.args.get("body").and_then(|v| v.as_str()).map(String::from);
        let json_body: Option<serde_json::Value> = input.args.get("json").cloned();
        let timeout_secs: u64 = get_arg_or(&input.args, "timeout_secs", DEFAULT_TIMEOUT_SECS)?;

        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| ConclaveError::bad_request(format!("invalid url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ConclaveError::bad_request("url has no host"))?;
        self.policy.check_host(host).into_result()?;

        debug!(url = %url, method = %method, "making HTTP request");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ConclaveError::configuration_error(format!("failed to build HTTP client: {e}")))?;

        let mut request = match method.to_uppercase().as_str() {
            "GET" => client.get(parsed.clone()),
            "POST" => client.post(parsed.clone()),
            "PUT" => client.put(parsed.clone()),
            "DELETE" => client.delete(parsed.clone()),
            "PATCH" => client.patch(parsed.clone()),
            "HEAD" => client.head(parsed.clone()),
            other => return Ok(ToolResult::failure(format!("unsupported method: {other}"))),
        };

        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(json) = json_body {
            request = request.json(&json);
        } else if let Some(body) = body {
            request = request.body(body);
        }

        let start = std::time::Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ConclaveError::timeout(format!("request to {url} timed out"))),
            Err(e) => return Ok(ToolResult::failure(format!("HTTP request failed: {e}"))),
        };
        let elapsed = start.elapsed().as_millis() as u64;

        let status = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body_text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Ok(ToolResult::failure(format!("failed to read response body: {e}"))),
        };
        let body_json: Option<serde_json::Value> = serde_json::from_str(&body_text).ok();

        Ok(ToolResult::success(serde_json::json!({
            "status": status,
            "headers": response_headers,
            "body": body_json.unwrap_or(serde_json::json!(body_text)),
            "url": url,
        }))
        .with_execution_time(elapsed))
    }

    fn definition(&self) -> ToolDefinition {
        tool_definition(
            "http_request",
            "Make an outbound HTTP request to an allowlisted host.",
            create_schema(
                serde_json::json!({
                    "url": {"type": "string", "description": "URL to request"},
                    "method": {
                        "type": "string",
                        "description": "HTTP method",
                        "enum": ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"],
                    },
                    "headers": {"type": "object", "additionalProperties": {"type": "string"}},
                    "body": {"type": "string", "description": "Raw request body"},
                    "json": {"type": "object", "description": "JSON request body"},
                    "timeout_secs": {"type": "integer", "description": "Request timeout in seconds"},
                }),
                vec!["url"],
            ),
            SideEffectClass::External,
        )
    }
}
