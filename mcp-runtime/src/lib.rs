use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::Subcommand;
use reqwest::Method;
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use am_core::alert::{Alert, FormattedAlert};
use am_core::error::{UpstreamError, codes};
use am_core::silence::{FormattedSilence, Matcher, NewSilence, Silence, SilenceCreated};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "alertmanager-mcp";

/// All upstream calls target the v2 API namespace.
const API_PREFIX: &str = "/api/v2";

pub const DEFAULT_ALERTMANAGER_URL: &str = "http://localhost:9093";

/// Hard bound on every upstream round trip; expiry aborts the in-flight
/// request. There is no retry edge, the host decides whether to re-invoke.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable per-process configuration. The only state shared across tool
/// invocations, so overlapping dispatch from the host is always safe.
#[derive(Clone, Debug)]
pub struct McpRuntimeConfig {
    pub alertmanager_url: String,
    pub timeout: Duration,
}

impl McpRuntimeConfig {
    pub fn new(alertmanager_url: impl Into<String>) -> Self {
        Self {
            alertmanager_url: alertmanager_url.into(),
            timeout: UPSTREAM_TIMEOUT,
        }
    }
}

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Alertmanager MCP server over stdio
    Serve,
    /// Probe the upstream Alertmanager and print its status
    Check,
}

pub async fn run(config: McpRuntimeConfig, command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve => {
            let mut server = McpServer::new(config);
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Check => {
            let server = McpServer::new(config);
            match server.call_upstream(Method::GET, "status", &[], None).await {
                Ok(status) => {
                    println!("{}", to_pretty_json(&status));
                    0
                }
                Err(err) => {
                    let payload = json!({
                        "error": err.code(),
                        "message": err.to_string(),
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
    }
}

/// Handle one incoming JSON-RPC message (single or batch) without a stdio
/// transport. Used when embedding the runtime and by the integration tests.
pub async fn handle_jsonrpc(config: McpRuntimeConfig, incoming: Value) -> Vec<Value> {
    let server = McpServer::new(config);
    server.handle_incoming_message(incoming).await
}

struct McpServer {
    config: McpRuntimeConfig,
    http: reqwest::Client,
}

impl McpServer {
    fn new(config: McpRuntimeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { config, http }
    }

    async fn serve_stdio(&mut self) -> Result<(), String> {
        tracing::info!(
            alertmanager_url = %self.config.alertmanager_url,
            "serving MCP over stdio"
        );

        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut stdout = io::stdout();

        loop {
            let incoming = read_framed_json(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let responses = self.handle_incoming_message(incoming).await;
            for response in responses {
                write_framed_json(&mut stdout, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Most likely a client response; server does not issue outbound requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method, params).await;
            None
        }
    }

    async fn handle_notification(&self, method: &str, _params: Value) {
        if matches!(
            method,
            "notifications/initialized" | "notifications/cancelled"
        ) {
            return;
        }
        // Unknown notifications are intentionally ignored.
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "prompts/list" => Ok(json!({ "prompts": [] })),
            "resources/list" => Ok(json!({ "resources": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Tools for inspecting and silencing Prometheus Alertmanager alerts. Start with get-alerts to see what is firing; use get-alert-details for a single alert's full payload, create-silence to suppress matching alerts, and delete-silence to lift a silence early."
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        // The operation boundary: whatever fails during validation, the
        // upstream call, or formatting is rendered as a failure envelope —
        // nothing propagates past this point.
        Ok(match self.execute_tool(name, &args).await {
            Ok(text) => build_tool_call_response(text, false),
            Err(err) => build_tool_call_response(render_tool_error(name, &err), true),
        })
    }

    async fn execute_tool(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        match tool_name {
            "get-alerts" => self.tool_get_alerts(args).await,
            "get-alert-details" => self.tool_get_alert_details(args).await,
            "create-silence" => self.tool_create_silence(args).await,
            "get-silences" => self.tool_get_silences(args).await,
            "delete-silence" => self.tool_delete_silence(args).await,
            "get-alert-groups" => self.tool_get_alert_groups(args).await,
            _ => Err(ToolError::new(
                codes::UNKNOWN_TOOL,
                format!("Unknown tool '{tool_name}'"),
            )),
        }
    }

    async fn tool_get_alerts(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let query = alert_query_params(
            arg_optional_string(args, "filter")?,
            arg_bool_with_default(args, "active", true)?,
            arg_bool_with_default(args, "silenced", false)?,
            arg_bool_with_default(args, "inhibited", false)?,
        );

        let payload = self.call_upstream(Method::GET, "alerts", &query, None).await?;
        let alerts: Vec<Alert> = decode("alert list", payload)?;
        let formatted: Vec<FormattedAlert> = alerts.iter().map(FormattedAlert::from).collect();

        Ok(to_pretty_json(&formatted))
    }

    async fn tool_get_alert_details(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let fingerprint = required_string(args, "fingerprint")?;

        // Alertmanager has no lookup-by-fingerprint endpoint; fetch the
        // entire list (silenced and inhibited included) and scan.
        let query = alert_query_params(None, true, true, true);
        let payload = self.call_upstream(Method::GET, "alerts", &query, None).await?;
        let alerts: Vec<Alert> = decode("alert list", payload)?;

        let Some(alert) = alerts.iter().find(|a| a.fingerprint == fingerprint) else {
            return Err(ToolError::new(
                codes::NOT_FOUND,
                format!("No alert found with fingerprint '{fingerprint}'"),
            ));
        };

        // Full, unprojected payload — unlike get-alerts this keeps
        // annotations, endsAt and generatorURL.
        let detail = json!({
            "fingerprint": &alert.fingerprint,
            "alertname": alert.alertname(),
            "labels": &alert.labels,
            "annotations": &alert.annotations,
            "startsAt": alert.starts_at,
            "endsAt": alert.ends_at,
            "generatorURL": &alert.generator_url,
            "status": {
                "state": alert.status.state,
                "silencedBy": &alert.status.silenced_by,
                "inhibitedBy": &alert.status.inhibited_by,
            },
        });
        Ok(to_pretty_json(&detail))
    }

    async fn tool_create_silence(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let body = build_silence_body(args, Utc::now())?;
        let body = serde_json::to_value(&body).map_err(|e| {
            ToolError::new(
                codes::VALIDATION_FAILED,
                format!("failed to encode silence: {e}"),
            )
        })?;

        let payload = self
            .call_upstream(Method::POST, "silences", &[], Some(body))
            .await?;
        let created: SilenceCreated = decode("silence creation response", payload)?;

        Ok(format!("Silence created with ID: {}", created.silence_id))
    }

    async fn tool_get_silences(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let mut query = Vec::new();
        if let Some(filter) = arg_optional_string(args, "filter")? {
            query.push(("filter".to_string(), filter));
        }

        let payload = self.call_upstream(Method::GET, "silences", &query, None).await?;
        let silences: Vec<Silence> = decode("silence list", payload)?;
        let formatted: Vec<FormattedSilence> =
            silences.iter().map(FormattedSilence::from).collect();

        Ok(to_pretty_json(&formatted))
    }

    async fn tool_delete_silence(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let silence_id = required_string(args, "silenceId")?;

        // Deletion uses the singular path segment while list/create use the
        // plural one. Upstream compatibility detail, not a typo.
        let path = format!("silence/{silence_id}");
        self.call_upstream(Method::DELETE, &path, &[], None).await?;

        Ok(format!("Silence {silence_id} deleted successfully"))
    }

    async fn tool_get_alert_groups(&self, args: &Map<String, Value>) -> Result<String, ToolError> {
        let query = alert_query_params(
            None,
            arg_bool_with_default(args, "active", true)?,
            arg_bool_with_default(args, "silenced", false)?,
            arg_bool_with_default(args, "inhibited", false)?,
        );

        // The grouping structure is provider-defined; pass it through
        // without projection.
        let payload = self
            .call_upstream(Method::GET, "alerts/groups", &query, None)
            .await?;
        Ok(to_pretty_json(&payload))
    }

    /// One upstream HTTP round trip: build the `/api/v2` URL, apply the
    /// configured timeout, classify the failure, parse the JSON body.
    /// An empty 2xx body (DELETE has no meaningful body) maps to `Null`.
    async fn call_upstream(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Value, UpstreamError> {
        let base = self.config.alertmanager_url.trim_end_matches('/');
        let mut url = reqwest::Url::parse(&format!("{base}{API_PREFIX}/{path}")).map_err(|e| {
            UpstreamError::InvalidUrl {
                message: e.to_string(),
            }
        })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }

        let method_text = method.to_string();
        let url_text = url.to_string();

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let result = execute_upstream(request, &url_text).await;
        if let Err(err) = &result {
            // Side-channel diagnostic; the caller still receives the
            // failure envelope through the normal response channel.
            tracing::warn!(
                method = %method_text,
                url = %url_text,
                error = %err,
                "upstream request failed"
            );
        }
        result
    }
}

async fn execute_upstream(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<Value, UpstreamError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout {
                url: url.to_string(),
            }
        } else {
            UpstreamError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        });
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout {
                url: url.to_string(),
            }
        } else {
            UpstreamError::Decode {
                message: format!("failed to read response body: {e}"),
            }
        }
    })?;

    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode {
        message: e.to_string(),
    })
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ToolError {
    code: &'static str,
    message: String,
}

impl ToolError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<UpstreamError> for ToolError {
    fn from(err: UpstreamError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Per-operation failure prefix, per the `"Error <verb>ing <noun>"` wording
/// of the tool surface.
fn error_context(tool: &str) -> Option<&'static str> {
    match tool {
        "get-alerts" => Some("Error fetching alerts"),
        "get-alert-details" => Some("Error fetching alert details"),
        "create-silence" => Some("Error creating silence"),
        "get-silences" => Some("Error fetching silences"),
        "delete-silence" => Some("Error deleting silence"),
        "get-alert-groups" => Some("Error fetching alert groups"),
        _ => None,
    }
}

fn render_tool_error(tool: &str, err: &ToolError) -> String {
    // Domain not-found is a valid call with an empty result; it keeps its
    // own wording instead of the transport-failure prefix.
    if err.code == codes::NOT_FOUND {
        return err.message.clone();
    }
    match error_context(tool) {
        Some(context) => format!("{context}: {}", err.message),
        None => err.message.clone(),
    }
}

fn build_tool_call_response(text: String, is_error: bool) -> Value {
    if is_error {
        json!({
            "content": [{ "type": "text", "text": text }],
            "isError": true
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }]
        })
    }
}

/// Alert listing flags, encoded the way Alertmanager expects them: absence
/// of a parameter, not its value, selects the upstream default. `active`
/// therefore only appears when explicitly false, and `silenced`/`inhibited`
/// only when true.
fn alert_query_params(
    filter: Option<String>,
    active: bool,
    silenced: bool,
    inhibited: bool,
) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(filter) = filter {
        query.push(("filter".to_string(), filter));
    }
    if !active {
        query.push(("active".to_string(), "false".to_string()));
    }
    if silenced {
        query.push(("silenced".to_string(), "true".to_string()));
    }
    if inhibited {
        query.push(("inhibited".to_string(), "true".to_string()));
    }
    query
}

/// Assemble the silence creation body. `isRegex` normalization happens in
/// the matcher decode; `startsAt` defaults to `now`, computed once per call,
/// and a caller-supplied value passes through verbatim.
fn build_silence_body(
    args: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<NewSilence, ToolError> {
    let matchers_value = args.get("matchers").cloned().ok_or_else(|| {
        ToolError::new(codes::VALIDATION_FAILED, "Missing required field 'matchers'")
    })?;
    let matchers: Vec<Matcher> = serde_json::from_value(matchers_value).map_err(|e| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'matchers' must be an array of {{name, value, isRegex?}} objects: {e}"),
        )
    })?;
    if matchers.is_empty() {
        return Err(ToolError::new(
            codes::VALIDATION_FAILED,
            "'matchers' must not be empty",
        ));
    }

    let starts_at = match arg_optional_string(args, "startsAt")? {
        Some(value) => value,
        None => now.to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    Ok(NewSilence {
        matchers,
        starts_at,
        ends_at: required_string(args, "endsAt")?,
        created_by: required_string(args, "createdBy")?,
        comment: required_string(args, "comment")?,
    })
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, payload: Value) -> Result<T, ToolError> {
    serde_json::from_value(payload).map_err(|e| {
        ToolError::new(
            codes::DECODE_FAILED,
            format!("unexpected {what} payload from Alertmanager: {e}"),
        )
    })
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("Missing required field '{key}'"),
        )
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must not be empty"),
        )),
        _ => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be a string"),
        )),
    }
}

fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be a string"),
        )),
    }
}

fn arg_bool_with_default(
    args: &Map<String, Value>,
    key: &str,
    default: bool,
) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(v)) => Ok(*v),
        Some(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must be a boolean"),
        )),
    }
}

#[derive(Debug)]
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get-alerts",
            description: "List current alerts in a compact display form, optionally filtered.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filter": {
                        "type": "string",
                        "description": "Alertmanager filter expression, e.g. alertname=\"HighCPU\""
                    },
                    "active": { "type": "boolean", "default": true },
                    "silenced": { "type": "boolean", "default": false },
                    "inhibited": { "type": "boolean", "default": false }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get-alert-details",
            description: "Full payload of a single alert, looked up by fingerprint.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "fingerprint": {
                        "type": "string",
                        "description": "Exact alert fingerprint as returned by get-alerts"
                    }
                },
                "required": ["fingerprint"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "create-silence",
            description: "Create a silence suppressing alerts that match all given matchers.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "matchers": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "value": { "type": "string" },
                                "isRegex": { "type": "boolean", "default": false }
                            },
                            "required": ["name", "value"],
                            "additionalProperties": false
                        }
                    },
                    "startsAt": {
                        "type": "string",
                        "description": "RFC 3339 start time; defaults to now"
                    },
                    "endsAt": { "type": "string", "description": "RFC 3339 end time" },
                    "createdBy": { "type": "string" },
                    "comment": { "type": "string" }
                },
                "required": ["matchers", "endsAt", "createdBy", "comment"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get-silences",
            description: "List silences, optionally filtered.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filter": {
                        "type": "string",
                        "description": "Alertmanager filter expression forwarded verbatim"
                    }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "delete-silence",
            description: "Delete (expire) an existing silence by id.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "silenceId": { "type": "string" }
                },
                "required": ["silenceId"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "get-alert-groups",
            description: "Alerts grouped by Alertmanager's configured grouping, passed through unmodified.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "active": { "type": "boolean", "default": true },
                    "silenced": { "type": "boolean", "default": false },
                    "inhibited": { "type": "boolean", "default": false }
                },
                "additionalProperties": false
            }),
        },
    ]
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

async fn read_framed_json(
    reader: &mut BufReader<tokio::io::Stdin>,
) -> Result<Option<Value>, std::io::Error> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        if line == "\r\n" {
            break;
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = line
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json: Value = serde_json::from_slice(&payload).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid JSON payload: {e}"),
        )
    })?;
    Ok(Some(json))
}

async fn write_framed_json(
    writer: &mut tokio::io::Stdout,
    value: &Value,
) -> Result<(), std::io::Error> {
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server() -> McpServer {
        McpServer::new(McpRuntimeConfig::new("http://127.0.0.1:9"))
    }

    fn query_text(query: &[(String, String)]) -> String {
        query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    #[test]
    fn alert_query_defaults_encode_to_empty_query() {
        assert!(alert_query_params(None, true, false, false).is_empty());
    }

    #[test]
    fn alert_query_silenced_true_omits_the_other_flags() {
        let query = alert_query_params(None, true, true, false);
        assert_eq!(query_text(&query), "silenced=true");
    }

    #[test]
    fn alert_query_active_appears_only_when_explicitly_false() {
        let query = alert_query_params(None, false, false, false);
        assert_eq!(query_text(&query), "active=false");
    }

    #[test]
    fn alert_query_forwards_filter_verbatim() {
        let query =
            alert_query_params(Some("alertname=\"HighCPU\"".to_string()), true, false, true);
        assert_eq!(
            query_text(&query),
            "filter=alertname=\"HighCPU\"&inhibited=true"
        );
    }

    #[test]
    fn silence_body_normalizes_is_regex_to_false() {
        let args = json!({
            "matchers": [{"name": "alertname", "value": "X"}],
            "endsAt": "2030-01-01T00:00:00Z",
            "createdBy": "u",
            "comment": "c"
        });
        let body = build_silence_body(args.as_object().unwrap(), Utc::now()).unwrap();
        assert_eq!(
            body.matchers,
            vec![Matcher {
                name: "alertname".to_string(),
                value: "X".to_string(),
                is_regex: false
            }]
        );
    }

    #[test]
    fn silence_body_defaults_starts_at_to_the_given_instant() {
        let args = json!({
            "matchers": [{"name": "alertname", "value": "X", "isRegex": true}],
            "endsAt": "2030-01-01T00:00:00Z",
            "createdBy": "u",
            "comment": "c"
        });
        let now = Utc::now();
        let body = build_silence_body(args.as_object().unwrap(), now).unwrap();

        let parsed = DateTime::parse_from_rfc3339(&body.starts_at).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn silence_body_passes_explicit_starts_at_through_unmodified() {
        let args = json!({
            "matchers": [{"name": "alertname", "value": "X"}],
            "startsAt": "2029-06-01T08:30:00+02:00",
            "endsAt": "2030-01-01T00:00:00Z",
            "createdBy": "u",
            "comment": "c"
        });
        let body = build_silence_body(args.as_object().unwrap(), Utc::now()).unwrap();
        assert_eq!(body.starts_at, "2029-06-01T08:30:00+02:00");
    }

    #[test]
    fn silence_body_rejects_missing_and_empty_matchers() {
        let missing = json!({
            "endsAt": "2030-01-01T00:00:00Z",
            "createdBy": "u",
            "comment": "c"
        });
        let err = build_silence_body(missing.as_object().unwrap(), Utc::now()).unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_FAILED);

        let empty = json!({
            "matchers": [],
            "endsAt": "2030-01-01T00:00:00Z",
            "createdBy": "u",
            "comment": "c"
        });
        let err = build_silence_body(empty.as_object().unwrap(), Utc::now()).unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_FAILED);
        assert!(err.message.contains("matchers"));
    }

    #[test]
    fn tool_errors_render_with_per_operation_prefix() {
        let err = ToolError::from(UpstreamError::Status {
            status: 503,
            reason: "Service Unavailable".to_string(),
        });
        let text = render_tool_error("get-alerts", &err);
        assert!(text.starts_with("Error fetching alerts: "), "got: {text}");
        assert!(text.contains("503"));
    }

    #[test]
    fn not_found_errors_skip_the_transport_prefix() {
        let err = ToolError::new(codes::NOT_FOUND, "No alert found with fingerprint 'abc'");
        let text = render_tool_error("get-alert-details", &err);
        assert_eq!(text, "No alert found with fingerprint 'abc'");
    }

    #[test]
    fn every_tool_has_an_error_context() {
        for tool in tool_definitions() {
            assert!(
                error_context(tool.name).is_some(),
                "missing error context for {}",
                tool.name
            );
        }
    }

    #[test]
    fn tool_definitions_cover_the_six_operations() {
        let names: Vec<&str> = tool_definitions().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "get-alerts",
                "get-alert-details",
                "create-silence",
                "get-silences",
                "delete-silence",
                "get-alert-groups"
            ]
        );
    }

    #[test]
    fn create_silence_schema_requires_the_scalar_fields() {
        let tools = tool_definitions();
        let create = tools.iter().find(|t| t.name == "create-silence").unwrap();
        let required: Vec<&str> = create.input_schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["matchers", "endsAt", "createdBy", "comment"]);
    }

    #[test]
    fn initialize_payload_reports_protocol_and_server_info() {
        let payload = server().initialize_payload();
        assert_eq!(payload["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(payload["serverInfo"]["name"], MCP_SERVER_NAME);
    }

    #[test]
    fn tool_call_envelope_has_one_text_block() {
        let ok = build_tool_call_response("payload".to_string(), false);
        assert_eq!(ok["content"][0]["type"], "text");
        assert_eq!(ok["content"][0]["text"], "payload");
        assert!(ok.get("isError").is_none());

        let failed = build_tool_call_response("Error fetching alerts: boom".to_string(), true);
        assert_eq!(failed["isError"], true);
        assert_eq!(failed["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn required_string_rejects_missing_empty_and_non_string() {
        let args = json!({"empty": "  ", "number": 7});
        let args = args.as_object().unwrap();
        assert!(required_string(args, "absent").is_err());
        assert!(required_string(args, "empty").is_err());
        assert!(required_string(args, "number").is_err());
    }

    #[test]
    fn bool_args_fall_back_to_their_declared_default() {
        let args = json!({"silenced": true, "active": null});
        let args = args.as_object().unwrap();
        assert!(arg_bool_with_default(args, "silenced", false).unwrap());
        assert!(arg_bool_with_default(args, "active", true).unwrap());
        assert!(!arg_bool_with_default(args, "inhibited", false).unwrap());
    }

    #[tokio::test]
    async fn rejects_wrong_jsonrpc_version() {
        let response = server()
            .handle_single_message(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let response = server()
            .handle_single_message(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/explode"}))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_produce_no_response() {
        let response = server()
            .handle_single_message(json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_envelope_not_rpc_error() {
        let response = server()
            .handle_single_message(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {"name": "get-incidents", "arguments": {}}
            }))
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("get-incidents"));
    }

    #[tokio::test]
    async fn empty_batch_is_an_invalid_request() {
        let responses = server().handle_incoming_message(json!([])).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn validation_failure_is_rendered_at_the_operation_boundary() {
        // Upstream is never reached: fingerprint validation fails first.
        let response = server()
            .handle_single_message(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {"name": "get-alert-details", "arguments": {"fingerprint": 42}}
            }))
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(
            text.starts_with("Error fetching alert details: "),
            "got: {text}"
        );
    }
}
