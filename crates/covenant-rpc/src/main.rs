use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use covenant_fernet::{derive_key, KeyMaterial, KeyStrategy, TokenCodec, TokenError};

mod config;

use config::RpcConfig;

// --- Error Codes ---
const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32000;
const MALFORMED_TOKEN: i32 = -32001;
const AUTHENTICATION_FAILED: i32 = -32002;
const DECRYPTION_ERROR: i32 = -32003;

// --- Struct Definitions ---
#[derive(Deserialize, Serialize, Clone, Debug)]
struct RpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize, Debug)]
struct RpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize, Debug)]
struct RpcError {
    code: i32,
    message: String,
}

// Param structs carry secrets and keys, so they are never logged.
#[derive(Deserialize)]
struct DeriveKeyParams {
    secret: String,
    #[serde(default)]
    strategy: Option<String>,
}

#[derive(Deserialize)]
struct EncryptParams {
    key: String, // URL-safe base64 key material
    #[serde(default)]
    data: Option<String>, // Base64 encoded bytes
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct DecryptParams {
    key: String,
    token: String,
}
// --- Struct Definitions End ---

/// A failed tool call, carried back to the client as a JSON-RPC error
#[derive(Debug, Error)]
#[error("{message}")]
struct ToolError {
    code: i32,
    message: String,
}

impl ToolError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

impl From<TokenError> for ToolError {
    fn from(err: TokenError) -> Self {
        let code = match &err {
            TokenError::MalformedToken { .. } => MALFORMED_TOKEN,
            TokenError::AuthenticationFailed => AUTHENTICATION_FAILED,
            TokenError::DecryptionError { .. } => DECRYPTION_ERROR,
            TokenError::Crypto(_) => INTERNAL_ERROR,
        };
        let message = match err.suggestion() {
            Some(hint) => format!("{err}. {hint}"),
            None => err.to_string(),
        };
        Self { code, message }
    }
}

// --- Helper Functions ---
fn create_error_response(id: Value, code: i32, message: String) -> RpcResponse {
    error!("Responding with error: code={}, message={}", code, message);
    RpcResponse {
        jsonrpc: "2.0".to_string(), id, result: None, error: Some(RpcError { code, message }),
    }
}

fn create_success_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(), id, result: Some(result), error: None,
    }
}

fn tool_schemas() -> Value {
    json!({
        "derive_key": {"description": "Derives 32 bytes of key material from a shared secret","schema": {"type": "object","properties": {"secret": {"type": "string"},"strategy": {"type": "string", "enum": ["strong", "fast"]}},"required": ["secret"]}},
        "encrypt": {"description": "Encrypts bytes or text into a token","schema": {"type": "object","properties": {"key": {"type": "string"},"data": {"type": "string"},"text": {"type": "string"}},"required": ["key"]}},
        "decrypt": {"description": "Authenticates and decrypts a token","schema": {"type": "object","properties": {"key": {"type": "string"},"token": {"type": "string"}},"required": ["key", "token"]}}
    })
}

fn parse_key(encoded: &str) -> Result<KeyMaterial, ToolError> {
    KeyMaterial::from_base64(encoded).map_err(|e| ToolError::invalid_params(format!("Invalid key: {}", e)))
}
// --- Helper Functions End ---

// --- Tool Handlers ---
async fn derive_key_tool(params: Value, default_strategy: KeyStrategy) -> Result<Value, ToolError> {
    let p: DeriveKeyParams = serde_json::from_value(params)
        .map_err(|e| ToolError::invalid_params(format!("Invalid params for derive_key: {}", e)))?;
    let strategy = match p.strategy.as_deref() {
        Some(name) => name
            .parse::<KeyStrategy>()
            .map_err(|e| ToolError::invalid_params(e.to_string()))?,
        None => default_strategy,
    };

    let key = match strategy {
        KeyStrategy::Strong => {
            let secret = p.secret;
            tokio::task::spawn_blocking(move || derive_key(&secret, KeyStrategy::Strong))
                .await
                .map_err(|e| ToolError::internal(format!("Key derivation task failed: {}", e)))?
        }
        KeyStrategy::Fast => derive_key(&p.secret, KeyStrategy::Fast),
    };

    info!("Derived key with {} strategy", strategy);
    Ok(json!({ "key": key.to_base64(), "strategy": strategy }))
}

fn encrypt_tool(params: Value) -> Result<Value, ToolError> {
    let p: EncryptParams = serde_json::from_value(params)
        .map_err(|e| ToolError::invalid_params(format!("Invalid params for encrypt: {}", e)))?;
    let plaintext = match (p.data, p.text) {
        (Some(data), None) => BASE64
            .decode(data.trim())
            .map_err(|e| ToolError::invalid_params(format!("Invalid base64 data: {}", e)))?,
        (None, Some(text)) => text.into_bytes(),
        _ => return Err(ToolError::invalid_params("Exactly one of 'data' or 'text' is required")),
    };

    let key = parse_key(&p.key)?;
    let token = TokenCodec::new(&key).encrypt(&plaintext)?;
    info!("Encrypted {} bytes", plaintext.len());
    Ok(json!({ "token": token }))
}

fn decrypt_tool(params: Value) -> Result<Value, ToolError> {
    let p: DecryptParams = serde_json::from_value(params)
        .map_err(|e| ToolError::invalid_params(format!("Invalid params for decrypt: {}", e)))?;
    let key = parse_key(&p.key)?;
    let decrypted = TokenCodec::new(&key).decrypt(&p.token)?;

    let mut result = Map::new();
    result.insert("version".into(), json!(decrypted.version));
    result.insert(
        "timestamp".into(),
        json!(decrypted.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    result.insert("timestamp_unix".into(), json!(decrypted.timestamp_secs()));
    result.insert("data".into(), json!(BASE64.encode(decrypted.plaintext())));
    if let Ok(text) = std::str::from_utf8(decrypted.plaintext()) {
        result.insert("text".into(), json!(text));
    }
    info!("Decrypted token ({} bytes of plaintext)", decrypted.plaintext().len());
    Ok(Value::Object(result))
}
// --- Tool Handlers End ---

type ResponseFuture = Pin<Box<dyn Future<Output = RpcResponse> + Send>>;

// --- Main Request Processor ---
fn process_request(req: RpcRequest, config: Arc<RpcConfig>) -> ResponseFuture {
    Box::pin(async move {
        debug!("Processing request: ID={:?}, Method='{}'", req.id, req.method);

        if req.jsonrpc != "2.0" {
            return create_error_response(req.id, INVALID_REQUEST, "Invalid Request: jsonrpc must be \"2.0\"".to_string());
        }

        let outcome = match req.method.as_str() {
            "help" => {
                info!("Received help request");
                Ok(json!({
                    "message": "Covenant token server: derive keys, encrypt and decrypt tokens.",
                    "commands": {
                        "help": { "description": "Displays this help message." },
                        "initialize": { "description": "Initializes the server and lists tool schemas." },
                        "tools/list": { "description": "Lists available tools (alias: listTools)." },
                        "derive_key": { "description": "Derives key material: {secret, strategy?: strong|fast} -> {key, strategy}" },
                        "encrypt": { "description": "Encrypts: {key, data (base64) | text} -> {token}" },
                        "decrypt": { "description": "Decrypts: {key, token} -> {version, timestamp, timestamp_unix, data, text?}" }
                    }
                }))
            }

            "initialize" => {
                info!("Received initialize request");
                let mut tools_object = Map::new();
                if let Value::Object(tool_map) = tool_schemas() {
                    for (tool_name, tool_def) in tool_map {
                        let description = tool_def.get("description").cloned().unwrap_or(Value::Null);
                        let schema = tool_def.get("schema").cloned().unwrap_or_else(|| json!({"type": "object"}));
                        tools_object.insert(tool_name, json!({ "description": description, "inputSchema": schema }));
                    }
                }
                Ok(json!({
                    "serverInfo": {"name": "covenant-rpc", "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": { "tools": Value::Object(tools_object) }
                }))
            }

            "listTools" | "tools/list" => {
                info!("Received tools/list request");
                let mut tools_array = Vec::new();
                if let Value::Object(tool_map) = tool_schemas() {
                    for (tool_name, tool_def) in tool_map {
                        let description = tool_def.get("description").cloned().unwrap_or(Value::Null);
                        let schema = tool_def.get("schema").cloned().unwrap_or_else(|| json!({"type": "object"}));
                        tools_array.push(json!({ "name": tool_name, "description": description, "inputSchema": schema }));
                    }
                }
                Ok(json!({ "tools": tools_array }))
            }

            "derive_key" => derive_key_tool(req.params, config.default_strategy).await,
            "encrypt" => encrypt_tool(req.params),
            "decrypt" => decrypt_tool(req.params),

            other => Err(ToolError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: '{}'", other),
            }),
        };

        match outcome {
            Ok(result) => create_success_response(req.id, result),
            Err(e) => create_error_response(req.id, e.code, e.message),
        }
    })
}

fn serialize_response(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!("Failed to serialize response for ID {:?}: {}", response.id, e);
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"Internal Server Error"}}"#.to_string()
    })
}

/// Handle one input line, returning the serialized response if one is owed
async fn handle_line(line: &str, config: Arc<RpcConfig>) -> Option<String> {
    let trimmed_line = line.trim();
    if trimmed_line.is_empty() || !trimmed_line.starts_with('{') {
        if !trimmed_line.is_empty() { warn!("Received non-JSON input line, ignoring."); }
        return None;
    }
    debug!("<<< Received line ({} bytes)", trimmed_line.len());

    let parsed_json: Value = match serde_json::from_str(trimmed_line) {
        Ok(v) => v,
        Err(e) => {
            let error_resp = create_error_response(Value::Null, PARSE_ERROR, format!("Parse error: {}", e));
            return Some(serialize_response(&error_resp));
        }
    };

    // Notifications (no id or null id) never get a response
    if parsed_json.get("id").map_or(true, Value::is_null) {
        match parsed_json.get("method").and_then(|m| m.as_str()) {
            Some("notifications/initialized") | Some("initialized") => info!("Client initialization notification received"),
            Some(method) => info!("Unknown notification: {}", method),
            None => warn!("Received notification without method field"),
        }
        return None;
    }

    let id = parsed_json.get("id").cloned().unwrap_or(Value::Null);
    let req: RpcRequest = match serde_json::from_value(parsed_json) {
        Ok(r) => r,
        Err(e) => {
            let error_resp = create_error_response(id, INVALID_REQUEST, format!("Invalid Request: {}", e));
            return Some(serialize_response(&error_resp));
        }
    };

    let request_method = req.method.clone();
    let response = match tokio::time::timeout(config.request_timeout(), process_request(req, config.clone())).await {
        Ok(response) => response,
        Err(_) => {
            error!("Request processing timed out after {:?} for Method '{}', ID {:?}", config.request_timeout(), request_method, id);
            create_error_response(id, INTERNAL_ERROR, format!("Request timed out for method '{}'", request_method))
        }
    };
    Some(serialize_response(&response))
}

// --- Main Function ---
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(RpcConfig::from_env()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .init();

    info!("Starting covenant-rpc on stdio (default strategy: {})", config.default_strategy);
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut stdout = tokio::io::stdout();
    let mut line_buffer = String::new();

    let ready_msg = json!({"jsonrpc": "2.0", "method": "server/ready", "params": {"status": "ready"}});
    stdout.write_all(format!("{}\r\n", ready_msg).as_bytes()).await?;
    stdout.flush().await?;

    loop {
        line_buffer.clear();
        match reader.read_line(&mut line_buffer).await {
            Ok(0) => { info!("Stdin closed (EOF). Exiting server."); break; }
            Ok(_) => {
                if let Some(resp_str) = handle_line(&line_buffer, config.clone()).await {
                    if let Err(e) = stdout.write_all(format!("{}\r\n", resp_str).as_bytes()).await { error!("Failed to write response: {}", e); }
                    else if let Err(e) = stdout.flush().await { error!("Failed to flush stdout: {}", e); }
                }
            }
            Err(e) => { error!("Error reading from stdin: {}. Exiting.", e); break; }
        }
    }
    info!("covenant-rpc shutting down.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "c59df115ba2d3679cb2f164bcc3860474169126583f1d41d935b94dcb1abc521";
    const FAST_KEY: &str = "1AuMc-h0MAzxYdxMyORw00OVbH6IyRz9HXiKA9ALmDs";

    async fn call(request: Value) -> Value {
        let line = request.to_string();
        let response = handle_line(&line, Arc::new(RpcConfig::default()))
            .await
            .expect("request should get a response");
        serde_json::from_str(&response).unwrap()
    }

    fn error_code(response: &Value) -> i64 {
        response["error"]["code"].as_i64().expect("response should be an error")
    }

    #[tokio::test]
    async fn derive_key_fast_known_answer() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 1, "method": "derive_key", "params": {"secret": MASTER, "strategy": "fast"}})).await;
        assert_eq!(resp["result"]["key"], FAST_KEY);
        assert_eq!(resp["result"]["strategy"], "fast");
    }

    #[tokio::test]
    async fn derive_key_uses_default_strategy() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 2, "method": "derive_key", "params": {"secret": MASTER}})).await;
        assert_eq!(resp["result"]["key"], "pJa3r0-OrHymD3OcZWmm6PpkgqT7L5ce-89h10GjUz0");
        assert_eq!(resp["result"]["strategy"], "strong");
    }

    #[tokio::test]
    async fn derive_key_rejects_unknown_strategy() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 3, "method": "derive_key", "params": {"secret": "s", "strategy": "md5"}})).await;
        assert_eq!(error_code(&resp), i64::from(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn encrypt_then_decrypt_text() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 4, "method": "encrypt", "params": {"key": FAST_KEY, "text": "I AM THAT I AM"}})).await;
        let token = resp["result"]["token"].as_str().unwrap().to_string();

        let resp = call(json!({"jsonrpc": "2.0", "id": 5, "method": "decrypt", "params": {"key": FAST_KEY, "token": token}})).await;
        assert_eq!(resp["id"], 5);
        assert_eq!(resp["result"]["text"], "I AM THAT I AM");
        assert_eq!(resp["result"]["version"], 128);
        assert_eq!(resp["result"]["data"], BASE64.encode("I AM THAT I AM"));
    }

    #[tokio::test]
    async fn decrypt_binary_payload_has_no_text() {
        let data = BASE64.encode([0xff, 0xfe, 0x00]);
        let resp = call(json!({"jsonrpc": "2.0", "id": 6, "method": "encrypt", "params": {"key": FAST_KEY, "data": data}})).await;
        let token = resp["result"]["token"].as_str().unwrap().to_string();

        let resp = call(json!({"jsonrpc": "2.0", "id": 7, "method": "decrypt", "params": {"key": FAST_KEY, "token": token}})).await;
        assert_eq!(resp["result"]["data"], data);
        assert!(resp["result"].get("text").is_none());
    }

    #[tokio::test]
    async fn decrypt_known_token() {
        let token = "gAAAAABlU_EAAAECAwQFBgcICQoLDA0OD7vUolwap5T5QtJ7X2W0WlqVEtlARzrbkZFkIX7aQecZyAOkFdE-18Kr5l4Qe7BGkQ==";
        let resp = call(json!({"jsonrpc": "2.0", "id": 8, "method": "decrypt", "params": {"key": FAST_KEY, "token": token}})).await;
        assert_eq!(resp["result"]["timestamp_unix"], 1_700_000_000);
        assert_eq!(resp["result"]["timestamp"], "2023-11-14T22:13:20Z");
    }

    #[tokio::test]
    async fn decrypt_error_codes() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 9, "method": "encrypt", "params": {"key": FAST_KEY, "text": "x"}})).await;
        let token = resp["result"]["token"].as_str().unwrap().to_string();

        let other_key = KeyMaterial::from_bytes([9u8; 32]).to_base64();
        let resp = call(json!({"jsonrpc": "2.0", "id": 10, "method": "decrypt", "params": {"key": other_key, "token": token}})).await;
        assert_eq!(error_code(&resp), i64::from(AUTHENTICATION_FAILED));

        let resp = call(json!({"jsonrpc": "2.0", "id": 11, "method": "decrypt", "params": {"key": FAST_KEY, "token": "not a token"}})).await;
        assert_eq!(error_code(&resp), i64::from(MALFORMED_TOKEN));
    }

    #[tokio::test]
    async fn encrypt_rejects_bad_params() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 12, "method": "encrypt", "params": {"key": FAST_KEY, "text": "a", "data": "YQ=="}})).await;
        assert_eq!(error_code(&resp), i64::from(INVALID_PARAMS));

        let resp = call(json!({"jsonrpc": "2.0", "id": 13, "method": "encrypt", "params": {"key": "c2hvcnQ", "text": "a"}})).await;
        assert_eq!(error_code(&resp), i64::from(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn protocol_errors() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 14, "method": "sign"})).await;
        assert_eq!(error_code(&resp), i64::from(METHOD_NOT_FOUND));

        let resp = call(json!({"jsonrpc": "1.0", "id": 15, "method": "help"})).await;
        assert_eq!(error_code(&resp), i64::from(INVALID_REQUEST));

        let response = handle_line("{not json", Arc::new(RpcConfig::default())).await.unwrap();
        let resp: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(error_code(&resp), i64::from(PARSE_ERROR));
    }

    #[tokio::test]
    async fn notifications_and_noise_get_no_response() {
        let config = Arc::new(RpcConfig::default());
        assert!(handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, config.clone()).await.is_none());
        assert!(handle_line("hello", config.clone()).await.is_none());
        assert!(handle_line("   ", config).await.is_none());
    }

    #[tokio::test]
    async fn tools_are_listed() {
        let resp = call(json!({"jsonrpc": "2.0", "id": 16, "method": "tools/list"})).await;
        let names: Vec<&str> = resp["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 3);
        for name in ["derive_key", "encrypt", "decrypt"] {
            assert!(names.contains(&name));
        }

        let resp = call(json!({"jsonrpc": "2.0", "id": 17, "method": "initialize"})).await;
        assert!(resp["result"]["capabilities"]["tools"]["decrypt"].is_object());
    }
}
