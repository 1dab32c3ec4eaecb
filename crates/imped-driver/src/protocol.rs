//! W3C WebDriver wire format
//!
//! Request bodies, response decoding and the mapping of remote errors onto
//! [`SessionError`]. Kept free of I/O so it can be tested without a browser.

use imped_core::{Locator, SessionError};
use serde::Deserialize;
use serde_json::{json, Value};

/// Key under which element references are returned
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: String,
    #[serde(default)]
    message: String,
}

/// Decode a response body into its `value`
///
/// # Errors
/// - `SessionError::ElementNotFound` for `no such element` / `stale element reference`
/// - `SessionError::Timeout` for `timeout` / `script timeout`
/// - `SessionError::Closed` for `invalid session id` / `no such window`
/// - `SessionError::Protocol` for every other remote error or a malformed body
pub fn decode_response(status: u16, body: &[u8]) -> Result<Value, SessionError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| SessionError::Protocol {
        error: format!("http {status}"),
        message: format!("undecodable response: {e}"),
    })?;

    if let Ok(remote) = RemoteError::deserialize(&envelope.value) {
        return Err(map_remote_error(remote));
    }
    if !(200..300).contains(&status) {
        return Err(SessionError::Protocol {
            error: format!("http {status}"),
            message: envelope.value.to_string(),
        });
    }
    Ok(envelope.value)
}

fn map_remote_error(remote: RemoteError) -> SessionError {
    match remote.error.as_str() {
        "no such element" | "stale element reference" => {
            SessionError::ElementNotFound(remote.message)
        }
        "timeout" | "script timeout" => SessionError::Timeout {
            what: remote.message,
            timeout_ms: 0,
        },
        "invalid session id" | "no such window" => SessionError::Closed,
        _ => SessionError::Protocol {
            error: remote.error,
            message: remote.message,
        },
    }
}

/// `POST /session` body for Chrome
#[must_use]
pub fn new_session_body(args: &[String], headless: bool) -> Value {
    let mut args: Vec<String> = args.to_vec();
    if headless && !args.iter().any(|a| a.starts_with("--headless")) {
        args.push("--headless=new".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

/// `POST /element` body
#[must_use]
pub fn find_element_body(locator: &Locator) -> Value {
    let using = match locator {
        Locator::Css(_) => "css selector",
        Locator::XPath(_) => "xpath",
    };
    json!({ "using": using, "value": locator.value() })
}

/// `goog/cdp/execute` body allowing downloads into `path`
#[must_use]
pub fn download_behavior_body(path: &str) -> Value {
    json!({
        "cmd": "Page.setDownloadBehavior",
        "params": { "behavior": "allow", "downloadPath": path }
    })
}

/// Extract the session id from a `POST /session` value
///
/// # Errors
/// - `SessionError::Launch` if the id is missing
pub fn session_id(value: &Value) -> Result<String, SessionError> {
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SessionError::Launch(format!("no sessionId in {value}")))
}

/// Extract an element reference
///
/// # Errors
/// - `SessionError::Protocol` if the reference is missing
pub fn element_id(value: &Value) -> Result<String, SessionError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SessionError::Protocol {
            error: "invalid element".to_string(),
            message: value.to_string(),
        })
}

/// Extract the handle from a `POST /window/new` value
///
/// # Errors
/// - `SessionError::Protocol` if the handle is missing
pub fn window_handle(value: &Value) -> Result<String, SessionError> {
    value
        .get("handle")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SessionError::Protocol {
            error: "invalid window".to_string(),
            message: value.to_string(),
        })
}

/// String array value, e.g. remaining window handles
#[must_use]
pub fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
