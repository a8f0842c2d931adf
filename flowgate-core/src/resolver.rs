//! History-component discovery.
//!
//! Before running a flow we fetch its definition and look for the node that
//! tracks conversation history. Prior messages are injected as a tweak keyed
//! by that node's id; flows without such a node simply run without history.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::error::{CoreResult, FlowgateError};
use crate::http_client::{BlockingHttpClient, HttpClient};

/// Id / declared-type prefix that marks a flow's history-tracking node.
pub const HISTORY_COMPONENT_PREFIX: &str = "CompletionInterface";

/// Fetch the flow definition and return the id of its history component.
///
/// `Ok(None)` means the flow has no history component; callers then run the
/// flow without injecting prior messages. Errors cover transport failures,
/// non-2xx responses, and definitions missing the `data`/`nodes` fields.
pub async fn resolve_history_component(
    http: &HttpClient,
    base: &str,
    flow: &str,
    api_key: &SecretString,
) -> CoreResult<Option<String>> {
    let url = format!("{base}/api/v1/flows/{flow}");
    let (body, _latency) = http
        .get_json::<Value>(&url, &[("x-api-key", api_key.expose_secret())], &[])
        .await?;
    find_history_component(&body)
}

/// Blocking twin of [`resolve_history_component`].
pub fn resolve_history_component_blocking(
    http: &BlockingHttpClient,
    base: &str,
    flow: &str,
    api_key: &SecretString,
) -> CoreResult<Option<String>> {
    let url = format!("{base}/api/v1/flows/{flow}");
    let (body, _latency) =
        http.get_json::<Value>(&url, &[("x-api-key", api_key.expose_secret())], &[])?;
    find_history_component(&body)
}

/// Scan a flow definition for the first node whose id or declared type starts
/// with [`HISTORY_COMPONENT_PREFIX`]. Nodes that match only by type but carry
/// no id are skipped; the tweak key must be an id.
fn find_history_component(body: &Value) -> CoreResult<Option<String>> {
    let data = body
        .get("data")
        .filter(|v| !v.is_null())
        .ok_or_else(|| missing_field("data", body))?;
    let nodes = data
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| missing_field("nodes", data))?;

    for node in nodes {
        let id = node.get("id").and_then(Value::as_str);
        let declared = node.pointer("/data/type").and_then(Value::as_str);
        let is_history = id.is_some_and(|s| s.starts_with(HISTORY_COMPONENT_PREFIX))
            || declared.is_some_and(|s| s.starts_with(HISTORY_COMPONENT_PREFIX));
        if is_history {
            if let Some(id) = id {
                tracing::debug!(component = id, "resolved history component");
                return Ok(Some(id.to_string()));
            }
        }
    }
    tracing::debug!("flow has no history component");
    Ok(None)
}

/// Malformed definition from an otherwise-successful fetch. Reported as an
/// upstream fault, with the fields that were present to aid debugging.
fn missing_field(field: &str, parent: &Value) -> FlowgateError {
    let existing = match parent.as_object() {
        Some(map) => map.keys().cloned().collect::<Vec<_>>().join(", "),
        None => String::new(),
    };
    tracing::warn!(field, existing = %existing, "flow definition is missing a field");
    FlowgateError::Upstream {
        status: 500,
        message: format!("missing {field} field in flow definition, existing fields: [{existing}]"),
        headers: None,
    }
}
