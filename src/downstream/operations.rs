//! Registered downstream operations.
//!
//! The table is built once at startup: operation name → method, path template and
//! whether the response may be cached. Handlers and task workers resolve requests
//! through it instead of building URLs themselves.
//!
//! Parameters named by a `{placeholder}` become path segments; every other parameter is
//! sent as a query string pair.

use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;

use crate::downstream::types::{GatewayError, GatewayResult};
use crate::security::identity::credential_digest;

/// One downstream capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
    pub method: Method,
    /// Path relative to the downstream base URL, with `{param}` placeholders.
    pub path: String,
    pub cacheable: bool,
}

/// A fully resolved request ready for the executor.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub operation: String,
    pub method: Method,
    pub path: String,
    /// Query pairs, sorted by name.
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Per-tenant key sent instead of the configured one.
    pub credential: Option<String>,
    pub cacheable: bool,
}

impl DownstreamRequest {
    /// Cache key scoped to operation, path, query and tenant.
    pub fn cache_key(&self) -> String {
        let tenant = self
            .credential
            .as_deref()
            .map(credential_digest)
            .unwrap_or_else(|| "default".to_string());
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}?{}:{}", self.operation, self.path, query, tenant)
    }
}

const DEFAULT_OPERATIONS: &[(&str, &str, &str, bool)] = &[
    ("get_devices", "GET", "/devices", true),
    ("claim_device", "POST", "/devices/claim", false),
    ("get_device", "GET", "/devices/{device_id}", true),
    ("delete_device", "DELETE", "/devices/{device_id}", false),
    ("update_device", "PATCH", "/devices/{device_id}", false),
    ("get_device_histories", "GET", "/devices/histories", false),
    ("get_device_analytics", "GET", "/devices/{device_id}/analytics", false),
    ("send_command", "POST", "/devices/{device_id}/commands", false),
    ("cancel_command", "DELETE", "/devices/{device_id}/commands/{command_id}", false),
    ("get_commands", "GET", "/devices/{device_id}/commands", false),
    ("get_organization_info", "GET", "/info", false),
    ("get_incidents", "GET", "/incidents", true),
    ("get_tickets", "GET", "/tickets", true),
    ("get_ticket", "GET", "/tickets/{ticket_id}", false),
    ("update_ticket", "PUT", "/tickets/{ticket_id}", false),
    ("mark_ticket_resolved", "POST", "/tickets/{ticket_id}/resolved", false),
    ("send_ticket_message", "POST", "/tickets/{ticket_id}/message", false),
];

/// Name → operation lookup table.
#[derive(Debug, Clone)]
pub struct OperationTable {
    operations: HashMap<String, Operation>,
}

impl Default for OperationTable {
    fn default() -> Self {
        let operations = DEFAULT_OPERATIONS
            .iter()
            .map(|(name, method, path, cacheable)| {
                let method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);
                (
                    name.to_string(),
                    Operation {
                        name: name.to_string(),
                        method,
                        path: path.to_string(),
                        cacheable: *cacheable,
                    },
                )
            })
            .collect();
        Self { operations }
    }
}

impl OperationTable {
    /// Default table with path templates overridden from configuration.
    ///
    /// Overrides naming unknown operations are ignored with a warning.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut table = Self::default();
        for (name, path) in overrides {
            match table.operations.get_mut(name) {
                Some(op) => op.path = path.clone(),
                None => tracing::warn!(operation = %name, "Ignoring endpoint override for unknown operation"),
            }
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a named operation into a request.
    pub fn build_request(
        &self,
        name: &str,
        params: &HashMap<String, String>,
        body: Option<Value>,
        credential: Option<String>,
    ) -> GatewayResult<DownstreamRequest> {
        let op = self
            .get(name)
            .ok_or_else(|| GatewayError::invalid_params(format!("unknown operation '{}'", name)))?;
        let path = render_path(&op.path, params)?;
        let placeholders = placeholders(&op.path);
        let mut query: Vec<(String, String)> = params
            .iter()
            .filter(|(k, _)| !placeholders.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        query.sort();

        Ok(DownstreamRequest {
            operation: op.name.clone(),
            method: op.method.clone(),
            path,
            query,
            body,
            credential,
            cacheable: op.cacheable && op.method == Method::GET,
        })
    }
}

/// Substitute `{param}` placeholders, rejecting missing or malformed identifiers.
pub fn render_path(template: &str, params: &HashMap<String, String>) -> GatewayResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| GatewayError::invalid_params(format!("unterminated placeholder in '{}'", template)))?;
        let key = &after[..end];
        let value = params
            .get(key)
            .ok_or_else(|| GatewayError::invalid_params(format!("missing parameter '{}'", key)))?;
        validate_identifier(key, value)?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Names of the `{param}` placeholders in `template`.
fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        names.push(&after[..end]);
        rest = &after[end + 1..];
    }
    names
}

fn validate_identifier(key: &str, value: &str) -> GatewayResult<()> {
    let malformed = value.is_empty()
        || value.contains("..")
        || value
            .chars()
            .any(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace() || c.is_control());
    if malformed {
        return Err(GatewayError::invalid_params(format!(
            "malformed identifier for '{}': {:?}",
            key, value
        )));
    }
    Ok(())
}
