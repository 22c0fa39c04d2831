//! Shared test doubles for the integration suite.

#![allow(dead_code)]

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{json, Value};

use authgate::gateway::GatewayError;
use authgate::headers::HeaderTable;
use authgate::{ClientRequest, RequestContext, RequestEditor, ServiceResponse};

/// In-memory gateway double implementing all four façade traits.
///
/// Mutations are applied to the stored fields so tests can assert the final
/// request the upstream would have seen; cleared header names are recorded
/// separately.
pub struct MockGateway {
    pub client_ip: String,
    pub client_port: u16,
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub body: Bytes,
    pub headers: HeaderTable,
    pub version: http::Version,
    pub cert_pem: Option<String>,

    pub upstream_status: u16,
    pub upstream_headers: HeaderTable,
    pub upstream_body: Bytes,

    pub ctx: HashMap<String, String>,
    pub cleared_headers: Vec<String>,
}

impl Default for MockGateway {
    fn default() -> Self {
        let mut headers = HeaderTable::new();
        headers.insert("Host".to_string(), json!("svc.example.com"));
        headers.insert("Accept".to_string(), json!("application/json"));

        let mut upstream_headers = HeaderTable::new();
        upstream_headers.insert("Content-Type".to_string(), json!("application/json"));

        Self {
            client_ip: "10.0.0.1".to_string(),
            client_port: 52114,
            method: "GET".to_string(),
            scheme: "https".to_string(),
            host: "svc.example.com".to_string(),
            port: 443,
            path: "/resource".to_string(),
            query: String::new(),
            body: Bytes::new(),
            headers,
            version: http::Version::HTTP_11,
            cert_pem: None,
            upstream_status: 200,
            upstream_headers,
            upstream_body: Bytes::from_static(b"{\"data\":1}"),
            ctx: HashMap::new(),
            cleared_headers: Vec::new(),
        }
    }
}

impl MockGateway {
    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Bytes::from(body.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: Value) -> Self {
        self.headers.insert(name.to_string(), value);
        self
    }

    pub fn with_upstream(mut self, status: u16, content_type: &str, body: &str) -> Self {
        self.upstream_status = status;
        self.upstream_headers = HeaderTable::new();
        self.upstream_headers
            .insert("Content-Type".to_string(), json!(content_type));
        self.upstream_body = Bytes::from(body.to_string());
        self
    }

    pub fn with_upstream_header(mut self, name: &str, value: Value) -> Self {
        self.upstream_headers.insert(name.to_string(), value);
        self
    }

    /// First value of a current request header, by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<String> {
        self.headers.iter().find_map(|(k, v)| {
            if !k.eq_ignore_ascii_case(name) {
                return None;
            }
            match v {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => items.first().and_then(|i| i.as_str().map(String::from)),
                _ => None,
            }
        })
    }
}

impl ClientRequest for MockGateway {
    fn client_ip(&self) -> Result<String, GatewayError> {
        Ok(self.client_ip.clone())
    }

    fn client_port(&self) -> Result<u16, GatewayError> {
        Ok(self.client_port)
    }

    fn method(&self) -> Result<String, GatewayError> {
        Ok(self.method.clone())
    }

    fn forwarded_scheme(&self) -> Result<String, GatewayError> {
        Ok(self.scheme.clone())
    }

    fn forwarded_host(&self) -> Result<String, GatewayError> {
        Ok(self.host.clone())
    }

    fn forwarded_port(&self) -> Result<u16, GatewayError> {
        Ok(self.port)
    }

    fn path(&self) -> Result<String, GatewayError> {
        Ok(self.path.clone())
    }

    fn raw_query(&self) -> Result<String, GatewayError> {
        Ok(self.query.clone())
    }

    fn raw_body(&self) -> Result<Bytes, GatewayError> {
        Ok(self.body.clone())
    }

    fn headers(&self) -> Result<HeaderTable, GatewayError> {
        Ok(self.headers.clone())
    }

    fn http_version(&self) -> Result<http::Version, GatewayError> {
        Ok(self.version)
    }

    fn client_cert_pem(&self) -> Option<String> {
        self.cert_pem.clone()
    }
}

impl RequestEditor for MockGateway {
    fn set_header(&mut self, name: &str, value: &str) {
        let lower = name.to_ascii_lowercase();
        self.headers.retain(|k, _| k.to_ascii_lowercase() != lower);
        self.headers.insert(name.to_string(), json!(value));
    }

    fn add_header(&mut self, name: &str, value: &str) {
        match self.headers.get_mut(name) {
            Some(Value::Array(items)) => items.push(json!(value)),
            Some(existing) => {
                let prior = existing.clone();
                *existing = json!([prior, value]);
            }
            None => {
                self.headers.insert(name.to_string(), json!(value));
            }
        }
    }

    fn clear_header(&mut self, name: &str) {
        self.cleared_headers.push(name.to_string());
        let lower = name.to_ascii_lowercase();
        self.headers.retain(|k, _| k.to_ascii_lowercase() != lower);
    }

    fn set_method(&mut self, method: &str) {
        self.method = method.to_string();
    }

    fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    fn set_raw_query(&mut self, query: &str) {
        self.query = query.to_string();
    }

    fn set_raw_body(&mut self, body: &str) {
        self.body = Bytes::from(body.to_string());
    }
}

impl ServiceResponse for MockGateway {
    fn upstream_status(&self) -> Result<u16, GatewayError> {
        Ok(self.upstream_status)
    }

    fn upstream_headers(&self) -> Result<HeaderTable, GatewayError> {
        Ok(self.upstream_headers.clone())
    }

    fn upstream_body(&self) -> Result<Bytes, GatewayError> {
        Ok(self.upstream_body.clone())
    }
}

impl RequestContext for MockGateway {
    fn ctx_set(&mut self, key: &str, value: String) {
        self.ctx.insert(key.to_string(), value);
    }

    fn ctx_get(&self, key: &str) -> Option<String> {
        self.ctx.get(key).cloned()
    }
}

/// Plugin config pointed at a wiremock server, tuned for fast tests.
pub fn test_config(server_uri: &str) -> authgate::PluginConfig {
    let mut config = authgate::PluginConfig::for_service_url(server_uri);
    config.retry_backoff_ms = 10;
    config
}

/// A single-entry wire header object.
pub fn wire_entry(name: &str, value: &str) -> Value {
    let mut entry = serde_json::Map::new();
    entry.insert(name.to_ascii_lowercase(), json!(value));
    Value::Object(entry)
}

/// The provider echo for an allow decision: the request's own headers, plus
/// optional field overrides supplied as a JSON object.
pub fn allow_echo(gateway: &MockGateway, overrides: Value) -> Value {
    let wire_headers: Vec<Value> = gateway
        .headers
        .iter()
        .flat_map(|(name, value)| match value {
            Value::String(s) => vec![wire_entry(name, s)],
            Value::Array(items) => items
                .iter()
                .filter_map(|i| i.as_str().map(|s| wire_entry(name, s)))
                .collect(),
            _ => Vec::new(),
        })
        .collect();

    let mut echo = json!({
        "source_ip": gateway.client_ip,
        "source_port": gateway.client_port.to_string(),
        "method": gateway.method,
        "headers": wire_headers,
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut echo, overrides) {
        for (k, v) in extra {
            base.insert(k, v);
        }
    }
    echo
}
