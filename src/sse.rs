//! SSE terminal-message extraction for MCP responses.
//!
//! Streamable-HTTP MCP servers reply with `text/event-stream` bodies whose
//! events are JSON-RPC messages on `data:` lines. The policy provider wants
//! the final *response* (the event with an `id`), not the stream framing or
//! interleaved notifications, so the response phase reduces SSE bodies to
//! that last response event before evaluation.

/// True when the content type indicates an SSE stream.
///
/// Case-insensitive, tolerant of leading whitespace and trailing parameters
/// (`text/event-stream; charset=utf-8`).
pub fn is_sse_content_type(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("text/event-stream")
}

/// Extracts the last JSON-RPC response event from an SSE body.
///
/// Non-SSE content types and bodies without any valid response event are
/// returned unchanged. A "response event" is a `data:` payload that is valid
/// JSON with `"jsonrpc": "2.0"` and a nonempty `id`; notifications carry no
/// id and never qualify.
pub fn final_message<'a>(body: &'a [u8], content_type: &str) -> &'a [u8] {
    if !is_sse_content_type(content_type) {
        return body;
    }
    if body.is_empty() {
        return body;
    }

    let mut last_response: Option<&[u8]> = None;

    for line in body.split(|&b| b == b'\n') {
        let line = trim_ascii(line);
        let Some(data) = line.strip_prefix(b"data:") else {
            continue;
        };
        let data = trim_ascii(data);
        if data.is_empty() {
            continue;
        }
        if is_jsonrpc_response(data) {
            last_response = Some(data);
        }
    }

    last_response.unwrap_or(body)
}

/// ASCII-whitespace trim over a byte slice.
fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// True when the payload looks like a JSON-RPC response: valid JSON with
/// `jsonrpc == "2.0"` and a present `id`.
fn is_jsonrpc_response(data: &[u8]) -> bool {
    #[derive(serde::Deserialize)]
    struct Probe<'a> {
        #[serde(default)]
        jsonrpc: Option<String>,
        #[serde(default, borrow)]
        id: Option<&'a serde_json::value::RawValue>,
    }

    if !crate::mcp::is_json_object(data) {
        return false;
    }
    match serde_json::from_slice::<Probe<'_>>(data) {
        Ok(p) => {
            p.jsonrpc.as_deref() == Some("2.0") && p.id.is_some_and(|id| !id.get().is_empty())
        }
        Err(_) => false,
    }
}
