//! Response phase end-to-end behavior, including the state/request handoff
//! from the access phase.

mod helpers;

use helpers::{allow_echo, test_config, wire_entry, MockGateway};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authgate::{AccessDecision, AuthGatePlugin, ResponseDecision};

fn plugin_for(server_uri: &str) -> AuthGatePlugin {
    AuthGatePlugin::new(test_config(server_uri)).expect("plugin should build")
}

/// Runs the access phase against its own stub provider so the context slots
/// are populated the way a real request would populate them. Only the
/// gateway context carries into the phase under test.
async fn run_access(gateway: &mut MockGateway, state: Option<Value>) {
    let server = MockServer::start().await;
    let mut overrides = json!({
        "url": format!("https://{}:{}{}", gateway.host, gateway.port, gateway.path)
    });
    if let Some(state) = state {
        overrides["state"] = state;
    }
    let echo = allow_echo(gateway, overrides);
    Mock::given(method("POST"))
        .and(path("/sideband/request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(echo))
        .mount(&server)
        .await;

    let access_plugin = plugin_for(&server.uri());
    let decision = access_plugin.on_access(gateway).await;
    assert!(matches!(decision, AccessDecision::Continue));
}

#[tokio::test]
async fn state_flows_to_response_phase_and_result_replaces_response() {
    let server = MockServer::start().await;
    let plugin = plugin_for(&server.uri());
    let mut gateway = MockGateway::default()
        .with_upstream(200, "application/json", r#"{"upstream":"data"}"#)
        .with_upstream_header("Date", json!("Mon, 27 Jul 2026 10:00:00 GMT"));

    run_access(&mut gateway, Some(json!({"session": "s1"}))).await;

    Mock::given(method("POST"))
        .and(path("/sideband/response"))
        .and(body_partial_json(json!({
            "method": "GET",
            "response_code": "200",
            "response_status": "OK",
            "state": {"session": "s1"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response_code": "200",
            "body": "{}",
            "headers": [{"content-type": "application/json"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let decision = plugin.on_response(&mut gateway).await;
    let ResponseDecision::Replace(exit) = decision else {
        panic!("expected replace");
    };
    assert_eq!(exit.status, 200);
    assert_eq!(exit.body.as_ref(), b"{}");
    assert_eq!(exit.headers["content-type"], vec!["application/json"]);
    // Preserved upstream headers survive even though the provider omitted
    // them.
    assert_eq!(
        exit.headers["date"],
        vec!["Mon, 27 Jul 2026 10:00:00 GMT"]
    );

    // state and request are mutually exclusive on the wire.
    let requests = server.received_requests().await.expect("requests");
    let sent: Value = serde_json::from_slice(&requests[0].body).expect("json");
    assert_eq!(sent["state"]["session"], "s1");
    assert!(sent.get("request").is_none());
}

#[tokio::test]
async fn without_state_the_original_request_is_sent() {
    let server = MockServer::start().await;
    let plugin = plugin_for(&server.uri());
    let mut gateway = MockGateway::default();

    run_access(&mut gateway, None).await;

    Mock::given(method("POST"))
        .and(path("/sideband/response"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response_code": "200",
            "body": "{}",
            "headers": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let _ = plugin.on_response(&mut gateway).await;

    let requests = server.received_requests().await.expect("requests");
    let sent: Value = serde_json::from_slice(&requests[0].body).expect("json");
    assert!(sent.get("state").is_none());
    assert_eq!(sent["request"]["source_ip"], "10.0.0.1");
    assert_eq!(sent["request"]["method"], "GET");
}

#[tokio::test]
async fn sse_body_reduced_to_final_jsonrpc_message() {
    let server = MockServer::start().await;
    let plugin = plugin_for(&server.uri());

    let sse_body = concat!(
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n",
        "\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"temperature\":18}}\n",
        "\n",
    );
    let mut gateway = MockGateway::default()
        .with_method("POST")
        .with_path("/mcp")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_weather"}}"#)
        .with_upstream(200, "text/event-stream", sse_body);

    run_access(&mut gateway, None).await;

    Mock::given(method("POST"))
        .and(path("/sideband/response"))
        .and(body_partial_json(json!({
            "body": "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"temperature\":18}}",
            "traffic_type": "mcp",
            "mcp": {"mcp_method": "tools/call", "mcp_tool_name": "get_weather"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response_code": "200",
            "body": "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"temperature\":18}}",
            "headers": [{"content-type": "application/json"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let decision = plugin.on_response(&mut gateway).await;
    assert!(matches!(decision, ResponseDecision::Replace(_)));
}

#[tokio::test]
async fn non_sse_mcp_response_carries_access_context() {
    let server = MockServer::start().await;
    let plugin = plugin_for(&server.uri());
    let mut gateway = MockGateway::default()
        .with_method("POST")
        .with_path("/mcp")
        .with_body(r#"{"jsonrpc":"2.0","id":"q-1","method":"resources/read","params":{"uri":"db://a"}}"#)
        .with_upstream(200, "application/json", r#"{"jsonrpc":"2.0","id":"q-1","result":{}}"#);

    run_access(&mut gateway, None).await;

    Mock::given(method("POST"))
        .and(path("/sideband/response"))
        .and(body_partial_json(json!({
            "traffic_type": "mcp",
            "mcp": {
                "mcp_method": "resources/read",
                "mcp_resource_uri": "db://a",
                "mcp_jsonrpc_id": "q-1"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response_code": "200",
            "body": "{}",
            "headers": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let _ = plugin.on_response(&mut gateway).await;
    server.verify().await;
}

#[tokio::test]
async fn skip_response_phase_forwards_without_calling_provider() {
    let server = MockServer::start().await;
    let mut config = test_config(&server.uri());
    config.skip_response_phase = true;
    let plugin = AuthGatePlugin::new(config).expect("plugin");
    let mut gateway = MockGateway::default();

    let decision = plugin.on_response(&mut gateway).await;
    assert!(matches!(decision, ResponseDecision::Forward));
    assert!(server.received_requests().await.expect("requests").is_empty());
}

#[tokio::test]
async fn unreachable_provider_fail_open_forwards_upstream() {
    let mut config = test_config("http://127.0.0.1:1");
    config.fail_open = true;
    let plugin = AuthGatePlugin::new(config).expect("plugin");
    let mut gateway = MockGateway::default();

    let decision = plugin.on_response(&mut gateway).await;
    assert!(matches!(decision, ResponseDecision::Forward));
}

#[tokio::test]
async fn unreachable_provider_fail_closed_replaces_with_502() {
    let plugin = AuthGatePlugin::new(test_config("http://127.0.0.1:1")).expect("plugin");
    let mut gateway = MockGateway::default();

    let decision = plugin.on_response(&mut gateway).await;
    let ResponseDecision::Replace(exit) = decision else {
        panic!("expected replace");
    };
    assert_eq!(exit.status, 502);
    assert!(exit.body.is_empty());
}

#[tokio::test]
async fn response_result_bad_code_defaults_to_200() {
    let server = MockServer::start().await;
    let plugin = plugin_for(&server.uri());
    let mut gateway = MockGateway::default();

    Mock::given(method("POST"))
        .and(path("/sideband/response"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response_code": "weird",
            "body": "ok",
            "headers": [wire_entry("content-type", "text/plain")]
        })))
        .mount(&server)
        .await;

    let decision = plugin.on_response(&mut gateway).await;
    let ResponseDecision::Replace(exit) = decision else {
        panic!("expected replace");
    };
    assert_eq!(exit.status, 200);
    assert_eq!(exit.body.as_ref(), b"ok");
}

#[tokio::test]
async fn passthrough_status_applies_in_response_phase() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sideband/response"))
        .respond_with(ResponseTemplate::new(413).set_body_string(r#"{"message":"too big"}"#))
        .mount(&server)
        .await;

    let plugin = plugin_for(&server.uri());
    let mut gateway = MockGateway::default();
    let decision = plugin.on_response(&mut gateway).await;

    let ResponseDecision::Replace(exit) = decision else {
        panic!("expected replace");
    };
    assert_eq!(exit.status, 413);
    assert_eq!(exit.body.as_ref(), br#"{"message":"too big"}"#);
}
