//! OpenTelemetry instruments for the sideband path.
//!
//! The plugin records; exporting is the host's concern. The host passes a `Meter`
//! from whatever provider it runs, and a plugin without one records nothing.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::breaker::Trigger;

/// Metrics collector for sideband calls and policy decisions.
#[derive(Clone)]
pub struct SidebandMetrics {
    /// Sideband call latency in milliseconds
    duration_ms: Histogram<f64>,
    /// Total sideband calls by phase and outcome
    calls_total: Counter<u64>,
    /// Circuit breaker transitions by trigger
    breaker_transitions_total: Counter<u64>,
    /// Policy decisions by phase and decision
    decisions_total: Counter<u64>,
    /// MCP requests by method
    mcp_requests_total: Counter<u64>,
    /// MCP denials by method
    mcp_denied_total: Counter<u64>,
    /// MCP tool calls by tool name
    mcp_tool_calls_total: Counter<u64>,
}

impl SidebandMetrics {
    /// Creates the instrument set on the given meter.
    pub fn new(meter: &Meter) -> Self {
        Self {
            duration_ms: meter
                .f64_histogram("authgate_sideband_duration_ms")
                .with_description("Sideband call latency in milliseconds")
                .build(),
            calls_total: meter
                .u64_counter("authgate_sideband_total")
                .with_description("Total sideband calls")
                .build(),
            breaker_transitions_total: meter
                .u64_counter("authgate_circuit_breaker_transitions_total")
                .with_description("Circuit breaker open transitions by trigger")
                .build(),
            decisions_total: meter
                .u64_counter("authgate_policy_decisions_total")
                .with_description("Policy decision counts")
                .build(),
            mcp_requests_total: meter
                .u64_counter("authgate_mcp_requests_total")
                .with_description("Total MCP requests by method")
                .build(),
            mcp_denied_total: meter
                .u64_counter("authgate_mcp_denied_total")
                .with_description("Total MCP denied requests by method")
                .build(),
            mcp_tool_calls_total: meter
                .u64_counter("authgate_mcp_tool_calls_total")
                .with_description("Total MCP tool calls by tool name")
                .build(),
        }
    }

    /// Records one sideband call with its latency.
    pub fn record_sideband_call(&self, phase: &'static str, outcome: &'static str, millis: f64) {
        let attrs = [
            KeyValue::new("phase", phase),
            KeyValue::new("outcome", outcome),
        ];
        self.calls_total.add(1, &attrs);
        self.duration_ms.record(millis, &attrs);
    }

    /// Records a breaker open transition.
    pub fn record_breaker_open(&self, trigger: Trigger) {
        self.breaker_transitions_total
            .add(1, &[KeyValue::new("trigger", trigger.to_string())]);
    }

    /// Records a policy decision.
    pub fn record_decision(&self, phase: &'static str, decision: &'static str) {
        self.decisions_total.add(
            1,
            &[
                KeyValue::new("phase", phase),
                KeyValue::new("decision", decision),
            ],
        );
    }

    /// Records a detected MCP request, plus the tool call when applicable.
    pub fn record_mcp_request(&self, method: &str, tool_name: Option<&str>) {
        self.mcp_requests_total
            .add(1, &[KeyValue::new("mcp_method", method.to_string())]);
        if let Some(tool) = tool_name {
            self.mcp_tool_calls_total
                .add(1, &[KeyValue::new("tool_name", tool.to_string())]);
        }
    }

    /// Records a denied MCP request.
    pub fn record_mcp_denied(&self, method: &str) {
        self.mcp_denied_total
            .add(1, &[KeyValue::new("mcp_method", method.to_string())]);
    }
}
