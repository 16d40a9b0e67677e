//! Log records.
//!
//! A [`LogRecord`] is what the request path fills in; a [`SinkRecord`] is
//! the flattened form a sink writes out, with the field names downstream
//! log collection expects.

use crate::config::ServerIdentity;
use nano_core::RequestContext;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Level;

/// The kind of request log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogKind {
    /// Completed request.
    #[default]
    Access,
    /// Declared failure.
    Warn,
    /// Unclassified failure or panic.
    Error,
}

impl LogKind {
    /// All kinds, in pool slot order.
    pub const ALL: [Self; 3] = [Self::Access, Self::Warn, Self::Error];

    /// The `log_type` value written to the sink.
    #[must_use]
    pub const fn log_type(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Warn => "warning",
            Self::Error => "error",
        }
    }

    /// Suffix of the `event` field.
    #[must_use]
    pub const fn event_suffix(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Warn | Self::Error => "error",
        }
    }

    /// Level the record is emitted at.
    #[must_use]
    pub const fn level(&self) -> Level {
        match self {
            Self::Access => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }

    pub(crate) const fn slot(self) -> usize {
        match self {
            Self::Access => 0,
            Self::Warn => 1,
            Self::Error => 2,
        }
    }
}

/// A mutable, pooled log record.
#[derive(Debug, Default)]
pub struct LogRecord {
    /// Record kind.
    pub kind: LogKind,
    /// Stream the record goes to.
    pub stream: String,
    /// Request context snapshot.
    pub context: Option<RequestContext>,
    /// Time spent serving the request.
    pub duration: Duration,
    /// Error code, empty for access records.
    pub error_code: String,
    /// Failure reason, empty for access records.
    pub reason: String,
}

impl LogRecord {
    /// Clears all request data, keeping string capacity for reuse.
    pub fn reset(&mut self) {
        self.stream.clear();
        self.context = None;
        self.duration = Duration::ZERO;
        self.error_code.clear();
        self.reason.clear();
    }

    /// Flattens the record for a sink.
    #[must_use]
    pub fn to_sink_record(&self, identity: &ServerIdentity) -> SinkRecord {
        let empty = RequestContext::default();
        let ctx = self.context.as_ref().unwrap_or(&empty);

        let mut out = SinkRecord::for_context(
            self.kind.log_type(),
            identity.event(self.kind.event_suffix()),
            identity,
            ctx,
        );
        out.time = self.duration.as_secs_f64();
        if self.kind != LogKind::Access {
            out.error_code = Some(self.error_code.clone());
            out.query = Some(ctx.payload());
            out.reason = Some(self.reason.clone());
        }
        out
    }
}

/// The flattened record handed to a [`Sink`](crate::sink::Sink).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    /// `access`, `warning`, `error` or `project`.
    pub log_type: String,
    /// `<group>_<name>_<suffix>`.
    pub event: String,
    /// Local service name.
    #[serde(rename = "logServer")]
    pub log_server: String,
    /// Local service group.
    #[serde(rename = "logServerGroup")]
    pub log_server_group: String,
    /// `rest`, `grpc`, `jrpc` or `tcp`.
    #[serde(rename = "requestType")]
    pub request_type: String,
    /// Function or route served.
    #[serde(rename = "requestFunc")]
    pub request_func: String,
    /// Calling service name.
    #[serde(rename = "fromApp")]
    pub from_app: String,
    /// Calling service group.
    #[serde(rename = "fromProject")]
    pub from_project: String,
    /// Request id.
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Client address.
    #[serde(rename = "clientIp")]
    pub client_ip: String,
    /// Client user agent.
    #[serde(rename = "user-agent")]
    pub user_agent: String,
    /// Duration in seconds.
    pub time: f64,
    /// Error code.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<String>,
    /// Stringified request payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    /// Free-form fields of project records.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl SinkRecord {
    /// Builds a record carrying the identity and request fields only.
    #[must_use]
    pub fn for_context(
        log_type: &str,
        event: String,
        identity: &ServerIdentity,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            log_type: log_type.to_string(),
            event,
            log_server: identity.name.clone(),
            log_server_group: identity.group.clone(),
            request_type: ctx.request_type().as_str().to_string(),
            request_func: ctx.function_name().to_string(),
            from_app: ctx.caller_name().to_string(),
            from_project: ctx.caller_group().to_string(),
            request_id: ctx.request_id().to_string(),
            client_ip: ctx.client_ip().to_string(),
            user_agent: ctx.user_agent().to_string(),
            time: 0.0,
            error_code: None,
            query: None,
            reason: None,
            properties: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nano_core::{keys, ContextValue, RequestType};

    fn context() -> RequestContext {
        RequestContext::base(RequestType::Rest)
            .append([
                keys::REQUEST_FUNC,
                "POST /orders",
                keys::REQUEST_ID,
                "req-1",
                keys::SERVER_NAME,
                "checkout",
                keys::SERVER_GROUP,
                "shop",
                keys::CONTEXT_IP,
                "10.0.0.1",
                keys::USER_AGENT,
                "curl/8",
            ])
            .unwrap()
            .with(keys::REQUEST_INFO, ContextValue::payload(vec![1, 2]))
    }

    #[test]
    fn test_access_sink_record() {
        let record = LogRecord {
            kind: LogKind::Access,
            stream: "access".into(),
            context: Some(context()),
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let out = record.to_sink_record(&ServerIdentity::new("orders", "shop"));

        assert_eq!(out.log_type, "access");
        assert_eq!(out.event, "shop_orders_access");
        assert_eq!(out.log_server, "orders");
        assert_eq!(out.request_type, "rest");
        assert_eq!(out.from_app, "checkout");
        assert!((out.time - 1.5).abs() < f64::EPSILON);
        assert!(out.error_code.is_none());
        assert!(out.query.is_none());
    }

    #[test]
    fn test_failure_sink_record_field_names() {
        let record = LogRecord {
            kind: LogKind::Warn,
            stream: "warning".into(),
            context: Some(context()),
            duration: Duration::from_millis(3),
            error_code: "10002".into(),
            reason: "project_validator_error".into(),
        };
        let out = record.to_sink_record(&ServerIdentity::new("orders", "shop"));
        let json = serde_json::to_value(&out).unwrap();

        assert_eq!(json["log_type"], "warning");
        assert_eq!(json["event"], "shop_orders_error");
        assert_eq!(json["logServerGroup"], "shop");
        assert_eq!(json["requestFunc"], "POST /orders");
        assert_eq!(json["fromProject"], "shop");
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["clientIp"], "10.0.0.1");
        assert_eq!(json["user-agent"], "curl/8");
        assert_eq!(json["error_code"], "10002");
        assert_eq!(json["query"], "[1, 2]");
        assert_eq!(json["reason"], "project_validator_error");
        assert!(json.get("properties").is_none());
    }

    #[test]
    fn test_reset_clears_request_data() {
        let mut record = LogRecord {
            kind: LogKind::Error,
            stream: "error".into(),
            context: Some(context()),
            duration: Duration::from_secs(1),
            error_code: "10001".into(),
            reason: "boom".into(),
        };
        record.reset();
        assert!(record.stream.is_empty());
        assert!(record.context.is_none());
        assert_eq!(record.duration, Duration::ZERO);
        assert!(record.reason.is_empty());
    }

    #[test]
    fn test_missing_context_defaults() {
        let record = LogRecord::default();
        let out = record.to_sink_record(&ServerIdentity::default());
        assert_eq!(out.request_type, "grpc");
        assert_eq!(out.request_id, "");
    }
}
