//! Egress to external systems.
//!
//! The gateway never talks to HTTP servers or databases itself. Each sink is
//! a [`SinkClient`] registered under a name; the gateway gives it a worker
//! thread and a FIFO queue, and offers two call shapes on top:
//!
//! - **synchronous**: blocks the calling hook until the reply arrives or the
//!   timeout expires, returning a typed result
//! - **asynchronous**: validates, enqueues and returns `true`/`false` at once;
//!   failures surface only as [`SinkEvent`]s
//!
//! Default sink names used by script hooks are [`HTTP_SINK`], [`KV_SINK`],
//! [`INFLUX_SINK`] and [`TIMESCALE_SINK`].

pub mod batch;
pub mod client;
pub mod event;
pub mod gateway;

pub use batch::{BatchMode, PendingBatch};
pub use client::LoggingSinkClient;
pub use event::{EventSink, SinkEvent};
pub use gateway::{
    SinkGateway, SinkGatewayBuilder, SinkGatewayConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_DRAIN_DEADLINE,
    DEFAULT_SINK_QUEUE_CAPACITY,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HTTP_SINK: &str = "http";
pub const KV_SINK: &str = "kv";
pub const INFLUX_SINK: &str = "influx";
pub const TIMESCALE_SINK: &str = "timescale";

/// Errors from sink calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("no sink named '{0}'")]
    UnknownSink(String),

    #[error("sink '{sink}' did not answer within {timeout_ms} ms")]
    Timeout { sink: String, timeout_ms: u64 },

    #[error("sink '{0}' queue is full")]
    QueueFull(String),

    #[error("sink gateway is shut down")]
    Closed,

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("sink '{sink}' failed: {message}")]
    Failed { sink: String, message: String },
}

impl SinkError {
    /// Short error kind for log records.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::UnknownSink(_) => "unknown_sink",
            SinkError::Timeout { .. } => "timeout",
            SinkError::QueueFull(_) => "queue_full",
            SinkError::Closed => "closed",
            SinkError::Malformed(_) => "malformed",
            SinkError::Failed { .. } => "failed",
        }
    }
}

/// One call to an external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SinkRequest {
    Http {
        method: String,
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        body: String,
    },
    /// One request whose body is the records joined by newlines.
    HttpBatch {
        method: String,
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
        records: Vec<String>,
    },
    KvConnect {
        address: String,
        #[serde(default)]
        password: Option<String>,
    },
    KvDisconnect,
    KvSet {
        key: String,
        value: String,
    },
    KvGet {
        key: String,
    },
    /// Append records to a list.
    KvPush {
        key: String,
        records: Vec<String>,
    },
    /// InfluxDB line protocol write.
    InfluxWrite {
        url: String,
        #[serde(default)]
        token: Option<String>,
        records: Vec<String>,
    },
    /// TimescaleDB insert of pre-formatted value rows.
    TimescaleWrite {
        dsn: String,
        table: String,
        records: Vec<String>,
    },
}

impl SinkRequest {
    pub fn op(&self) -> &'static str {
        match self {
            SinkRequest::Http { .. } => "http",
            SinkRequest::HttpBatch { .. } => "http_batch",
            SinkRequest::KvConnect { .. } => "kv_connect",
            SinkRequest::KvDisconnect => "kv_disconnect",
            SinkRequest::KvSet { .. } => "kv_set",
            SinkRequest::KvGet { .. } => "kv_get",
            SinkRequest::KvPush { .. } => "kv_push",
            SinkRequest::InfluxWrite { .. } => "influx_write",
            SinkRequest::TimescaleWrite { .. } => "timescale_write",
        }
    }

    /// Batch records carried by this request, if it is a batch kind.
    pub fn records(&self) -> Option<&[String]> {
        match self {
            SinkRequest::HttpBatch { records, .. }
            | SinkRequest::KvPush { records, .. }
            | SinkRequest::InfluxWrite { records, .. }
            | SinkRequest::TimescaleWrite { records, .. } => Some(records),
            _ => None,
        }
    }

    pub(crate) fn records_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            SinkRequest::HttpBatch { records, .. }
            | SinkRequest::KvPush { records, .. }
            | SinkRequest::InfluxWrite { records, .. }
            | SinkRequest::TimescaleWrite { records, .. } => Some(records),
            _ => None,
        }
    }

    /// Check one pre-formatted record for this request kind.
    pub fn validate_record(&self, record: &str) -> Result<(), SinkError> {
        if record.trim().is_empty() {
            return Err(SinkError::Malformed("empty record".to_string()));
        }
        match self {
            SinkRequest::HttpBatch { .. }
            | SinkRequest::InfluxWrite { .. }
            | SinkRequest::TimescaleWrite { .. }
                if record.contains('\n') =>
            {
                Err(SinkError::Malformed(format!(
                    "record spans several lines: {record:?}"
                )))
            }
            SinkRequest::InfluxWrite { .. } if !record.trim().contains(' ') => Err(
                SinkError::Malformed(format!("line protocol record has no field set: {record:?}")),
            ),
            _ => Ok(()),
        }
    }

    /// Check the non-record parts of the request.
    pub fn validate(&self) -> Result<(), SinkError> {
        let missing = |what: &str| Err(SinkError::Malformed(format!("{what} is empty")));
        match self {
            SinkRequest::Http { method, url, .. }
            | SinkRequest::HttpBatch { method, url, .. } => {
                if method.is_empty() {
                    return missing("method");
                }
                if url.is_empty() {
                    return missing("url");
                }
                Ok(())
            }
            SinkRequest::KvConnect { address, .. } if address.is_empty() => missing("address"),
            SinkRequest::KvSet { key, .. }
            | SinkRequest::KvGet { key }
            | SinkRequest::KvPush { key, .. }
                if key.is_empty() =>
            {
                missing("key")
            }
            SinkRequest::InfluxWrite { url, .. } if url.is_empty() => missing("url"),
            SinkRequest::TimescaleWrite { dsn, table, .. } => {
                if dsn.is_empty() {
                    return missing("dsn");
                }
                if table.is_empty() {
                    return missing("table");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Reply from a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkResponse {
    /// HTTP status, or 0 for non-HTTP sinks.
    pub status: u16,
    /// Response body, or the value for a key-value read.
    pub body: Option<String>,
}

impl SinkResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_status(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: Some(body.into()),
        }
    }
}

/// A concrete external-system client.
///
/// The gateway calls a client from exactly one worker thread, in queue order.
pub trait SinkClient: Send {
    fn call(&mut self, request: &SinkRequest) -> Result<SinkResponse, SinkError>;

    /// Called once when the sink's worker exits.
    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_influx_record_validation() {
        let req = SinkRequest::InfluxWrite {
            url: "http://localhost:8086".into(),
            token: None,
            records: vec![],
        };
        assert!(req.validate_record("pm,dev=1 pm25=12i").is_ok());
        assert!(req.validate_record("").is_err());
        assert!(req.validate_record("pm25").is_err());
        assert!(req.validate_record("a b\nc d").is_err());
    }

    #[test]
    fn test_request_validation() {
        let req = SinkRequest::Http {
            method: "POST".into(),
            url: String::new(),
            headers: vec![],
            body: String::new(),
        };
        assert_eq!(req.validate(), Err(SinkError::Malformed("url is empty".into())));
        assert!(SinkRequest::KvDisconnect.validate().is_ok());
    }

    #[test]
    fn test_http_batch_records() {
        let req = SinkRequest::HttpBatch {
            method: "POST".into(),
            url: "http://collector/ingest".into(),
            headers: vec![],
            records: vec![r#"{"pm2_5":12}"#.into()],
        };
        assert_eq!(req.op(), "http_batch");
        assert_eq!(req.records().map(|r| r.len()), Some(1));
        assert!(req.validate().is_ok());
        assert!(req.validate_record("a\nb").is_err());
    }

    #[test]
    fn test_request_json_shape() {
        let req = SinkRequest::KvSet {
            key: "pm25".into(),
            value: "12".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "kv_set");
        assert_eq!(req.op(), "kv_set");
    }
}
