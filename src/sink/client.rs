//! Dry-run sink client.

use crate::sink::{SinkClient, SinkError, SinkRequest, SinkResponse};
use std::collections::HashMap;

/// Logs every request instead of sending it.
///
/// Key-value requests are served from an in-memory map so scripts that
/// read back what they wrote behave as they would against a real store.
#[derive(Debug, Default)]
pub struct LoggingSinkClient {
    name: String,
    connected: bool,
    store: HashMap<String, String>,
    calls: u64,
}

impl LoggingSinkClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn require_connection(&self) -> Result<(), SinkError> {
        if self.connected {
            Ok(())
        } else {
            Err(SinkError::Failed {
                sink: self.name.clone(),
                message: "not connected".to_string(),
            })
        }
    }
}

impl SinkClient for LoggingSinkClient {
    fn call(&mut self, request: &SinkRequest) -> Result<SinkResponse, SinkError> {
        self.calls += 1;
        tracing::info!(
            sink = %self.name,
            op = request.op(),
            records = request.records().map(|r| r.len()),
            "dry-run sink call"
        );
        tracing::debug!(sink = %self.name, "{:?}", request);

        match request {
            SinkRequest::Http { .. } | SinkRequest::HttpBatch { .. } => {
                Ok(SinkResponse::with_status(200))
            }
            SinkRequest::KvConnect { .. } => {
                self.connected = true;
                Ok(SinkResponse::ok())
            }
            SinkRequest::KvDisconnect => {
                self.connected = false;
                Ok(SinkResponse::ok())
            }
            SinkRequest::KvSet { key, value } => {
                self.require_connection()?;
                self.store.insert(key.clone(), value.clone());
                Ok(SinkResponse::ok())
            }
            SinkRequest::KvGet { key } => {
                self.require_connection()?;
                Ok(SinkResponse {
                    status: 0,
                    body: self.store.get(key).cloned(),
                })
            }
            SinkRequest::KvPush { key, records } => {
                self.require_connection()?;
                let entry = self.store.entry(key.clone()).or_default();
                for record in records {
                    if !entry.is_empty() {
                        entry.push('\n');
                    }
                    entry.push_str(record);
                }
                Ok(SinkResponse::ok())
            }
            SinkRequest::InfluxWrite { .. } => Ok(SinkResponse::with_status(204)),
            SinkRequest::TimescaleWrite { .. } => Ok(SinkResponse::ok()),
        }
    }

    fn close(&mut self) {
        tracing::debug!(sink = %self.name, calls = self.calls, "dry-run sink closed");
    }
}
