//! Record batching.

use crate::sink::{SinkError, SinkRequest};
use serde::{Deserialize, Serialize};

/// What to do with a malformed record inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// One malformed record fails the whole batch.
    #[default]
    AllOrNothing,
    /// Malformed records are dropped and reported; the rest is sent.
    SkipMalformed,
}

/// Records accumulated between flush points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    records: Vec<String>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: impl Into<String>) {
        self.records.push(record.into());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Hand the records to `send` and leave the batch empty, whatever
    /// `send` returns.
    pub fn flush<R>(&mut self, send: impl FnOnce(Vec<String>) -> R) -> R {
        send(std::mem::take(&mut self.records))
    }
}

/// Records dropped while applying [`BatchMode::SkipMalformed`].
pub(crate) type Skipped = Vec<SinkError>;

/// Apply `mode` to the records of a batch request.
///
/// Returns the request to send (`None` when nothing is left to send) and
/// the errors for records that were skipped.
pub(crate) fn apply_batch_mode(
    mut request: SinkRequest,
    mode: BatchMode,
) -> Result<(Option<SinkRequest>, Skipped), SinkError> {
    let verdicts: Vec<Result<(), SinkError>> = match request.records() {
        Some(records) => records.iter().map(|r| request.validate_record(r)).collect(),
        None => return Ok((Some(request), Vec::new())),
    };
    if verdicts.is_empty() {
        return Ok((None, Vec::new()));
    }

    match mode {
        BatchMode::AllOrNothing => {
            if let Some(Err(err)) = verdicts.into_iter().find(|v| v.is_err()) {
                return Err(err);
            }
            Ok((Some(request), Vec::new()))
        }
        BatchMode::SkipMalformed => {
            let mut skipped = Vec::new();
            let mut verdicts = verdicts.into_iter();
            if let Some(records) = request.records_mut() {
                records.retain(|_| match verdicts.next() {
                    Some(Err(err)) => {
                        skipped.push(err);
                        false
                    }
                    _ => true,
                });
                if records.is_empty() {
                    return Ok((None, skipped));
                }
            }
            Ok((Some(request), skipped))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn influx(records: &[&str]) -> SinkRequest {
        SinkRequest::InfluxWrite {
            url: "http://db:8086".into(),
            token: None,
            records: records.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_flush_always_clears() {
        let mut batch = PendingBatch::new();
        batch.push("a x=1");
        batch.push("a x=2");
        let result: Result<(), &str> = batch.flush(|records| {
            assert_eq!(records.len(), 2);
            Err("down")
        });
        assert!(result.is_err());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_all_or_nothing_rejects_batch() {
        let err = apply_batch_mode(influx(&["m v=1", "bad"]), BatchMode::AllOrNothing);
        assert!(matches!(err, Err(SinkError::Malformed(_))));
    }

    #[test]
    fn test_skip_malformed_keeps_good_records() {
        let (request, skipped) =
            apply_batch_mode(influx(&["m v=1", "bad", "m v=3"]), BatchMode::SkipMalformed).unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(
            request.unwrap().records().unwrap(),
            &["m v=1".to_string(), "m v=3".to_string()]
        );
    }

    #[test]
    fn test_empty_batch_sends_nothing() {
        let (request, skipped) = apply_batch_mode(influx(&[]), BatchMode::AllOrNothing).unwrap();
        assert!(request.is_none());
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_non_batch_passes_through() {
        let (request, _) =
            apply_batch_mode(SinkRequest::KvDisconnect, BatchMode::AllOrNothing).unwrap();
        assert_eq!(request, Some(SinkRequest::KvDisconnect));
    }
}
