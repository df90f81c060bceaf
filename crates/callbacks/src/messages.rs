//! Callback event payloads sent by remote jobs.
//!
//! Remote jobs POST JSON with the shape
//! `{"status": "<STATUS>", "rowId"?, "responseValues"?, "logUrl"?, "capabilities"?}`.
//! This module deserializes them into a typed [`CallbackPayload`].

use runcheck_core::{Capabilities, RowResult};
use serde::{Deserialize, Serialize};

/// Lifecycle status carried by every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    /// Row data for an attempt that is still running.
    RunningPartial,
    /// Per-row completion when row data is present, otherwise the end of
    /// the whole attempt.
    Completed,
    /// The remote job hit an error. Not terminal: the job may still finish
    /// or be restarted by the retry monitor.
    Error,
}

/// A single parsed callback event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub status: CallbackStatus,
    /// Body-level correlation key, used when the header is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl CallbackPayload {
    pub fn new(status: CallbackStatus) -> Self {
        Self {
            status,
            correlation_key: None,
            row_id: None,
            response_values: None,
            log_url: None,
            capabilities: None,
        }
    }

    /// Attach row data to the event.
    pub fn with_row(mut self, row_id: u32, response_values: Vec<String>) -> Self {
        self.row_id = Some(row_id);
        self.response_values = Some(response_values);
        self
    }

    /// The row carried by this event, if any.
    ///
    /// `rowId` and `responseValues` travel together; an event with only
    /// one of them is malformed.
    pub fn row_update(&self) -> Result<Option<RowResult>, MessageError> {
        match (self.row_id, &self.response_values) {
            (Some(row_id), Some(values)) => Ok(Some(RowResult {
                row_id,
                response_values: values.clone(),
            })),
            (None, None) => Ok(None),
            (row_id, _) => Err(MessageError::IncompleteRow { row_id }),
        }
    }
}

/// Parse a raw request body into a [`CallbackPayload`].
pub fn parse_payload(body: &[u8]) -> Result<CallbackPayload, MessageError> {
    let payload: CallbackPayload = serde_json::from_slice(body)?;
    payload.row_update()?;
    Ok(payload)
}

/// Reasons a callback body is rejected.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Invalid callback JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Row update must carry both rowId and responseValues (rowId: {row_id:?})")]
    IncompleteRow { row_id: Option<u32> },
}
