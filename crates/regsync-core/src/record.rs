use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::PENDING_REVIEW_STATUS;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("chat id {0:?} is not an integer")]
    InvalidChatId(String),
    #[error("user entry must be a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("invalid user field: {0}")]
    Field(#[from] serde_json::Error),
    #[error("state must be a string, number or boolean, found {0}")]
    InvalidState(&'static str),
}

/// Telegram chat identifier. Group chats are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl FromStr for ChatId {
    type Err = RecordError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .trim()
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| RecordError::InvalidChatId(input.to_string()))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One applicant's profile as the bot last wrote it.
///
/// Every field is optional. A later sync overwrites the stored row with exactly
/// these values, so a missing field clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserRecord {
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub company: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub expertise: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub motivation: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub verification_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub verification_value: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub verification_ref_name: Option<String>,
    /// Outer `None` when the key is absent, `Some(None)` for an explicit null.
    #[serde(default, deserialize_with = "deserialize_present_scalar")]
    pub status: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub rejection_reason: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub reviewed_by_user_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub reviewed_by_username: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub review_decision: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub updated_at: Option<String>,
}

impl UserRecord {
    pub fn from_value(value: &Value) -> Result<Self, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject(json_kind(value)));
        }
        Ok(UserRecord::deserialize(value)?)
    }

    /// Absent status means a new application; an explicit null is kept.
    pub fn status_or_pending(&self) -> Option<&str> {
        match &self.status {
            None => Some(PENDING_REVIEW_STATUS),
            Some(status) => status.as_deref(),
        }
    }
}

/// Conversation stage from the states snapshot. `None` clears the column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateValue(pub Option<String>);

impl StateValue {
    pub fn from_value(value: &Value) -> Result<Self, RecordError> {
        scalar_text(value)
            .map(StateValue)
            .ok_or(RecordError::InvalidState(json_kind(value)))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    PendingReview,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::PendingReview => PENDING_REVIEW_STATUS,
            ReviewStatus::Approved => "تایید شده",
            ReviewStatus::Rejected => "رد شده",
        }
    }
}

impl Default for ReviewStatus {
    fn default() -> Self {
        Self::PendingReview
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed == PENDING_REVIEW_STATUS {
            return Ok(ReviewStatus::PendingReview);
        }
        if trimmed == ReviewStatus::Approved.as_str() {
            return Ok(ReviewStatus::Approved);
        }
        if trimmed == ReviewStatus::Rejected.as_str() {
            return Ok(ReviewStatus::Rejected);
        }
        match trimmed.to_lowercase().as_str() {
            "pending" | "pending-review" | "pending_review" => Ok(ReviewStatus::PendingReview),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(format!("Unknown review status: {other}")),
        }
    }
}

/// Text form of a JSON scalar as SQLite would store it in a TEXT column.
/// `Some(None)` for null, `None` for objects and arrays.
fn scalar_text(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        Value::Number(n) => Some(Some(n.to_string())),
        Value::Bool(b) => Some(Some(if *b { "1" } else { "0" }.to_string())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    scalar_text(&val).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "expected string, number or boolean, found {}",
            json_kind(&val)
        ))
    })
}

fn deserialize_present_scalar<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_scalar(deserializer).map(Some)
}
