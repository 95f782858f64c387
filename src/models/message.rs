use serde::Deserialize;
use uuid::Uuid;

use crate::error::AlertError;
use crate::models::alert::{AlertId, AlertKind, NewAlert};

/// Alert submission as published by field clients on the intake topic.
///
/// Protobuf on the wire; older mobile builds still send the JSON form with
/// their own field names, which the serde aliases below accept.
#[derive(Clone, PartialEq, prost::Message, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSubmission {
    #[prost(string, tag = "1")]
    #[serde(default, alias = "uuid")]
    pub submission_id: String,
    #[prost(string, tag = "2")]
    #[serde(default, alias = "coachNumber")]
    pub coach: String,
    #[prost(string, tag = "3")]
    #[serde(default, alias = "seatNumber")]
    pub seat: String,
    #[prost(string, tag = "4")]
    #[serde(default, alias = "type")]
    pub kind: String,
    #[prost(string, tag = "5")]
    #[serde(default, alias = "incidentType")]
    pub category: String,
}

impl AlertSubmission {
    /// JSON when the payload looks like an object, protobuf otherwise.
    pub fn decode_payload(payload: &[u8]) -> anyhow::Result<Self> {
        let first = payload.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'{') {
            Ok(serde_json::from_slice(payload)?)
        } else {
            Ok(<Self as prost::Message>::decode(payload)?)
        }
    }

    pub fn into_new_alert(self) -> Result<NewAlert, AlertError> {
        let submission_id = Uuid::parse_str(self.submission_id.trim()).map_err(|_| {
            AlertError::Validation(format!("bad submission id '{}'", self.submission_id))
        })?;
        let kind = if self.kind.trim().is_empty() {
            AlertKind::EmergencySos
        } else {
            self.kind.parse()?
        };
        NewAlert::new(submission_id, &self.coach, &self.seat, kind, &self.category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Assign,
    Investigate,
    Resolve,
}

impl std::str::FromStr for OperatorAction {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assign" => Ok(OperatorAction::Assign),
            "investigate" | "in_progress" => Ok(OperatorAction::Investigate),
            "resolve" => Ok(OperatorAction::Resolve),
            other => Err(AlertError::Validation(format!("unknown action '{other}'"))),
        }
    }
}

/// Operator action published by a console on the command topic.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OperatorCommand {
    #[prost(string, tag = "1")]
    pub alert_id: String,
    #[prost(string, tag = "2")]
    pub action: String,
    #[prost(string, tag = "3")]
    pub operator: String,
}

impl OperatorCommand {
    pub fn parse(&self) -> Result<(AlertId, OperatorAction), AlertError> {
        let id = Uuid::parse_str(self.alert_id.trim())
            .map_err(|_| AlertError::Validation(format!("bad alert id '{}'", self.alert_id)))?;
        Ok((id, self.action.parse()?))
    }
}
