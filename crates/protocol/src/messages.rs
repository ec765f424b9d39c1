//! protoo signaling envelope.
//!
//! Every frame on the signaling socket is one of three JSON shapes:
//!
//! ```text
//! {"request":true,"id":12,"method":"join","data":{...}}
//! {"response":true,"id":12,"ok":true,"data":{...}}
//! {"response":true,"id":12,"ok":false,"errorCode":403,"errorReason":"..."}
//! {"notification":true,"method":"newPeer","data":{...}}
//! ```
//!
//! Payloads stay as [`serde_json::Value`]; typed views live in [`crate::methods`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id linking a request to its response.
pub type RequestId = u64;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is missing '{0}'")]
    MissingField(&'static str),
    #[error("message is neither a request, a response nor a notification")]
    UnknownKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Result<Value, ErrorBody>,
}

/// Application-level rejection carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub data: Value,
}

impl Response {
    pub fn ok(id: RequestId, data: Value) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: RequestId, code: i64, reason: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(ErrorBody {
                code,
                reason: reason.into(),
            }),
        }
    }
}

/// Flat wire representation shared by all three kinds.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default, skip_serializing_if = "is_false")]
    request: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    response: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    notification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Message {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::try_from(envelope)
    }

    pub fn to_text(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(&Envelope::from(self))?)
    }
}

impl TryFrom<Envelope> for Message {
    type Error = MessageError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let data = envelope.data.unwrap_or_else(|| Value::Object(Default::default()));
        if envelope.request {
            Ok(Message::Request(Request {
                id: envelope.id.ok_or(MessageError::MissingField("id"))?,
                method: envelope.method.ok_or(MessageError::MissingField("method"))?,
                data,
            }))
        } else if envelope.response {
            let id = envelope.id.ok_or(MessageError::MissingField("id"))?;
            let result = if envelope.ok.unwrap_or(false) {
                Ok(data)
            } else {
                Err(ErrorBody {
                    code: envelope.error_code.unwrap_or(500),
                    reason: envelope.error_reason.unwrap_or_default(),
                })
            };
            Ok(Message::Response(Response { id, result }))
        } else if envelope.notification {
            Ok(Message::Notification(Notification {
                method: envelope.method.ok_or(MessageError::MissingField("method"))?,
                data,
            }))
        } else {
            Err(MessageError::UnknownKind)
        }
    }
}

impl From<&Message> for Envelope {
    fn from(message: &Message) -> Self {
        match message {
            Message::Request(request) => Envelope {
                request: true,
                id: Some(request.id),
                method: Some(request.method.clone()),
                data: Some(request.data.clone()),
                ..Default::default()
            },
            Message::Response(response) => match &response.result {
                Ok(data) => Envelope {
                    response: true,
                    id: Some(response.id),
                    ok: Some(true),
                    data: Some(data.clone()),
                    ..Default::default()
                },
                Err(error) => Envelope {
                    response: true,
                    id: Some(response.id),
                    ok: Some(false),
                    error_code: Some(error.code),
                    error_reason: Some(error.reason.clone()),
                    ..Default::default()
                },
            },
            Message::Notification(notification) => Envelope {
                notification: true,
                method: Some(notification.method.clone()),
                data: Some(notification.data.clone()),
                ..Default::default()
            },
        }
    }
}
