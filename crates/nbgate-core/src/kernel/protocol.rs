//! Jupyter messaging protocol (v5) codec.
//!
//! A message travels as a multipart ZeroMQ frame list:
//!
//! ```text
//! [identities...] "<IDS|MSG>" signature header parent_header metadata content [buffers...]
//! ```
//!
//! The signature is the hex HMAC-SHA256 of the four JSON frames, keyed with
//! the connection file's `key`. An empty key disables signing.

use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use uuid::Uuid;

use nbgate_format::{MultilineText, Output};

use crate::error::{Error, Result};

/// Frame separating routing identities from the message body.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Protocol version sent in outgoing headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

/// A decoded Jupyter message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Routing prefix (iopub topic for SUB sockets).
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl Message {
    /// Message type from the header.
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Whether this message was caused by the request with `msg_id`.
    pub fn is_reply_to(&self, msg_id: &str) -> bool {
        self.parent_header
            .as_ref()
            .is_some_and(|parent| parent.msg_id == msg_id)
    }

    /// Encode into signed frames.
    pub fn to_frames(&self, signer: &Signer) -> Result<Vec<Bytes>> {
        let header = serde_json::to_vec(&self.header)?;
        let parent_header = match &self.parent_header {
            Some(parent) => serde_json::to_vec(parent)?,
            None => b"{}".to_vec(),
        };
        let metadata = serde_json::to_vec(&self.metadata)?;
        let content = serde_json::to_vec(&self.content)?;
        let signature = signer.sign(&[
            header.as_slice(),
            parent_header.as_slice(),
            metadata.as_slice(),
            content.as_slice(),
        ]);

        let mut frames = Vec::with_capacity(self.identities.len() + 6 + self.buffers.len());
        frames.extend(self.identities.iter().cloned());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(Bytes::from(header));
        frames.push(Bytes::from(parent_header));
        frames.push(Bytes::from(metadata));
        frames.push(Bytes::from(content));
        frames.extend(self.buffers.iter().cloned());
        Ok(frames)
    }

    /// Decode and verify frames.
    pub fn from_frames(frames: Vec<Bytes>, signer: &Signer) -> Result<Self> {
        let delimiter = frames
            .iter()
            .position(|frame| frame.as_ref() == DELIMITER)
            .ok_or_else(|| Error::Protocol("message has no <IDS|MSG> delimiter".to_string()))?;

        if frames.len() < delimiter + 6 {
            return Err(Error::Protocol(format!(
                "message too short: {} frames after delimiter, expected at least 5",
                frames.len() - delimiter - 1
            )));
        }

        let mut frames = frames;
        let buffers = frames.split_off(delimiter + 6);
        let body = frames.split_off(delimiter);
        let identities = frames;

        let signature = std::str::from_utf8(&body[1])
            .map_err(|_| Error::Protocol("signature is not UTF-8".to_string()))?;
        signer.verify(signature, &[&body[2][..], &body[3][..], &body[4][..], &body[5][..]])?;

        let header: Header = serde_json::from_slice(&body[2])?;
        let parent_value: Value = serde_json::from_slice(&body[3])?;
        let parent_header = match parent_value {
            Value::Object(ref map) if map.is_empty() => None,
            Value::Null => None,
            other => Some(serde_json::from_value(other)?),
        };

        Ok(Self {
            identities,
            header,
            parent_header,
            metadata: serde_json::from_slice(&body[4])?,
            content: serde_json::from_slice(&body[5])?,
            buffers,
        })
    }
}

/// HMAC-SHA256 message signer.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    /// Create a signer; an empty key disables signing.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self, parts: &[&[u8]]) -> Option<Hmac<Sha256>> {
        if self.key.is_empty() {
            return None;
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).ok()?;
        for part in parts {
            mac.update(part);
        }
        Some(mac)
    }

    /// Hex signature over the given frames (empty when unsigned).
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        self.mac(parts)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Check a received signature in constant time.
    pub fn verify(&self, signature: &str, parts: &[&[u8]]) -> Result<()> {
        let Some(mac) = self.mac(parts) else {
            return Ok(());
        };
        let expected = hex::decode(signature)
            .map_err(|_| Error::Protocol("signature is not valid hex".to_string()))?;
        mac.verify_slice(&expected)
            .map_err(|_| Error::Protocol("message signature mismatch".to_string()))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("signed", &!self.key.is_empty())
            .finish()
    }
}

/// Client session: stamps headers and signs outgoing messages.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    username: String,
    signer: Signer,
}

impl Session {
    /// Create a session signing with `key`.
    pub fn new(key: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: "nbgate".to_string(),
            signer: Signer::new(key.as_bytes().to_vec()),
        }
    }

    /// The signer for this session.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Build a new request message.
    pub fn message(&self, msg_type: &str, content: Value) -> Message {
        Message {
            identities: Vec::new(),
            header: Header {
                msg_id: Uuid::new_v4().to_string(),
                session: self.id.clone(),
                username: self.username.clone(),
                date: Utc::now().to_rfc3339(),
                msg_type: msg_type.to_string(),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: None,
            metadata: Value::Object(Map::new()),
            content,
            buffers: Vec::new(),
        }
    }
}

/// Content of an `execute_request`.
///
/// `stop_on_error` makes the kernel abort queued requests after a failure.
pub fn execute_request(code: &str) -> Value {
    json!({
        "code": code,
        "silent": false,
        "store_history": true,
        "user_expressions": {},
        "allow_stdin": false,
        "stop_on_error": true,
    })
}

/// Outcome reported by an `execute_reply`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyStatus {
    Ok,
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    /// The kernel skipped the request (an earlier request failed).
    Aborted,
}

/// A parsed `execute_reply`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    pub execution_count: Option<u32>,
}

#[derive(Deserialize)]
struct ExecuteReplyContent {
    status: String,
    #[serde(default)]
    execution_count: Option<u32>,
    #[serde(default)]
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

impl ExecuteReply {
    /// Parse reply content.
    pub fn from_content(content: &Value) -> Result<Self> {
        let raw: ExecuteReplyContent = serde_json::from_value(content.clone())?;
        let status = match raw.status.as_str() {
            "ok" => ReplyStatus::Ok,
            "error" => ReplyStatus::Error {
                ename: raw.ename,
                evalue: raw.evalue,
                traceback: raw.traceback,
            },
            "aborted" => ReplyStatus::Aborted,
            other => {
                return Err(Error::Protocol(format!(
                    "unknown execute_reply status '{}'",
                    other
                )));
            }
        };
        Ok(Self {
            status,
            execution_count: raw.execution_count,
        })
    }
}

/// A message published on the iopub channel, reduced to what a run needs.
#[derive(Debug, Clone, PartialEq)]
pub enum IopubEvent {
    /// Kernel execution state (`busy`, `idle`, `starting`).
    Status(String),
    /// An output to record in the cell.
    Output(Output),
    /// Clear the cell's outputs.
    ClearOutput,
    /// Anything else (execute_input, comm messages, ...).
    Other,
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: String,
}

#[derive(Deserialize)]
struct StreamContent {
    name: String,
    text: MultilineText,
}

#[derive(Deserialize)]
struct DataContent {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    execution_count: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorContent {
    #[serde(default)]
    ename: String,
    #[serde(default)]
    evalue: String,
    #[serde(default)]
    traceback: Vec<String>,
}

impl IopubEvent {
    /// Classify an iopub message.
    pub fn from_message(message: &Message) -> Result<Self> {
        let content = message.content.clone();
        Ok(match message.msg_type() {
            "status" => {
                let status: StatusContent = serde_json::from_value(content)?;
                IopubEvent::Status(status.execution_state)
            }
            "stream" => {
                let stream: StreamContent = serde_json::from_value(content)?;
                IopubEvent::Output(Output::stream(stream.name, stream.text))
            }
            "display_data" => {
                let display: DataContent = serde_json::from_value(content)?;
                IopubEvent::Output(Output::DisplayData {
                    data: display.data,
                    metadata: display.metadata,
                    extra: Map::new(),
                })
            }
            "execute_result" => {
                let result: DataContent = serde_json::from_value(content)?;
                IopubEvent::Output(Output::ExecuteResult {
                    execution_count: result.execution_count,
                    data: result.data,
                    metadata: result.metadata,
                    extra: Map::new(),
                })
            }
            "error" => {
                let error: ErrorContent = serde_json::from_value(content)?;
                IopubEvent::Output(Output::error(error.ename, error.evalue, error.traceback))
            }
            "clear_output" => IopubEvent::ClearOutput,
            _ => IopubEvent::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_from(session: &Session, request: &Message, msg_type: &str, content: Value) -> Message {
        let mut reply = session.message(msg_type, content);
        reply.parent_header = Some(request.header.clone());
        reply
    }

    #[test]
    fn test_signed_message_roundtrip() {
        let session = Session::new("secret-key");
        let request = session.message("execute_request", execute_request("print('ok')"));

        let frames = request.to_frames(session.signer()).unwrap();
        assert_eq!(frames[0].as_ref(), DELIMITER);
        assert_eq!(frames[1].len(), 64); // hex sha256

        let decoded = Message::from_frames(frames, session.signer()).unwrap();
        assert_eq!(decoded.header, request.header);
        assert!(decoded.parent_header.is_none());
        assert_eq!(decoded.content["code"], "print('ok')");
        assert_eq!(decoded.content["stop_on_error"], true);
    }

    #[test]
    fn test_tampered_message_is_rejected() {
        let session = Session::new("secret-key");
        let request = session.message("execute_request", execute_request("1 + 1"));
        let mut frames = request.to_frames(session.signer()).unwrap();
        frames[5] = Bytes::from(serde_json::to_vec(&execute_request("rm -rf /")).unwrap());

        let err = Message::from_frames(frames, session.signer()).unwrap_err();
        assert!(err.to_string().contains("signature mismatch"));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sender = Session::new("key-a");
        let receiver = Signer::new(b"key-b".to_vec());
        let frames = sender
            .message("kernel_info_request", json!({}))
            .to_frames(sender.signer())
            .unwrap();
        assert!(Message::from_frames(frames, &receiver).is_err());
    }

    #[test]
    fn test_empty_key_disables_signing() {
        let session = Session::new("");
        let frames = session
            .message("kernel_info_request", json!({}))
            .to_frames(session.signer())
            .unwrap();
        assert!(frames[1].is_empty());
        assert!(Message::from_frames(frames, session.signer()).is_ok());
    }

    #[test]
    fn test_identities_and_buffers_are_split_off() {
        let session = Session::new("k");
        let mut message = session.message("stream", json!({"name": "stdout", "text": "hi"}));
        message.identities = vec![Bytes::from_static(b"stream.stdout")];
        message.buffers = vec![Bytes::from_static(b"\x00\x01")];

        let decoded = Message::from_frames(message.to_frames(session.signer()).unwrap(), session.signer())
            .unwrap();
        assert_eq!(decoded.identities, vec![Bytes::from_static(b"stream.stdout")]);
        assert_eq!(decoded.buffers.len(), 1);
    }

    #[test]
    fn test_missing_delimiter() {
        let err = Message::from_frames(vec![Bytes::from_static(b"{}")], &Signer::new(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parent_header_links_reply() {
        let session = Session::new("k");
        let request = session.message("execute_request", execute_request("x = 1"));
        let reply = reply_from(&session, &request, "execute_reply", json!({"status": "ok", "execution_count": 1}));

        let decoded =
            Message::from_frames(reply.to_frames(session.signer()).unwrap(), session.signer()).unwrap();
        assert!(decoded.is_reply_to(&request.header.msg_id));
        assert!(!decoded.is_reply_to("someone-else"));

        let parsed = ExecuteReply::from_content(&decoded.content).unwrap();
        assert_eq!(parsed.status, ReplyStatus::Ok);
        assert_eq!(parsed.execution_count, Some(1));
    }

    #[test]
    fn test_error_reply() {
        let content = json!({
            "status": "error",
            "execution_count": 4,
            "ename": "AssertionError",
            "evalue": "boom",
            "traceback": ["Traceback (most recent call last)", "AssertionError: boom"]
        });
        let reply = ExecuteReply::from_content(&content).unwrap();
        match reply.status {
            ReplyStatus::Error { ename, evalue, traceback } => {
                assert_eq!(ename, "AssertionError");
                assert_eq!(evalue, "boom");
                assert_eq!(traceback.len(), 2);
            }
            other => panic!("Expected error status, got {:?}", other),
        }
    }

    #[test]
    fn test_iopub_classification() {
        let session = Session::new("");
        let event = |msg_type: &str, content: Value| {
            IopubEvent::from_message(&session.message(msg_type, content)).unwrap()
        };

        assert_eq!(
            event("status", json!({"execution_state": "idle"})),
            IopubEvent::Status("idle".to_string())
        );
        assert_eq!(
            event("stream", json!({"name": "stdout", "text": "ok\n"})),
            IopubEvent::Output(Output::stream("stdout", "ok\n"))
        );
        assert_eq!(event("clear_output", json!({"wait": false})), IopubEvent::ClearOutput);
        assert_eq!(event("execute_input", json!({"code": "1", "execution_count": 1})), IopubEvent::Other);

        match event(
            "execute_result",
            json!({"execution_count": 2, "data": {"text/plain": "42"}, "metadata": {}}),
        ) {
            IopubEvent::Output(output) => assert_eq!(output.plain_text(), "42"),
            other => panic!("Expected output, got {:?}", other),
        }

        match event("error", json!({"ename": "NameError", "evalue": "x", "traceback": []})) {
            IopubEvent::Output(output) => assert!(output.is_error()),
            other => panic!("Expected error output, got {:?}", other),
        }
    }
}
