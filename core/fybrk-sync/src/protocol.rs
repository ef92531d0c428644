//! The wire protocol spoken between paired devices.
//!
//! Every message is one JSON object per frame:
//!
//! ```json
//! {"version": 1, "type": "file_list", "device_id": "…",
//!  "timestamp": "2024-05-01T12:00:00Z", "payload": {"type": "file_list", …}}
//! ```
//!
//! The payload is a tagged union discriminated by its own `type` field and
//! is parsed exactly once, at the connection boundary. A message whose
//! version is newer than ours is rejected before the payload is looked at;
//! same or lower versions are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fybrk_types::{Chunk, ContentHash, DeviceId, FileMetadata};

use crate::error::{SyncError, SyncResult};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Envelope for every message exchanged over a peer transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub version: u32,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub payload: SyncPayload,
}

/// The payload union, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncPayload {
    #[serde(rename = "file_list")]
    FileList(FileListPayload),
    #[serde(rename = "file_request")]
    FileRequest(FileRequestPayload),
    #[serde(rename = "file_response")]
    FileResponse(FileResponsePayload),
    #[serde(rename = "file_delete")]
    FileDelete(FileDeletePayload),
}

/// Periodic announcement of a device's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListPayload {
    pub files: Vec<FileMetadata>,
}

/// Request for the chunks of one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequestPayload {
    pub request: FileRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRequest {
    pub path: String,
    pub chunks: Vec<ContentHash>,
}

/// Sealed chunks answering a `file_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResponsePayload {
    pub response: FileResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResponse {
    pub path: String,
    pub chunks: Vec<Chunk>,
}

/// Notification that a path was deleted at the given version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeletePayload {
    pub delete: FileDelete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDelete {
    pub path: String,
    pub version: i64,
}

impl SyncPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncPayload::FileList(_) => "file_list",
            SyncPayload::FileRequest(_) => "file_request",
            SyncPayload::FileResponse(_) => "file_response",
            SyncPayload::FileDelete(_) => "file_delete",
        }
    }
}

impl SyncMessage {
    /// Build a message stamped with the current time and protocol version.
    pub fn new(device_id: DeviceId, payload: SyncPayload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: payload.type_name().to_string(),
            device_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Encode to one JSON frame.
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SyncError::Malformed(e.to_string()))
    }

    /// Decode a frame, enforcing the version gate before the payload is
    /// interpreted.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Malformed(e.to_string()))?;
        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SyncError::Malformed("missing version field".to_string()))?
            as u32;
        if version > PROTOCOL_VERSION {
            return Err(SyncError::ProtocolVersion {
                remote: version,
                local: PROTOCOL_VERSION,
            });
        }
        serde_json::from_value(value).map_err(|e| SyncError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device() -> DeviceId {
        DeviceId::new("test-device")
    }

    #[test]
    fn envelope_wire_shape() {
        let meta = FileMetadata {
            path: "a.txt".to_string(),
            hash: ContentHash::compute(b"a"),
            size: 1,
            mod_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            chunks: vec![ContentHash::compute(b"a")],
            version: 1,
        };
        let msg = SyncMessage::new(
            device(),
            SyncPayload::FileList(FileListPayload { files: vec![meta] }),
        );

        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["type"], "file_list");
        assert_eq!(json["device_id"], "test-device");
        assert_eq!(json["payload"]["type"], "file_list");
        assert_eq!(json["payload"]["files"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn request_and_delete_payload_shapes() {
        let msg = SyncMessage::new(
            device(),
            SyncPayload::FileRequest(FileRequestPayload {
                request: FileRequest {
                    path: "x.bin".to_string(),
                    chunks: vec![ContentHash::compute(b"c0")],
                },
            }),
        );
        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["payload"]["request"]["path"], "x.bin");

        let msg = SyncMessage::new(
            device(),
            SyncPayload::FileDelete(FileDeletePayload {
                delete: FileDelete {
                    path: "x.bin".to_string(),
                    version: 4,
                },
            }),
        );
        let json: serde_json::Value =
            serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["payload"]["delete"]["version"], 4);
    }

    #[test]
    fn roundtrip() {
        let msg = SyncMessage::new(
            device(),
            SyncPayload::FileResponse(FileResponsePayload {
                response: FileResponse {
                    path: "img.png".to_string(),
                    chunks: vec![Chunk::new(b"pixels".to_vec())],
                },
            }),
        );
        let decoded = SyncMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.msg_type, "file_response");
        match decoded.payload {
            SyncPayload::FileResponse(p) => {
                assert_eq!(p.response.path, "img.png");
                assert_eq!(p.response.chunks[0].data, b"pixels");
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn newer_version_rejected() {
        let mut msg = SyncMessage::new(
            device(),
            SyncPayload::FileList(FileListPayload { files: Vec::new() }),
        );
        msg.version = PROTOCOL_VERSION + 1;
        let bytes = serde_json::to_vec(&msg).unwrap();

        let result = SyncMessage::from_bytes(&bytes);
        assert!(matches!(
            result,
            Err(SyncError::ProtocolVersion { remote, local })
                if remote == PROTOCOL_VERSION + 1 && local == PROTOCOL_VERSION
        ));
    }

    #[test]
    fn same_or_lower_version_accepted() {
        let msg = SyncMessage::new(
            device(),
            SyncPayload::FileList(FileListPayload { files: Vec::new() }),
        );
        assert!(SyncMessage::from_bytes(&msg.to_bytes().unwrap()).is_ok());
    }

    #[test]
    fn garbage_and_unknown_types_are_malformed() {
        assert!(matches!(
            SyncMessage::from_bytes(b"not json at all"),
            Err(SyncError::Malformed(_))
        ));
        assert!(matches!(
            SyncMessage::from_bytes(b"{\"version\":1,\"type\":\"mystery\",\"device_id\":\"d\",\"timestamp\":\"2024-01-01T00:00:00Z\",\"payload\":{\"type\":\"mystery\"}}"),
            Err(SyncError::Malformed(_))
        ));
        assert!(matches!(
            SyncMessage::from_bytes(b"{}"),
            Err(SyncError::Malformed(_))
        ));
    }
}
