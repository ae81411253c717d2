//! Cast v2 envelope and the JSON payloads carried inside it.
//!
//! The envelope is the `CastMessage` protobuf from the Cast channel
//! protocol. Field numbers and labels must stay exactly as below for
//! devices to accept our frames.

use serde::{Deserialize, Serialize};

// ── Well-known identifiers ───────────────────────────────────────────

/// Platform receiver every session starts by talking to.
pub const DEFAULT_RECEIVER_ID: &str = "receiver-0";

/// Destination wildcard used by receivers for broadcasts.
pub const BROADCAST_ID: &str = "*";

/// Published receiver application used when none is configured.
pub const DEFAULT_APPLICATION_ID: &str = "B1A3B99B";

pub const NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";

/// Application namespace our receiver app listens on.
pub const NAMESPACE_CUSTOM: &str = "urn:x-cast:com.jyuzawa.googolplex-theater.device";

const TYPE_RECEIVER_STATUS: &str = "RECEIVER_STATUS";

// ── Envelope ─────────────────────────────────────────────────────────

/// The protobuf envelope exchanged over the TLS stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", required, tag = "1")]
    pub protocol_version: i32,
    #[prost(string, required, tag = "2")]
    pub source_id: String,
    #[prost(string, required, tag = "3")]
    pub destination_id: String,
    #[prost(string, required, tag = "4")]
    pub namespace: String,
    #[prost(enumeration = "PayloadType", required, tag = "5")]
    pub payload_type: i32,
    #[prost(string, optional, tag = "6")]
    pub payload_utf8: Option<String>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub payload_binary: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Castv210 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    String = 0,
    Binary = 1,
}

impl CastMessage {
    /// Build a STRING-payload message, serializing `payload` to JSON.
    pub fn json<T: Serialize>(
        namespace: &str,
        source_id: &str,
        destination_id: &str,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: source_id.to_owned(),
            destination_id: destination_id.to_owned(),
            namespace: namespace.to_owned(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(serde_json::to_string(payload)?),
            payload_binary: None,
        })
    }

    /// The UTF-8 payload, or `""` when absent.
    pub fn payload(&self) -> &str {
        self.payload_utf8.as_deref().unwrap_or("")
    }

    pub fn is_string_v210(&self) -> bool {
        self.protocol_version == ProtocolVersion::Castv210 as i32
            && self.payload_type == PayloadType::String as i32
    }
}

// ── Outbound payloads ────────────────────────────────────────────────

/// Payloads on the connection, heartbeat, and receiver namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ControlPayload {
    Connect,
    Ping,
    Pong,
    Launch {
        #[serde(rename = "appId")]
        app_id: String,
        #[serde(rename = "requestId")]
        request_id: u32,
    },
}

/// The one application message a session sends: who the device is and
/// what it should display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePayload {
    pub name: String,
    pub settings: serde_json::Value,
    pub request_id: u32,
}

// ── Inbound payloads ─────────────────────────────────────────────────

/// A response on the receiver namespace.
///
/// Unknown fields are ignored; receivers send a lot more than this.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverResponse {
    #[serde(default)]
    pub request_id: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<ReceiverStatus>,
    /// Present only when the request failed.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiverStatus {
    #[serde(default)]
    pub applications: Vec<Application>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub is_idle_screen: bool,
    #[serde(default)]
    pub transport_id: Option<String>,
}

impl ReceiverResponse {
    fn applications(&self) -> &[Application] {
        self.status.as_ref().map_or(&[], |s| s.applications.as_slice())
    }

    /// A `RECEIVER_STATUS` that lists at least one running application.
    pub fn is_application_status(&self) -> bool {
        self.kind.as_deref() == Some(TYPE_RECEIVER_STATUS) && !self.applications().is_empty()
    }

    /// Whether any listed application is the idle/home screen.
    pub fn is_idle_screen(&self) -> bool {
        self.applications().iter().any(|app| app.is_idle_screen)
    }

    /// The session transport id issued for `app_id`, if it is running.
    pub fn transport_id(&self, app_id: &str) -> Option<&str> {
        self.applications()
            .iter()
            .find(|app| app.app_id.as_deref() == Some(app_id))
            .and_then(|app| app.transport_id.as_deref())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use prost::Message;

    #[test]
    fn control_payload_shapes() {
        let connect = serde_json::to_value(ControlPayload::Connect).unwrap();
        assert_eq!(connect, serde_json::json!({"type": "CONNECT"}));

        let launch = serde_json::to_value(ControlPayload::Launch {
            app_id: "B1A3B99B".into(),
            request_id: 0,
        })
        .unwrap();
        assert_eq!(
            launch,
            serde_json::json!({"type": "LAUNCH", "appId": "B1A3B99B", "requestId": 0})
        );
    }

    #[test]
    fn device_payload_shape() {
        let payload = DevicePayload {
            name: "Lobby".into(),
            settings: serde_json::json!({"url": "https://example.com"}),
            request_id: 1,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({
                "name": "Lobby",
                "settings": {"url": "https://example.com"},
                "requestId": 1
            })
        );
    }

    #[test]
    fn envelope_wire_layout() {
        let msg = CastMessage::json(NAMESPACE_HEARTBEAT, "s", "r", &ControlPayload::Ping).unwrap();
        let bytes = msg.encode_to_vec();

        // field 1 varint 0, field 2 "s", field 3 "r"
        assert_eq!(&bytes[..8], &[0x08, 0x00, 0x12, 0x01, b's', 0x1a, 0x01, b'r']);
        assert_eq!(CastMessage::decode(bytes.as_slice()).unwrap(), msg);
    }

    #[test]
    fn receiver_status_with_running_app() {
        let resp: ReceiverResponse = serde_json::from_str(
            r#"{
                "requestId": 0,
                "type": "RECEIVER_STATUS",
                "status": {
                    "applications": [
                        {"appId": "B1A3B99B", "isIdleScreen": false, "transportId": "web-7",
                         "displayName": "Theater"}
                    ],
                    "volume": {"level": 1.0}
                }
            }"#,
        )
        .unwrap();

        assert!(resp.is_application_status());
        assert!(!resp.is_idle_screen());
        assert_eq!(resp.transport_id("B1A3B99B"), Some("web-7"));
        assert_eq!(resp.transport_id("OTHER"), None);
        assert!(resp.reason.is_none());
    }

    #[test]
    fn receiver_status_idle_screen() {
        let resp: ReceiverResponse = serde_json::from_str(
            r#"{"type": "RECEIVER_STATUS", "status": {"applications": [
                {"appId": "E8C28D3C", "isIdleScreen": true, "transportId": "idle"}
            ]}}"#,
        )
        .unwrap();
        assert!(resp.is_application_status());
        assert!(resp.is_idle_screen());
    }

    #[test]
    fn launch_error_and_empty_status() {
        let resp: ReceiverResponse =
            serde_json::from_str(r#"{"type": "LAUNCH_ERROR", "reason": "NOT_FOUND"}"#).unwrap();
        assert_eq!(resp.reason.as_deref(), Some("NOT_FOUND"));
        assert!(!resp.is_application_status());

        let resp: ReceiverResponse =
            serde_json::from_str(r#"{"type": "RECEIVER_STATUS", "status": {}}"#).unwrap();
        assert!(!resp.is_application_status());
        assert!(!resp.is_idle_screen());
    }
}
