//! obs-websocket v5 wire format.
//!
//! Every frame is a JSON envelope `{"op": <u8>, "d": <payload>}`. The session
//! opens with Hello (op 0) from the server, Identify (op 1) from the client,
//! and Identified (op 2) back; after that requests go out as op 6 and come
//! back as op 7, correlated by `requestId`, while server-originated events
//! arrive as op 5.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// The RPC version this client speaks.
pub const RPC_VERSION: u32 = 1;

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_EVENT: u8 = 5;
pub const OP_REQUEST: u8 = 6;
pub const OP_REQUEST_RESPONSE: u8 = 7;

/// Event-subscription bitmask: General | Scenes | SceneItems.
///
/// Scenes covers `CurrentProgramSceneChanged`; SceneItems covers the
/// item created/removed/reindexed events that invalidate the mirror.
pub const EVENT_SUBSCRIPTIONS: u32 = (1 << 0) | (1 << 2) | (1 << 7);

/// Close codes OBS uses to reject a session.
pub const CLOSE_AUTH_FAILED: u16 = 4009;
pub const CLOSE_UNSUPPORTED_RPC_VERSION: u16 = 4010;
pub const CLOSE_SESSION_INVALIDATED: u16 = 4011;

/// Outer frame shared by every message.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

/// Hello payload (op 0).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Identified payload (op 2).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Request response payload (op 7).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    #[allow(dead_code)]
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Event payload (op 5).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// One scene item as returned by `GetSceneItemList`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemInfo {
    pub scene_item_id: i64,
    #[serde(default)]
    pub scene_item_index: u32,
    pub source_name: String,
    #[serde(default)]
    pub scene_item_enabled: bool,
}

/// Response shape of `GetSceneItemList`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItemList {
    pub scene_items: Vec<SceneItemInfo>,
}

/// Build the Identify frame (op 1).
pub fn identify_frame(authentication: Option<String>) -> Value {
    let mut d = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": EVENT_SUBSCRIPTIONS,
    });
    if let Some(auth) = authentication {
        d["authentication"] = Value::String(auth);
    }
    json!({ "op": OP_IDENTIFY, "d": d })
}

/// Build a request frame (op 6).
pub fn request_frame(request_id: u64, request_type: &str, data: Option<Value>) -> Value {
    let mut d = json!({
        "requestType": request_type,
        "requestId": request_id.to_string(),
    });
    if let Some(data) = data {
        d["requestData"] = data;
    }
    json!({ "op": OP_REQUEST, "d": d })
}

/// Compute the Identify authentication string.
///
/// Per the obs-websocket handshake:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}")));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_response_is_deterministic() {
        let a = auth_response("secret", "salt", "challenge");
        let b = auth_response("secret", "salt", "challenge");
        assert_eq!(a, b);
    }

    #[test]
    fn auth_response_is_base64_of_a_sha256_digest() {
        // 32 digest bytes encode to exactly 44 base64 characters.
        let auth = auth_response("8wcbSnBF3Al9qQgQ", "salt", "challenge");
        assert_eq!(auth.len(), 44);
        assert!(BASE64.decode(&auth).is_ok());
    }

    #[test]
    fn auth_response_depends_on_every_input() {
        let base = auth_response("pw", "salt", "challenge");
        assert_ne!(base, auth_response("pw2", "salt", "challenge"));
        assert_ne!(base, auth_response("pw", "salt2", "challenge"));
        assert_ne!(base, auth_response("pw", "salt", "challenge2"));
    }

    #[test]
    fn parses_hello_with_auth_challenge() {
        let raw = r#"{
            "op": 0,
            "d": {
                "obsWebSocketVersion": "5.3.0",
                "rpcVersion": 1,
                "authentication": { "challenge": "abc", "salt": "def" }
            }
        }"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.op, OP_HELLO);
        let hello: Hello = serde_json::from_value(env.d).unwrap();
        assert_eq!(hello.obs_web_socket_version, "5.3.0");
        assert_eq!(hello.rpc_version, 1);
        let auth = hello.authentication.unwrap();
        assert_eq!(auth.challenge, "abc");
        assert_eq!(auth.salt, "def");
    }

    #[test]
    fn parses_hello_without_auth() {
        let raw = r#"{"obsWebSocketVersion": "5.1.0", "rpcVersion": 1}"#;
        let hello: Hello = serde_json::from_str(raw).unwrap();
        assert!(hello.authentication.is_none());
    }

    #[test]
    fn identify_frame_includes_auth_only_when_present() {
        let plain = identify_frame(None);
        assert_eq!(plain["op"], OP_IDENTIFY);
        assert_eq!(plain["d"]["rpcVersion"], RPC_VERSION);
        assert!(plain["d"].get("authentication").is_none());

        let with_auth = identify_frame(Some("token".into()));
        assert_eq!(with_auth["d"]["authentication"], "token");
    }

    #[test]
    fn request_frame_carries_id_and_data() {
        let frame = request_frame(
            42,
            "SetSceneItemEnabled",
            Some(serde_json::json!({ "sceneName": "FaceScene" })),
        );
        assert_eq!(frame["op"], OP_REQUEST);
        assert_eq!(frame["d"]["requestId"], "42");
        assert_eq!(frame["d"]["requestType"], "SetSceneItemEnabled");
        assert_eq!(frame["d"]["requestData"]["sceneName"], "FaceScene");
    }

    #[test]
    fn parses_request_response() {
        let raw = r#"{
            "requestType": "GetSceneItemList",
            "requestId": "7",
            "requestStatus": { "result": false, "code": 600, "comment": "No source" }
        }"#;
        let resp: RequestResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.request_id, "7");
        assert!(!resp.request_status.result);
        assert_eq!(resp.request_status.code, 600);
        assert_eq!(resp.request_status.comment.as_deref(), Some("No source"));
        assert!(resp.response_data.is_none());
    }

    #[test]
    fn parses_scene_item_list() {
        let raw = r#"{
            "sceneItems": [
                { "sceneItemId": 1, "sceneItemIndex": 0, "sourceName": "Happy", "sceneItemEnabled": true },
                { "sceneItemId": 2, "sceneItemIndex": 1, "sourceName": "Decoration" }
            ]
        }"#;
        let list: SceneItemList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.scene_items.len(), 2);
        assert_eq!(list.scene_items[0].source_name, "Happy");
        assert!(list.scene_items[0].scene_item_enabled);
        assert!(!list.scene_items[1].scene_item_enabled);
    }
}
