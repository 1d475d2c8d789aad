//! HMAC-SHA256 signing of the private stream `auth` request
//!
//! Uses `ring` for the HMAC. Secrets are never logged or included in error
//! messages.

use ring::hmac;
use serde_json::json;

use network::Frame;

/// Sign a WebSocket auth request
///
/// Bybit signs the string `GET/realtime{expires}` where `expires` is a
/// millisecond timestamp after which the request is refused.
pub fn sign_auth(secret: &str, expires: u64) -> String {
    let payload = format!("GET/realtime{expires}");
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let signature = hmac::sign(&key, payload.as_bytes());
    hex::encode(signature.as_ref())
}

/// Build the `{"op":"auth","args":[key, expires, signature]}` frame
pub fn auth_request(api_key: &str, secret: &str, expires: u64) -> Frame {
    Frame::from(json!({
        "op": "auth",
        "args": [api_key, expires, sign_auth(secret, expires)],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_signature_known_vector() {
        let sig = sign_auth("test-secret", 1_700_000_000_000);
        assert_eq!(
            sig,
            "5e1a6810262f270b783cf759f856aadee413643be3c03d0fb89dd22261e41df0"
        );
    }

    #[test]
    fn test_signature_depends_on_expiry() {
        assert_ne!(sign_auth("s", 1), sign_auth("s", 2));
        assert_eq!(sign_auth("s", 1).len(), 64);
    }

    #[test]
    fn test_auth_request_shape() {
        let frame = auth_request("my-key", "test-secret", 1_700_000_000_000);
        let value: serde_json::Value = serde_json::from_str(frame.as_text().unwrap()).unwrap();
        assert_eq!(value["op"], "auth");
        assert_eq!(value["args"][0], "my-key");
        assert_eq!(value["args"][1], 1_700_000_000_000u64);
        assert_eq!(value["args"][2].as_str().unwrap().len(), 64);
    }
}
