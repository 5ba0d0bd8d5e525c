//! Presigned WebSocket URL for the IoT endpoint
//!
//! MQTT over WebSocket authenticates with a SigV4 signature in the query
//! string of the upgrade request. The session token of temporary
//! credentials is appended after signing, the IoT gateway does not include
//! it in the canonical request.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::credentials::AwsCredentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "iotdevicegateway";
const MQTT_PATH: &str = "/mqtt";
const URL_EXPIRES_SECS: u32 = 86400;

/// URL of the MQTT WebSocket endpoint, signed if credentials are available
pub fn websocket_url(
    host: &str,
    region: &str,
    credentials: Option<&AwsCredentials>,
    now: DateTime<Utc>,
) -> String {
    match credentials {
        Some(credentials) => presign(host, region, credentials, now),
        None => format!("wss://{}{}", host, MQTT_PATH),
    }
}

fn presign(host: &str, region: &str, credentials: &AwsCredentials, now: DateTime<Utc>) -> String {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date_stamp, region, SERVICE);

    let query = format!(
        "X-Amz-Algorithm={}&X-Amz-Credential={}&X-Amz-Date={}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
        ALGORITHM,
        uri_encode(&format!("{}/{}", credentials.access_key_id, scope)),
        amz_date,
        URL_EXPIRES_SECS,
    );

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
        MQTT_PATH,
        query,
        host,
        hex::encode(Sha256::digest(b""))
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&credentials.secret_key, &date_stamp, region, SERVICE);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let mut url = format!(
        "wss://{}{}?{}&X-Amz-Signature={}",
        host, MQTT_PATH, query, signature
    );
    if !credentials.session_token.is_empty() {
        url.push_str("&X-Amz-Security-Token=");
        url.push_str(&uri_encode(&credentials.session_token));
    }
    url
}

/// Derive the SigV4 signing key for one day, region and service
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC takes any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode everything except the unreserved characters
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials(token: &str) -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: token.to_string(),
            expiration: None,
        }
    }

    #[test]
    fn test_signing_key_matches_published_example() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("AKID/20200101/us-east-1"), "AKID%2F20200101%2Fus-east-1");
        assert_eq!(uri_encode("a+b=c"), "a%2Bb%3Dc");
        assert_eq!(uri_encode("safe-_.~"), "safe-_.~");
    }

    #[test]
    fn test_unsigned_url() {
        let url = websocket_url("example.iot.us-east-1.amazonaws.com", "us-east-1", None, Utc::now());
        assert_eq!(url, "wss://example.iot.us-east-1.amazonaws.com/mqtt");
    }

    #[test]
    fn test_presigned_url_layout() {
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let creds = credentials("tok/en+");
        let url = websocket_url("example.iot.us-east-1.amazonaws.com", "us-east-1", Some(&creds), now);

        assert!(url.starts_with(
            "wss://example.iot.us-east-1.amazonaws.com/mqtt?X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=AKIDEXAMPLE%2F20200102%2Fus-east-1%2Fiotdevicegateway%2Faws4_request&X-Amz-Date=20200102T030405Z&"
        ));
        assert!(url.ends_with("&X-Amz-Security-Token=tok%2Fen%2B"));

        let signature = url
            .split('&')
            .find_map(|p| p.strip_prefix("X-Amz-Signature="))
            .unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

        // Same input, same signature
        assert_eq!(url, websocket_url("example.iot.us-east-1.amazonaws.com", "us-east-1", Some(&creds), now));
    }

    #[test]
    fn test_no_token_no_token_parameter() {
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let url = websocket_url("h", "us-east-1", Some(&credentials("")), now);
        assert!(!url.contains("X-Amz-Security-Token"));
    }
}
