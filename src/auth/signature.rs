//! UH-V1 request signatures
//!
//! The signing key is scoped to the request's calendar day:
//!
//! ```text
//! date_key = hex(HMAC-SHA256("UH-V1-" + secret, YYYYMMDD))
//! message  = "UH-V1\n" + YYYYMMDDTHHMMSSZ + "\n" + hex(SHA256(canonical request))
//! sig      = hex(HMAC-SHA256(date_key, message))
//! ```
//!
//! The hex form of the date key is used as key bytes for the second HMAC.

use super::canonical::{sha256_hex, Request};
use super::Credentials;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scheme identifier, used as message prefix and key prefix
pub const ALGORITHM: &str = "UH-V1";

const DATE_FORMAT: &str = "%Y%m%d";
const DATETIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Signature over a single request
pub struct Signature<'a> {
    access_id: &'a str,
    secret: &'a str,
    request: &'a Request,
}

impl<'a> Signature<'a> {
    pub fn new(credentials: &'a Credentials, request: &'a Request) -> Self {
        Self {
            access_id: credentials.access_id(),
            secret: credentials.secret(),
            request,
        }
    }

    /// Lowercased header names, sorted and joined with `;`
    pub fn signed_headers(&self) -> String {
        let mut names: Vec<String> = self
            .request
            .headers()
            .iter()
            .map(|(name, _)| name.trim().to_ascii_lowercase())
            .collect();
        names.sort();
        names.join(";")
    }

    /// Date-scoped signing key, hex encoded
    pub fn signing_key(&self) -> String {
        let base_key = format!("{}-{}", ALGORITHM, self.secret);
        let date = self.request.date().format(DATE_FORMAT).to_string();
        hmac_sha256_hex(base_key.as_bytes(), date.as_bytes())
    }

    /// String to sign for a given canonical request
    pub fn message(&self, canonical: &str) -> String {
        format!(
            "{}\n{}\n{}",
            ALGORITHM,
            self.request.date().format(DATETIME_FORMAT),
            sha256_hex(canonical.as_bytes())
        )
    }

    pub fn signature_for(&self, canonical: &str) -> String {
        hmac_sha256_hex(
            self.signing_key().as_bytes(),
            self.message(canonical).as_bytes(),
        )
    }

    /// `Authorization` header value for the request
    pub fn authorization_header(&self) -> String {
        self.authorization_for(&self.request.canonical())
    }

    pub fn authorization_for(&self, canonical: &str) -> String {
        format!(
            "{} Credential={}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.access_id,
            self.signed_headers(),
            self.signature_for(canonical)
        )
    }
}

/// Canonical JSON: sorted keys, no whitespace, `serde_json` scalars
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Sign package metadata with the user's secret.
///
/// Date-independent so the server can recompute it from the stored body.
pub fn sign_dict(metadata: &Value, credentials: &Credentials) -> String {
    let key = format!("{}-{}", ALGORITHM, credentials.secret());
    hmac_sha256_hex(key.as_bytes(), canonical_json(metadata).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::HeaderValue;
    use chrono::{TimeZone, Utc};
    use reqwest::Method;
    use serde_json::json;

    fn epoch_request() -> Request {
        Request::builder(Method::GET, "http://localhost/")
            .date(Utc.timestamp_opt(0, 0).unwrap())
            .build()
            .unwrap()
            .with_raw_headers(vec![
                ("foo".into(), HeaderValue::from("foo")),
                ("Host".into(), HeaderValue::from("localhost")),
                ("Timestamp".into(), HeaderValue::Float(0.0)),
                ("bar".into(), HeaderValue::from("bar")),
            ])
    }

    #[test]
    fn test_signing_key_golden() {
        let credentials = Credentials::new("123ACCESSID", "SECRET");
        let request = epoch_request();
        let signature = Signature::new(&credentials, &request);
        assert_eq!(
            signature.signing_key(),
            "26216edf3e14606d80fa6cc84e7852c7d6805abf9a5e4f9b45ac4d5b0f81c45d"
        );
    }

    #[test]
    fn test_authorization_golden() {
        let credentials = Credentials::new("123ACCESSID", "SECRET");
        let request = epoch_request();
        let signature = Signature::new(&credentials, &request);
        assert_eq!(
            signature.authorization_for("000"),
            "UH-V1 Credential=123ACCESSID, SignedHeaders=bar;foo;host;timestamp, \
             Signature=7809e0dc98bbd574ef828dbf3fde224b410efa0f7ab8d138d228b528d3479db4"
        );
    }

    #[test]
    fn test_message_layout() {
        let credentials = Credentials::new("id", "secret");
        let request = epoch_request();
        let signature = Signature::new(&credentials, &request);
        let message = signature.message("000");
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines[0], "UH-V1");
        assert_eq!(lines[1], "19700101T000000Z");
        assert_eq!(lines[2], sha256_hex(b"000"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let credentials = Credentials::new("id", "secret");
        let request = epoch_request();
        let first = Signature::new(&credentials, &request).authorization_header();
        let second = Signature::new(&credentials, &request).authorization_header();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sign_attaches_authorization_once() {
        let credentials = Credentials::new("id", "secret");
        let mut request = Request::builder(Method::GET, "http://localhost/")
            .build()
            .unwrap();
        let expected = Signature::new(&credentials, &request).authorization_header();

        request.sign(&credentials);
        request.sign(&Credentials::new("other", "other"));

        let authorizations: Vec<_> = request
            .headers()
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .collect();
        assert_eq!(authorizations.len(), 1);
        assert_eq!(authorizations[0].1.to_string(), expected);
    }

    #[test]
    fn test_signed_headers_exclude_authorization() {
        let credentials = Credentials::new("id", "secret");
        let mut request = Request::builder(Method::GET, "http://localhost/")
            .build()
            .unwrap();
        request.sign(&credentials);
        let authorization = request.header("authorization").unwrap().to_string();
        assert!(authorization.contains(
            "SignedHeaders=accept;api-content-type;content-sha256;host;timestamp;user-agent,"
        ));
    }

    #[test]
    fn test_canonical_json_sorts_keys_without_whitespace() {
        let value = json!({"b": [1, {"z": true, "a": null}], "a": "x\"y", "c": 1.5});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"x\"y","b":[1,{"a":null,"z":true}],"c":1.5}"#
        );
    }

    #[test]
    fn test_sign_dict_ignores_key_order() {
        let credentials = Credentials::new("id", "secret");
        let first = json!({"product": "p", "version": "1.0"});
        let second: Value = serde_json::from_str(r#"{"version":"1.0","product":"p"}"#).unwrap();
        assert_eq!(
            sign_dict(&first, &credentials),
            sign_dict(&second, &credentials)
        );
        assert_eq!(sign_dict(&first, &credentials).len(), 64);
    }
}
