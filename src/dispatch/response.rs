//! Captured HTTP response, the input of the response template.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::{base64_bytes, BodyType, Req};

/// Result of executing one [`Req`].
///
/// A non-empty `err` means the request failed; the other response fields are
/// then left at their defaults or must not be trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Res {
    #[serde(default)]
    pub req: Req,
    /// Status line, e.g. `200 OK`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub body_json: Value,
    #[serde(default, with = "base64_bytes")]
    pub body_bytes: Vec<u8>,
    #[serde(default)]
    pub err: String,
}

impl Res {
    /// A response for a request that never produced one.
    pub fn failed(req: Req, err: impl Into<String>) -> Self {
        Self {
            req,
            err: err.into(),
            ..Default::default()
        }
    }

    pub fn is_err(&self) -> bool {
        !self.err.is_empty()
    }

    /// Reads `response` to the end and interprets its body.
    ///
    /// A `forced` body type other than [`BodyType::None`] overrides the type
    /// inferred from `Content-Type`.
    pub async fn from_response(req: Req, response: Response, forced: BodyType) -> Self {
        let status = response.status();
        let headers = canonical_headers(response.headers());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut res = Res {
            req,
            status: match status.canonical_reason() {
                Some(reason) => format!("{} {}", status.as_u16(), reason),
                None => status.as_u16().to_string(),
            },
            status_code: status.as_u16(),
            headers,
            ..Default::default()
        };

        match response.bytes().await {
            Ok(body) => res.set_body(&body, content_type.as_deref(), forced),
            Err(e) => res.err = format!("read body: {}", e),
        }
        res
    }

    /// Stores `body` in the field selected by the body type.
    pub fn set_body(&mut self, body: &[u8], content_type: Option<&str>, forced: BodyType) {
        self.body_type = if forced.is_none() {
            infer_body_type(content_type)
        } else {
            forced
        };

        match self.body_type {
            BodyType::Json => match serde_json::from_slice(body) {
                Ok(value) => self.body_json = value,
                Err(e) => self.err = format!("decode JSON body: {}", e),
            },
            BodyType::Text => self.body_text = String::from_utf8_lossy(body).into_owned(),
            BodyType::Byte | BodyType::None => {
                self.body_type = BodyType::Byte;
                self.body_bytes = body.to_vec();
            }
        }
    }
}

/// Maps a `Content-Type` value to a body type.
pub fn infer_body_type(content_type: Option<&str>) -> BodyType {
    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mt| mt.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if media_type == "application/json" {
        BodyType::Json
    } else if media_type.starts_with("text/") {
        BodyType::Text
    } else {
        BodyType::Byte
    }
}

/// Canonical MIME header form: `content-type` becomes `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn canonical_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        out.insert(
            canonical_header_name(name.as_str()),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    out
}
