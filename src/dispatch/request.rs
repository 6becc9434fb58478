//! Outbound request description rendered by the request template.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pool::DispatchError;

/// Selects which body field of a [`Req`] or [`super::Res`] is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyType {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "TEXT", alias = "text")]
    Text,
    #[serde(rename = "JSON", alias = "json")]
    Json,
    #[serde(rename = "BYTE", alias = "byte", alias = "BYTES", alias = "bytes")]
    Byte,
}

impl BodyType {
    pub fn is_none(&self) -> bool {
        matches!(self, BodyType::None)
    }
}

/// A header value, either single or repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

impl HeaderValue {
    pub fn values(&self) -> &[String] {
        match self {
            HeaderValue::One(value) => std::slice::from_ref(value),
            HeaderValue::Many(values) => values,
        }
    }
}

/// Request description: method, URL, headers and one body variant.
///
/// ```json
/// {"Method":"POST","Url":"http://api/users","Headers":{"X-Trace":["a","b"]},
///  "BodyType":"JSON","BodyJson":{"name":"khs"}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Req {
    /// HTTP method; empty means GET.
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValue>,
    /// Opaque data carried through to the response template.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_str: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body_json: Value,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub body_bytes: Vec<u8>,
}

impl Req {
    /// Resolves the HTTP method.
    pub fn http_method(&self) -> Result<Method, DispatchError> {
        if self.method.is_empty() {
            return Ok(Method::GET);
        }
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| DispatchError::InvalidMethod(self.method.clone()))
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|key| key.eq_ignore_ascii_case(name))
    }

    /// Builds the outbound request on `client`.
    ///
    /// Header names and values are validated by reqwest when the request is
    /// sent.
    pub fn to_request(&self, client: &Client) -> Result<RequestBuilder, DispatchError> {
        let mut builder = client.request(self.http_method()?, &self.url);

        for (name, value) in &self.headers {
            for v in value.values() {
                builder = builder.header(name.as_str(), v.as_str());
            }
        }

        builder = match self.body_type {
            BodyType::None => builder,
            BodyType::Text => builder.body(self.body_str.clone()),
            BodyType::Json => {
                if !self.has_header(CONTENT_TYPE.as_str()) {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }
                builder.body(self.body_json.to_string())
            }
            BodyType::Byte => builder.body(self.body_bytes.clone()),
        };

        Ok(builder)
    }
}

/// Base64 (standard alphabet) encoding for byte bodies.
pub(crate) mod base64_bytes {
    use super::{Engine, BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) => BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
