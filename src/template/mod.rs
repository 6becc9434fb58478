//! Text templates with JSONPath lookups.
//!
//! Request and response templates are literal text with `{{ }}` actions that
//! pull values out of a JSON document:
//!
//! ```text
//! {"Method":"POST","Url":"http://api/users/{{reftext "$.id"}}",
//!  "BodyType":"JSON","BodyJson":{"name":{{ref "$.user.name"}}}}
//! ```
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tickpipe::template::Template;
//!
//! let template = Template::compile("req", r#"{"last":{{ref "/username/family"}}}"#).unwrap();
//! let out = template.render(&json!({"username": {"family": "k"}})).unwrap();
//! assert_eq!(out, r#"{"last":"k"}"#);
//! ```

mod engine;
mod parser;
pub mod path;

pub use engine::Template;
pub use path::JsonPath;
