//! HTTP request dispatch.
//!
//! The request template renders a [`Req`]; a [`Dispatcher`] runs it on a
//! bounded pool of workers through an [`HttpExecutor`] and reports a [`Res`],
//! which the response template then renders.

pub mod executor;
pub mod pool;
pub mod request;
pub mod response;

pub use executor::{HttpExecutor, ReqwestExecutor};
pub use pool::{DispatchError, Dispatcher, WorkResult, WorkUnit};
pub use request::{BodyType, HeaderValue, Req};
pub use response::{canonical_header_name, infer_body_type, Res};
