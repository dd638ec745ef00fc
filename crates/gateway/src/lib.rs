//! Gateway: HTTP surface for the capability manifest and invocation envelope.
//!
//! Routes:
//! - `GET /health`
//! - `GET /manifest.json`: the read-only capability manifest
//! - `POST /rpc`: one `{method, params, id}` invocation per request
//!
//! All validation happens in the dispatcher; the gateway only handles
//! framing and the optional bearer token.

pub mod auth;
pub mod server;
pub mod state;

pub use server::{build_gateway_app, start_gateway};
