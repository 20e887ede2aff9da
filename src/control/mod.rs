//! Control flow between a computation and whoever drives it.
//!
//! - [`message`]: the closed request/response taxonomy
//! - [`suspend`]: the suspension primitive and the [`Computation`] driver

pub mod message;
pub mod suspend;

pub use message::{ControlRequest, ControlResponse, Decision, RequestId, RequestKind, ResponsePayload};
pub use suspend::{
    detached, ensure_context, in_driven_context, request_or_default, suspend, Computation,
    DefaultResponder, Driven, Responder,
};
