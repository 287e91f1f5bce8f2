//! # livefn-core
//!
//! Shared vocabulary for the livefn runtime:
//!
//! - **Branded IDs**: `ConnId`, `HandlerId`, `ListenerId` as newtypes for type safety
//! - **Dispatch envelope**: [`Dispatch`] with a closed [`Payload`] sum type that
//!   still serializes to the flat wire object browsers expect
//! - **Errors**: [`EnvelopeError`] for malformed or unknown frames

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod ids;

pub use dispatch::{
    ClassPayload, CustomPayload, Dispatch, ErrorPayload, EventPayload, FunctionTag, Payload,
    PingPayload, RedirectPayload, RenderPayload,
};
pub use errors::EnvelopeError;
pub use ids::{ConnId, HandlerId, ListenerId};
