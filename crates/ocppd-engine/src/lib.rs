//! # ocppd-engine
//!
//! Session engine over the `ocppd-core` message model.
//!
//! - Ordered async handler chains ([`chain`])
//! - Per-connection sessions with synchronicity enforcement ([`session`],
//!   [`store`], [`sync`])
//! - Action allow-lists ([`actions`]) and the authentication pipeline
//!   ([`auth`])
//! - The [`endpoint::Endpoint`] state machine tying chains, sessions and a
//!   [`endpoint::Transport`] together, with broadcast [`events`]

#![deny(unsafe_code)]

pub mod actions;
pub mod auth;
pub mod chain;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod session;
pub mod store;
pub mod sync;

pub use actions::{InboundActionsAllowed, OutboundActionsAllowed};
pub use auth::{AuthDecision, AuthRequest, SessionExists};
pub use chain::{Chain, ChainOutcome, Flow, Stage};
pub use config::EndpointConfig;
pub use endpoint::{Endpoint, EndpointBuilder, Transport};
pub use errors::EngineError;
pub use events::{EndpointEvent, Events};
pub use session::{Session, SyncViolation};
pub use store::SessionStore;
pub use sync::{InboundSynchronicity, OutboundSynchronicity};
