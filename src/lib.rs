//! OAuth 2.1 resource-server authentication and RFC 8693 delegation core for
//! MCP-style tool servers.
//!
//! ## Architecture
//!
//! - [`jwt`] — per-IDP JWT validation and the cross-issuer dispatcher (C2)
//! - [`role_mapper`] — claim -> role/permission/scope projection (C3)
//! - [`session`] — normalized, immutable session construction and migration (C4)
//! - [`auth_service`] — composes C2-C4 into a single `authenticate` call (C5)
//! - [`token_exchange`] — RFC 8693 token exchange against a trusted IDP (C6)
//! - [`cache`] — AES-256-GCM-sealed, session-keyed delegation-token cache (C7)
//! - [`delegation`] — named delegation module registry and contract (C8)
//! - [`context`] — dependency-injection container and build sequence (C9)
//! - [`middleware`] — `tower::Layer`/`tower::Service` transport binding (C10, feature `middleware`)
//! - [`authz`] — soft/hard role and scope checks on a [`session::Session`] (C11)
//! - [`audit`] — append-only audit sink shared by every component above (C1)
//! - [`config`] — configuration subtrees consumed by the core
//! - [`claims`] — decoded JWT claim representation
//! - [`error`] — the crate's unified error type
//!
//! ## Feature Flags
//!
//! - `default` — no optional features; the core is transport-agnostic
//! - `middleware` — enables [`middleware::CoreAuthLayer`]/[`middleware::CoreAuthService`]

pub mod audit;
pub mod auth_service;
pub mod authz;
pub mod cache;
pub mod claims;
pub mod config;
pub mod context;
pub mod delegation;
pub mod error;
pub mod jwt;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod role_mapper;
pub mod session;
pub mod token_exchange;

pub use auth_service::{AuthResult, AuthenticationService};
pub use authz::Authorization;
pub use context::{CoreContext, Orchestrator};
pub use error::{CoreError, CoreResult};
pub use session::Session;
