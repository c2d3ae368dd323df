//! # Tower Valve
//!
//! `tower-valve` puts the store-backed admission primitives of [`valve_limit`] in
//! front of HTTP services built on the [Tower](https://github.com/tower-rs/tower)
//! ecosystem.
//!
//! ## The Admission Pipeline
//! [`AdmissionLayer`] composes every stage in a fixed order:
//!
//! 1. **Peer limit**: a [`valve_limit::Limiter`] keyed by client address
//!    ([`PeerAddr`]). Rejections become [`ValveError::RateLimited`].
//! 2. **Authentication**: a caller-supplied layer that inserts an [`Owner`]
//!    extension. This crate never authenticates anything itself.
//! 3. **Owner limit**: a limiter keyed by the [`Owner`] ([`OwnerId`]).
//! 4. **Owner lock**: a [`valve_limit::Guard`] that lets one request per owner
//!    through at a time. Contention becomes [`ValveError::Busy`].
//!
//! A stage whose key cannot be resolved is skipped. A stage whose store cannot be
//! reached admits the request.
//!
//! Admitted responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` (seconds). When several limiters admit a request the one
//! with the fewest calls remaining is reported.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ValveError`] (429, 408, 503) and
//!   resolves [`PeerAddr`] from axum's `ConnectInfo`.

mod admission_layer;
mod cooldown;
mod error;
pub mod headers;
mod layer;
mod metrics;
mod resolve;
mod serialize_layer;
mod serialize_service;
mod service;
mod utils;


pub use admission_layer::AdmissionLayer;
pub use admission_layer::OwnerStages;
pub use cooldown::CooldownLayer;
pub use cooldown::CooldownService;
pub use error::ValveError;
pub use layer::RateLimitLayer;
pub use resolve::Owner;
pub use resolve::OwnerId;
pub use resolve::PeerAddr;
pub use serialize_layer::SerializeLayer;
pub use serialize_service::SerializeService;
pub use service::RateLimitService;
pub use utils::ServiceBuilderExt;
