//! # AuthBridge Processor
//!
//! Envoy `ext_authz` service that authenticates traffic for one workload.
//!
//! - **Inbound**: requests carrying the direction marker must present a
//!   bearer JWT signed by the identity provider, issued by the configured
//!   issuer and, optionally, addressed to the expected audience.
//! - **Outbound**: all other requests have their bearer token exchanged
//!   (RFC 8693) for one scoped to the target audience; any failure passes
//!   the original token through.
//!
//! Credentials are bootstrapped from files written by a registration
//! sidecar, falling back to the environment, and held in an atomically
//! replaceable [`CredentialStore`].

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod bypass;
pub mod config;
pub mod credentials;
pub mod error;
pub mod inbound;
pub mod jwks;
pub mod outbound;
pub mod router;
pub mod server;
pub mod telemetry;

pub use bootstrap::{BootstrapConfig, CredentialSource, StaticSettings, bootstrap, reload};
pub use bypass::BypassMatcher;
pub use config::Cli;
pub use credentials::{CredentialStore, Credentials};
pub use error::{ProcessorError, Result};
pub use inbound::{InboundDecision, InboundValidator};
pub use jwks::StoreKeySetSource;
pub use outbound::{ClientAuthMethod, OutboundDecision, TokenExchanger};
pub use router::{DIRECTION_HEADER, Direction, DirectionRouter, ProcessingRequest, ProcessingResponse};
pub use server::Server;
