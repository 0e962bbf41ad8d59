//! crosshub - permissioned key-value hub and client over an origin-tagged channel
//!
//! A [`Hub`] owns a [`kvstore::KeyValueStore`] and serves requests from other
//! origins according to a [`PermissionTable`]. A [`Client`] proxies storage
//! operations through a hub, correlating responses to requests by id.
//!
//! # Modules
//!
//! - [`origin`] - origin identity and reply targets
//! - [`permissions`] - method set and origin pattern table
//! - [`protocol`] - wire envelopes and control tokens
//! - [`ttl`] - expiring item codec and clocks
//! - [`hub`] - dispatcher and listen capability
//! - [`client`] - request/response client
//! - [`transport`] - the `Port` abstraction, in-memory and Unix socket ports

pub mod cli;
pub mod client;
pub mod config;
pub mod hub;
pub mod origin;
pub mod permissions;
pub mod protocol;
pub mod transport;
pub mod ttl;

pub use client::{Client, ClientError, ClientOptions, ClientResult, Subscription};
pub use config::Config;
pub use hub::{Hub, HubStatus, OpError, init};
pub use origin::{Origin, TargetOrigin};
pub use permissions::{Method, PermissionEntry, PermissionError, PermissionTable};
pub use protocol::{ChangeNotice, RequestEnvelope, ResponseEnvelope};
pub use transport::{Message, Port, TransportError};
