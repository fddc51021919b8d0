//! Cross-site message relay: site-master election, inter-site bridges, and a
//! per-destination send bundler.
//!
//! The relay layer ([`core::RelayCore`]) elects site masters from cluster
//! views, owns inter-site bridges through a [`relayer::Relayer`], and routes
//! messages to local or remote sites with forwarding-route fallback and
//! multicast cycle prevention. The bundler ([`bundler::Bundler`]) is a
//! secondary concern on the hot send path: per-destination accumulation
//! under a byte budget plus a loopback fast path.
//!
//! Serialization of message payloads, the underlying group-membership
//! transport, the timer/scheduler and the address/name registry are external
//! collaborators (see [`traits::Transport`], [`traits::Bridge`],
//! [`traits::BridgeFactory`]) — this crate relays on top of them, it does
//! not implement them.

pub mod address;
pub mod bundler;
pub mod config;
pub mod core;
pub mod election;
pub mod error;
pub mod header;
pub mod message;
pub mod relayer;
pub mod route;
pub mod stats;
pub mod suppress_log;
pub mod topology;
pub mod traits;
pub mod view;

pub use address::{Address, ExtendedAddress, LocalAddress, SiteAddress, SiteName};
pub use config::{BundlerConfig, RelayConfig, RemoteSiteConfig};
pub use core::RelayCore;
pub use error::{ConfigError, RelayError};
pub use message::{Message, MessageFlags};
pub use relayer::Relayer;
pub use route::Route;
pub use traits::{Bridge, BridgeFactory, RouteStatusListener, SiteMasterPicker, Transport};
pub use view::View;
