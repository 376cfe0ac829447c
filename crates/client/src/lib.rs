//! Target and source API client — used by the CLI sync commands.
//!
//! Owns the wire contract: credentials, the retrying executor, typed
//! shapes per entity kind (device, site, label, interface, NMS device) and the
//! [`TargetApi`](invsync_recon::TargetApi) adapters the engine drives.
//!
//! Blocking reqwest client (no Tokio runtime required).

pub mod api;
mod auth;
mod executor;
pub mod netbox;
pub mod nms;
pub mod target;

pub use api::TargetClient;
pub use auth::Credentials;
pub use executor::{Executor, Method, Response, RetryPolicy, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET};
pub use netbox::NetboxClient;
pub use nms::NmsClient;
pub use target::{DeviceTarget, InterfaceTarget, NmsTarget};
