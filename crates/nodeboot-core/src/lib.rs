//! `nodeboot` Core Library
//!
//! Pure logic shared by the bootstrap binary and the HTTP front:
//! - Settings and working-directory layout
//! - Platform detection and the download plan
//! - Relay, agent and tunnel configuration rendering
//! - Hostname discovery state machine
//! - Subscription link generation

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod error;
pub mod links;
pub mod platform;
pub mod relay_config;
pub mod retry;
pub mod subscription;
pub mod tracing_init;
pub mod tunnel;
pub mod workdir;

pub use config::Settings;
pub use error::{Error, Result};
pub use retry::RetryPolicy;
pub use subscription::SubscriptionRecord;
pub use workdir::WorkDir;
