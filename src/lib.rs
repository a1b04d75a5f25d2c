//! Reconcile a host's OpenVPN server with a newly generated configuration
//! bundle: install it only when newer, back up what it replaces, open the
//! firewall and bring the service up.

pub mod backup;
pub mod bundle;
pub mod config;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod firewall;
pub mod platform;
pub mod probe;
pub mod service;
pub mod state;
pub mod utils;
pub mod version;

pub use config::DeployConfig;
pub use deploy::{DeployOutcome, DeployRequest};
pub use error::{DeployError, Stage};
