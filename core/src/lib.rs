//! KNI Core - shared types for the node network runtime.
//!
//! Request/response shapes, the attachment record, service configuration,
//! error types and the plugin runtime contract.

pub mod api;
pub mod config;
pub mod error;
pub mod network;
pub mod plugin;
pub mod record;

// Re-export commonly used types
pub use api::{AttachRequest, CallContext, DetachRequest, NodeNetwork, PodNetwork};
pub use config::{KniConfig, MissingRecordPolicy};
pub use error::{KniError, Result};
pub use network::{BoundNetwork, NetworkInterfaceSpec, PluginConfig};
pub use plugin::{NamespaceOptions, PluginResult, PluginRuntime};
pub use record::AttachmentRecord;

/// KNI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
