//! KNI Runtime - node network attachment engine.
//!
//! This crate provides the attachment service and everything it drives:
//! the record store, request translation, multi-network parsing, the shared
//! plugin handle, the configuration syncer and the CNI plugin runtime.

#![allow(clippy::result_large_err)]

pub mod capability;
pub mod cni;
pub mod handle;
pub mod locks;
pub mod multinet;
pub mod quantity;
pub mod service;
pub mod simulate;
pub mod store;
pub mod syncer;

// Re-export common types
pub use capability::{namespace_options, PodContext};
pub use cni::CniRuntime;
pub use handle::PluginHandle;
pub use locks::{SandboxGuard, SandboxLocks};
pub use multinet::{build_network_list, extract_networks, ANN_MULTI_NETWORK};
pub use service::KniService;
pub use simulate::{is_simulate_mode, SimulatedControl, SimulatedRuntime};
pub use store::AttachmentStore;
pub use syncer::ConfigSyncer;

/// KNI Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
