//! KNI Server - node network runtime gRPC endpoint.
//!
//! Exposes the attachment service to the container runtime as
//! `kni.v1.NetworkRuntime`:
//! - AttachNetwork / DetachNetwork → sandbox network lifecycle
//! - QueryPodNetwork / QueryNodeNetworks → recorded state and readiness

pub mod convert;
pub mod error;
pub mod kni_api;
pub mod network_service;
pub mod server;
