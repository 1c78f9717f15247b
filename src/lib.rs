//! Decofile Operator Library
//!
//! This library provides the core functionality for the decofile operator:
//!
//! 1. **Reconciliation** - Watches `Decofile` resources, fetches content from
//!    the declared source (inline or GitHub archive), and materializes it into
//!    an owned ConfigMap with deterministic change detection
//! 2. **Admission mutation** - Injects the ConfigMap volume, consumer env
//!    vars, reload token, and discovery label into Knative Services that opt
//!    in via the `decofile-inject` annotation
//! 3. **Pod notification** - On content changes, fans an authenticated reload
//!    POST out to every bound pod under a bounded worker pool with retries
//!    and a global deadline
//! 4. **Deletion validation** - Blocks deletion of a Decofile while Services
//!    are still bound to it

pub mod configmap;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod encoding;
pub mod knative;
pub mod notifier;
pub mod observability;
pub mod runtime;
pub mod source;
pub mod webhook;

// Re-export CRD types for convenience
pub use crd::*;
