//! # Decofile Operator
//!
//! A Kubernetes operator that materializes declarative `Decofile` resources
//! into ConfigMaps, injects them as file volumes into Knative Services, and
//! live-reloads the bound pods whenever the configuration content changes.
//!
//! ## Overview
//!
//! 1. **Watching Decofiles** - Reconciles `Decofile` resources across all
//!    namespaces
//! 2. **Fetching content** - Inline file maps or GitHub revision archives
//!    (codeload ZIP), normalized into a single JSON document
//! 3. **Materializing ConfigMaps** - Deterministic change detection, brotli
//!    compression past 2.5 MiB, cascade ownership
//! 4. **Admission webhooks** - Service mutation on create/update, Decofile
//!    deletion protection
//! 5. **Pod live-reload** - Token-authenticated POST fan-out with bounded
//!    concurrency, retries, and deadlines
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for deployment instructions.

use anyhow::Result;

use decofile_operator::runtime::initialization::initialize;
use decofile_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the operator runtime
    let init_result = initialize().await?;

    // Run the watch loop
    run_watch_loop(init_result.decofiles, init_result.reconciler).await?;

    Ok(())
}
