//! OpenXR stub, used when the `vr` feature is not enabled.
//!
//! Lets the OpenXR backend compile without the openxrs dependency; the
//! runtime always reports itself unavailable.

use tracing::info;

use super::RuntimeParts;

pub struct OpenXrRuntime;

impl OpenXrRuntime {
    pub fn initialize() -> anyhow::Result<Option<RuntimeParts>> {
        info!("XR: OpenXR disabled (compiled without 'vr' feature)");
        Ok(None)
    }
}
