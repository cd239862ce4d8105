//! Device configuration.

use fadeabe_keys::KeyConfig;
use fadeabe_pipeline::PipelineConfig;

/// Configuration for a [`crate::Device`].
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub keys: KeyConfig,
    pub pipeline: PipelineConfig,
}
