//! Volume configuration from TOML (`[volumes]` section)

use serde::{Deserialize, Serialize};
use toolcell_application::VolumeConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileVolumesConfig {
    pub prefix: String,
    /// Keep per-tool volumes across executions
    pub persistent: bool,
    pub max_volumes: usize,
    pub mount_path: String,
}

impl Default for FileVolumesConfig {
    fn default() -> Self {
        let d = VolumeConfig::default();
        Self {
            prefix: d.prefix,
            persistent: d.persistent,
            max_volumes: d.max_volumes,
            mount_path: d.mount_path,
        }
    }
}

impl FileVolumesConfig {
    pub fn to_volume_config(&self) -> VolumeConfig {
        VolumeConfig {
            prefix: self.prefix.clone(),
            persistent: self.persistent,
            max_volumes: self.max_volumes,
            mount_path: self.mount_path.clone(),
        }
    }
}
