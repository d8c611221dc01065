//! Docker adapter configuration from TOML (`[docker]` section)

use serde::{Deserialize, Serialize};

use crate::docker::DockerSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDockerConfig {
    /// Client binary name or path
    pub binary: String,
    /// Image used to copy files in and out of volumes
    pub helper_image: String,
}

impl Default for FileDockerConfig {
    fn default() -> Self {
        let d = DockerSettings::default();
        Self {
            binary: d.binary,
            helper_image: d.helper_image,
        }
    }
}

impl FileDockerConfig {
    /// Files copied into volumes are owned by the sandbox user so tools can
    /// write to them.
    pub fn to_docker_settings(&self, sandbox_user: Option<&str>) -> DockerSettings {
        DockerSettings {
            binary: self.binary.clone(),
            helper_image: self.helper_image.clone(),
            volume_owner: sandbox_user.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_owner_follows_sandbox_user() {
        let config: FileDockerConfig = toml::from_str("binary = \"podman\"").unwrap();
        let settings = config.to_docker_settings(Some("1000:1000"));
        assert_eq!(settings.binary, "podman");
        assert_eq!(settings.helper_image, "alpine:3");
        assert_eq!(settings.volume_owner.as_deref(), Some("1000:1000"));
        assert!(config.to_docker_settings(None).volume_owner.is_none());
    }
}
