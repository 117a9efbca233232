use serde::{Deserialize, Serialize};

pub const DEFAULT_DRIVER_NAME: &str = "csidriver.whou.io";
pub const DEFAULT_ENDPOINT: &str = "unix:///csi/csi.sock";
pub const ENV_PREFIX: &str = "LVM_CSI";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub driver: DriverConfig,
    pub lvm: LvmConfig,
    pub cgroup: CgroupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Reported by GetPluginInfo; must match the StorageClass provisioner.
    pub name: String,
    pub vendor_version: String,
    pub node_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LvmConfig {
    /// Parent of the `<vg>/<lv>` device links, normally `/dev`.
    pub volume_dir: String,
    pub enabled: bool,
    pub lvcreate_bin: String,
    pub lvremove_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgroupConfig {
    pub root: String,
    pub container_runtime: String,
}

impl Config {
    /// Defaults, then an optional `lvm-csi.{toml,yaml,json}` (or `path`), then
    /// `LVM_CSI__SECTION__KEY` environment variables.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let defaults = config::Config::try_from(&Config::default())?;

        let file = match path {
            Some(p) => config::File::with_name(p).required(true),
            None => config::File::with_name("lvm-csi").required(false),
        };

        let config = config::Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Returns the socket path of a `unix://` endpoint.
    pub fn socket_path(&self) -> anyhow::Result<&str> {
        parse_endpoint(&self.driver.endpoint)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.driver.name.is_empty() {
            anyhow::bail!("driver name is required");
        }
        if self.driver.node_id.is_empty() {
            anyhow::bail!("node id is required");
        }
        self.socket_path()?;
        if self.lvm.volume_dir.is_empty() {
            anyhow::bail!("volume directory is required");
        }
        Ok(())
    }
}

/// `unix:///csi/csi.sock` -> `/csi/csi.sock`. The scheme is matched
/// case-insensitively.
pub fn parse_endpoint(endpoint: &str) -> anyhow::Result<&str> {
    const SCHEME: &str = "unix://";
    match endpoint.get(..SCHEME.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(SCHEME) && endpoint.len() > SCHEME.len() => {
            Ok(&endpoint[SCHEME.len()..])
        }
        _ => anyhow::bail!("invalid endpoint: {}", endpoint),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: DriverConfig {
                name: DEFAULT_DRIVER_NAME.to_string(),
                vendor_version: env!("CARGO_PKG_VERSION").to_string(),
                node_id: String::new(),
                endpoint: DEFAULT_ENDPOINT.to_string(),
            },
            lvm: LvmConfig {
                volume_dir: "/dev".to_string(),
                enabled: true,
                lvcreate_bin: crate::lvm::backend::LV_CREATE.to_string(),
                lvremove_bin: crate::lvm::backend::LV_REMOVE.to_string(),
            },
            cgroup: CgroupConfig {
                root: crate::iolimit::DEFAULT_CGROUP_ROOT.to_string(),
                container_runtime: "containerd".to_string(),
            },
        }
    }
}
