//! Sync Configuration
//!
//! Configuration can be loaded from:
//! - Default values
//! - Config file (~/.config/shuttlx/<role>.toml), layered over the role's defaults
//! - Environment variables (`SHUTTLX_CONTAINER`)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// App group identifier both processes agree on
pub const DEFAULT_GROUP_ID: &str = "group.com.shuttlx.shared";

/// Environment variable overriding the shared container root
pub const CONTAINER_ENV: &str = "SHUTTLX_CONTAINER";

/// Top-level sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Which side of the pair this process is
    pub role: DeviceRole,

    /// Record store locations
    pub storage: StorageConfig,

    /// Peer link and timers
    pub connectivity: ConnectivityConfig,

    /// Live-send retry policy
    pub retry: RetryConfig,

    /// Diagnostics settings
    pub monitor: MonitorConfig,
}

/// The two cooperating applications
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Phone,
    Watch,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Phone => "phone",
            DeviceRole::Watch => "watch",
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which group containers live (None = no shared container)
    pub container_root: Option<PathBuf>,

    /// Group identifier, the container directory name
    pub group_id: String,

    /// Process-local directory used when the container is unusable
    pub local_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Address the TCP link listens on
    pub listen_addr: SocketAddr,

    /// Address of the companion process
    pub peer_addr: Option<SocketAddr>,

    /// Connect/ack timeout for a single frame
    pub send_timeout_ms: u64,

    /// How often the periodic pull fires while running
    pub pull_interval_secs: u64,

    /// How often connectivity status is sampled
    pub status_poll_secs: u64,

    /// Minimum time between liveness pings
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Live-send attempts before handing off to the durable channel
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum entries kept in the event log
    pub log_capacity: usize,

    /// EWMA weight of the newest transfer outcome (0..=1)
    pub smoothing: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::for_role(DeviceRole::Phone)
    }
}

impl SyncConfig {
    /// Defaults for one side of the pair
    pub fn for_role(role: DeviceRole) -> Self {
        let mut connectivity = ConnectivityConfig::default();
        if role == DeviceRole::Watch {
            connectivity.listen_addr = SocketAddr::from(([127, 0, 0, 1], 47802));
            connectivity.peer_addr = Some(SocketAddr::from(([127, 0, 0, 1], 47801)));
        }

        let mut storage = StorageConfig::default();
        storage.local_dir = storage.local_dir.join(role.as_str());

        Self {
            role,
            storage,
            connectivity,
            retry: RetryConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }

    /// Default config file location for one side of the pair
    pub fn default_path(role: DeviceRole) -> PathBuf {
        let file = format!("shuttlx/{}.toml", role.as_str());
        dirs::config_dir()
            .map(|d| d.join(&file))
            .unwrap_or_else(|| PathBuf::from(format!("{}.toml", role.as_str())))
    }

    /// Load from a specific file; missing or malformed files yield defaults.
    ///
    /// The file is layered over the defaults of its role, so a file that
    /// only says `role = "watch"` still gets the watch's addresses and
    /// local directory.
    pub fn load_from(path: &Path) -> Self {
        Self::load_for(path, None)
    }

    /// Like [`load_from`](Self::load_from), with `role` taking precedence
    /// over the file's `role` key before any defaults are filled in.
    pub fn load_for(path: &Path, role: Option<DeviceRole>) -> Self {
        let overlay = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<toml::Table>(&content) {
                Ok(table) => table,
                Err(e) => {
                    log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                    toml::Table::new()
                }
            },
            Err(_) => toml::Table::new(),
        };

        let role = role
            .or_else(|| {
                overlay
                    .get("role")
                    .cloned()
                    .and_then(|v| v.try_into::<DeviceRole>().ok())
            })
            .unwrap_or(DeviceRole::Phone);

        let mut config = Self::layered(role, overlay).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed config {}: {}", path.display(), e);
            Self::for_role(role)
        });
        config.apply_env();
        config
    }

    fn layered(role: DeviceRole, overlay: toml::Table) -> Result<Self, String> {
        let mut table = match toml::Value::try_from(Self::for_role(role)) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => return Err("defaults did not serialize to a table".into()),
            Err(e) => return Err(e.to_string()),
        };
        merge_tables(&mut table, overlay);
        table.insert("role".into(), toml::Value::String(role.as_str().into()));

        toml::Value::Table(table)
            .try_into::<SyncConfig>()
            .map_err(|e| e.to_string())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Some(root) = std::env::var_os(CONTAINER_ENV) {
            self.storage.container_root = Some(PathBuf::from(root));
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        std::fs::write(path, content)
    }

    /// Config rooted entirely under one directory (tests, demos)
    pub fn isolated(role: DeviceRole, base: &Path) -> Self {
        let mut config = Self::for_role(role);
        config.storage.container_root = Some(base.join("containers"));
        config.storage.local_dir = base.join("local").join(role.as_str());
        config
    }
}

/// Overlay `overlay` onto `base`, descending into tables present in both
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) =
            (base.get_mut(&key), &value)
        {
            merge_tables(existing, incoming.clone());
            continue;
        }
        base.insert(key, value);
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let local = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shuttlx");

        Self {
            container_root: dirs::data_dir().map(|d| d.join("shuttlx/groups")),
            group_id: DEFAULT_GROUP_ID.to_string(),
            local_dir: local,
        }
    }
}

impl StorageConfig {
    /// Path of the shared container, if one is configured
    pub fn container_path(&self) -> Option<PathBuf> {
        self.container_root.as_ref().map(|root| root.join(&self.group_id))
    }

    /// Fallback directory for the shared collections
    pub fn fallback_path(&self) -> PathBuf {
        self.local_dir.join("SharedData")
    }

    /// Where the per-process device id lives
    pub fn device_id_path(&self) -> PathBuf {
        self.local_dir.join("device_id")
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 47801)),
            peer_addr: Some(SocketAddr::from(([127, 0, 0, 1], 47802))),
            send_timeout_ms: 3000,
            pull_interval_secs: 30,
            status_poll_secs: 15,
            ping_interval_secs: 300,
        }
    }
}

impl ConnectivityConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_capacity: 50,
            smoothing: 0.3,
        }
    }
}
