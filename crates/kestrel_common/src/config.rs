use serde::{Deserialize, Serialize};

/// Top-level configuration (kestrel.toml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Scan-execution configuration section in kestrel.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Per-group stream channel capacity, in rows. A group worker that gets
    /// this far ahead of the merge stage blocks until the consumer catches up.
    #[serde(default = "default_stream_buffer_rows")]
    pub stream_buffer_rows: usize,
    /// Upper bound on concurrent scan groups per query. A plan whose split
    /// produces more groups is rejected before any scan is issued.
    #[serde(default = "default_max_scan_groups")]
    pub max_scan_groups: usize,
}

fn default_stream_buffer_rows() -> usize {
    256
}

fn default_max_scan_groups() -> usize {
    64
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stream_buffer_rows: default_stream_buffer_rows(),
            max_scan_groups: default_max_scan_groups(),
        }
    }
}

/// Guidepost statistics configuration section in kestrel.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Guidepost width applied to tables that have never run
    /// `UPDATE STATISTICS`. 0 = unset (such tables are never split).
    #[serde(default)]
    pub default_guidepost_width_bytes: u64,
    /// Hard cap on guideposts collected per table.
    #[serde(default = "default_max_guideposts_per_table")]
    pub max_guideposts_per_table: usize,
}

fn default_max_guideposts_per_table() -> usize {
    4096
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            default_guidepost_width_bytes: 0,
            max_guideposts_per_table: default_max_guideposts_per_table(),
        }
    }
}

impl KestrelConfig {
    /// Parse a kestrel.toml document. Missing sections take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, String> {
        let config: KestrelConfig =
            toml::from_str(s).map_err(|e| format!("config parse error: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.scan.stream_buffer_rows == 0 {
            return Err("scan.stream_buffer_rows must be at least 1".into());
        }
        if self.scan.max_scan_groups == 0 {
            return Err("scan.max_scan_groups must be at least 1".into());
        }
        if self.stats.max_guideposts_per_table == 0 {
            return Err("stats.max_guideposts_per_table must be at least 1".into());
        }
        Ok(())
    }
}
