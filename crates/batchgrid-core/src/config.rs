//! batchgrid.toml configuration parser.
//!
//! Everything the dispatcher needs to know about the cluster (scheduler
//! flavour, node limits, polling cadence) lives here and is handed to the
//! dispatcher at construction time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Directory holding `<name>_folder<suffix>` job folders.
    pub work_root: PathBuf,
    /// Pipeline working directory, exported to every job as `BATCHGRID_WD`.
    pub working_dir: PathBuf,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// How the external worker program is located and started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub interpreter: String,
    pub script_folder: PathBuf,
    /// File name of the worker inside `script_folder`; `{name}` is replaced
    /// with the batch name.
    pub script_template: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script_folder: PathBuf::from("."),
            script_template: "QSUB_{name}.py".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    GridEngine,
    Slurm,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    /// Grid engine queue (`-q`).
    pub queue: Option<String>,
    /// Grid engine parallel environment (`-pe`). Takes precedence over `queue`.
    pub pe: Option<String>,
    /// Free-form flags appended to every submit command.
    pub additional_flags: String,
    /// Slurm `--time` value.
    pub time_limit: String,
    pub poll_interval: String,
    /// Upper bound on the completion wait. Unset means wait until the
    /// scheduler reports no running jobs.
    pub monitor_timeout: Option<String>,
    /// Pause between two submit commands.
    pub submit_delay: String,
    /// User whose jobs are listed by the status command. Defaults to `$USER`.
    pub user: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::None,
            queue: None,
            pe: None,
            additional_flags: String::new(),
            time_limit: "0-12".to_string(),
            poll_interval: "5s".to_string(),
            monitor_timeout: None,
            submit_delay: "50ms".to_string(),
            user: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// Cores available to one batch across the cluster.
    pub total_cores: u32,
    pub cores_per_node: u32,
    pub mem_per_node_mb: u64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            total_cores: 20,
            cores_per_node: 20,
            mem_per_node_mb: 250_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_rounds: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_rounds: 3 }
    }
}

impl DispatchConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: DispatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration rooted at `work_root`, without a scheduler.
    pub fn local(work_root: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
            working_dir: working_dir.into(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            resources: ResourcesConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        let r = &self.resources;
        if r.total_cores == 0 {
            return Err(CoreError::Config("resources.total_cores must be positive".into()));
        }
        if r.cores_per_node == 0 {
            return Err(CoreError::Config("resources.cores_per_node must be positive".into()));
        }
        if r.mem_per_node_mb == 0 {
            return Err(CoreError::Config("resources.mem_per_node_mb must be positive".into()));
        }
        if self.retry.max_rounds == 0 {
            return Err(CoreError::Config("retry.max_rounds must be at least 1".into()));
        }
        if self.worker.interpreter.trim().is_empty() {
            return Err(CoreError::Config("worker.interpreter must not be empty".into()));
        }
        self.poll_interval()?;
        self.submit_delay()?;
        self.monitor_timeout()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> CoreResult<Duration> {
        parse_duration(&self.scheduler.poll_interval)
    }

    pub fn submit_delay(&self) -> CoreResult<Duration> {
        parse_duration(&self.scheduler.submit_delay)
    }

    pub fn monitor_timeout(&self) -> CoreResult<Option<Duration>> {
        self.scheduler
            .monitor_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
    }

    /// Path of the worker program for batch `name`.
    pub fn worker_program(&self, name: &str) -> PathBuf {
        let file = self.worker.script_template.replace("{name}", name);
        self.worker.script_folder.join(file)
    }

    /// The user whose queue listing is inspected.
    pub fn resolved_user(&self) -> String {
        self.scheduler
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Parse a duration string like "50ms", "5s", "2m" or "12h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let s = s.trim();
    let invalid = || CoreError::Config(format!("invalid duration: {s:?}"));
    // (digits, milliseconds per unit)
    let (digits, scale) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else {
        (s, 1_000)
    };
    let value = digits.trim().parse::<u64>().map_err(|_| invalid())?;
    let millis = value.checked_mul(scale).ok_or_else(invalid)?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config = DispatchConfig::from_toml_str(
            r#"
work_root = "/scratch/jobs"
working_dir = "/data/wd"
"#,
        )
        .unwrap();
        assert_eq!(config.work_root, PathBuf::from("/scratch/jobs"));
        assert_eq!(config.scheduler.kind, SchedulerKind::None);
        assert_eq!(config.retry.max_rounds, 3);
        assert_eq!(config.resources.cores_per_node, 20);
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(config.monitor_timeout().unwrap(), None);
    }

    #[test]
    fn parse_full_slurm_section() {
        let config = DispatchConfig::from_toml_str(
            r#"
work_root = "/scratch/jobs"
working_dir = "/data/wd"

[worker]
interpreter = "/opt/env/bin/python"
script_folder = "/opt/scripts"

[scheduler]
kind = "slurm"
additional_flags = "--partition=gpu"
poll_interval = "2s"
monitor_timeout = "12h"
user = "alice"

[resources]
total_cores = 320
cores_per_node = 32
mem_per_node_mb = 500000

[retry]
max_rounds = 5
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.kind, SchedulerKind::Slurm);
        assert_eq!(config.scheduler.additional_flags, "--partition=gpu");
        assert_eq!(config.monitor_timeout().unwrap(), Some(Duration::from_secs(12 * 3600)));
        assert_eq!(config.resolved_user(), "alice");
        assert_eq!(config.resources.total_cores, 320);
        assert_eq!(config.retry.max_rounds, 5);
        assert_eq!(
            config.worker_program("mesh"),
            PathBuf::from("/opt/scripts/QSUB_mesh.py")
        );
    }

    #[test]
    fn grid_engine_kind_is_snake_case() {
        let config = DispatchConfig::from_toml_str(
            r#"
work_root = "/w"
working_dir = "/d"
[scheduler]
kind = "grid_engine"
pe = "openmp"
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.kind, SchedulerKind::GridEngine);
        assert_eq!(config.scheduler.pe.as_deref(), Some("openmp"));
    }

    #[test]
    fn zero_cores_rejected() {
        let err = DispatchConfig::from_toml_str(
            r#"
work_root = "/w"
working_dir = "/d"
[resources]
cores_per_node = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn zero_rounds_rejected() {
        let mut config = DispatchConfig::local("/w", "/d");
        config.retry.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_poll_interval_rejected() {
        let mut config = DispatchConfig::local("/w", "/d");
        config.scheduler.poll_interval = "soon".to_string();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn unknown_scheduler_kind_fails_to_parse() {
        let err = DispatchConfig::from_toml_str(
            r#"
work_root = "/w"
working_dir = "/d"
[scheduler]
kind = "pbs"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batchgrid.toml");
        std::fs::write(&path, "work_root = \"/w\"\nworking_dir = \"/d\"\n").unwrap();
        let config = DispatchConfig::from_file(&path).unwrap();
        assert_eq!(config.working_dir, PathBuf::from("/d"));
    }
}
