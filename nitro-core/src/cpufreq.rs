//! Per-core cpufreq attribute access
//!
//! The performance daemon writes three kernel knobs: the scaling governor
//! and energy-performance preference of every logical core, and the global
//! intel_pstate turbo-disable toggle. Core policy directories are
//! enumerated once at startup and the set is fixed for the process
//! lifetime.
//!
//! Access goes through the [`CpuCtl`] trait so the daemon core can be
//! tested against a recording fake.

use crate::model::AttributeSet;
use nitro_error::{NitroError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const GOVERNOR_ATTR: &str = "scaling_governor";
const EPP_ATTR: &str = "energy_performance_preference";

/// Governor/EPP/turbo control over a fixed set of cores
pub trait CpuCtl {
    /// Number of logical cores enumerated at startup
    fn core_count(&self) -> usize;
    fn write_governor(&mut self, core: usize, governor: &str) -> Result<()>;
    fn write_epp(&mut self, core: usize, epp: &str) -> Result<()>;
    fn write_turbo(&mut self, enabled: bool) -> Result<()>;
    fn read_governor(&self, core: usize) -> Result<String>;
    fn read_epp(&self, core: usize) -> Result<String>;
    fn read_turbo(&self) -> Result<bool>;
}

/// The real sysfs cpufreq tree
#[derive(Debug)]
pub struct SysfsCpu {
    /// Per-core cpufreq policy directories, sorted by core index
    policies: Vec<PathBuf>,
    no_turbo: PathBuf,
}

impl SysfsCpu {
    /// Enumerate the verified model's cpufreq tree
    pub fn discover(attrs: &AttributeSet) -> Result<Self> {
        Self::with_paths(Path::new(attrs.cpufreq_root), Path::new(attrs.no_turbo))
    }

    /// Enumerate an explicit tree (tests use a sysfs replica in a tempdir)
    pub fn with_paths(cpufreq_root: &Path, no_turbo: &Path) -> Result<Self> {
        if !no_turbo.exists() {
            return Err(NitroError::generic(format!(
                "Turbo toggle {} not found: intel_pstate driver not available",
                no_turbo.display()
            )));
        }

        let mut indexed: Vec<(usize, PathBuf)> = Vec::new();
        let entries = fs::read_dir(cpufreq_root).map_err(|source| NitroError::FileRead {
            path: cpufreq_root.to_path_buf(),
            source,
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(index) = cpu_index(&name.to_string_lossy()) else {
                continue;
            };
            let policy = entry.path().join("cpufreq");
            if policy.is_dir() {
                indexed.push((index, policy));
            }
        }

        if indexed.is_empty() {
            return Err(NitroError::NoCpuPolicies);
        }
        indexed.sort_by_key(|(index, _)| *index);

        info!("Enumerated {} cpufreq policies", indexed.len());
        Ok(Self {
            policies: indexed.into_iter().map(|(_, path)| path).collect(),
            no_turbo: no_turbo.to_path_buf(),
        })
    }

    fn attr(&self, core: usize, name: &str) -> PathBuf {
        self.policies[core].join(name)
    }

    fn write_attr(path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|e| NitroError::AttrWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("CPU write: {} <- {}", path.display(), value);
        Ok(())
    }

    fn read_attr(path: &Path) -> Result<String> {
        let raw = fs::read_to_string(path).map_err(|e| NitroError::AttrRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(raw.trim().to_string())
    }
}

impl CpuCtl for SysfsCpu {
    fn core_count(&self) -> usize {
        self.policies.len()
    }

    fn write_governor(&mut self, core: usize, governor: &str) -> Result<()> {
        Self::write_attr(&self.attr(core, GOVERNOR_ATTR), governor)
    }

    fn write_epp(&mut self, core: usize, epp: &str) -> Result<()> {
        Self::write_attr(&self.attr(core, EPP_ATTR), epp)
    }

    fn write_turbo(&mut self, enabled: bool) -> Result<()> {
        // no_turbo is the boolean inverse of turbo-enabled
        Self::write_attr(&self.no_turbo, if enabled { "0" } else { "1" })
    }

    fn read_governor(&self, core: usize) -> Result<String> {
        Self::read_attr(&self.attr(core, GOVERNOR_ATTR))
    }

    fn read_epp(&self, core: usize) -> Result<String> {
        Self::read_attr(&self.attr(core, EPP_ATTR))
    }

    fn read_turbo(&self) -> Result<bool> {
        Ok(Self::read_attr(&self.no_turbo)? == "0")
    }
}

/// Parse a core index out of a "cpuN" directory name
fn cpu_index(name: &str) -> Option<usize> {
    name.strip_prefix("cpu")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs_replica(cores: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for core in 0..cores {
            let policy = dir.path().join(format!("cpu{}", core)).join("cpufreq");
            fs::create_dir_all(&policy).unwrap();
            fs::write(policy.join(GOVERNOR_ATTR), "powersave\n").unwrap();
            fs::write(policy.join(EPP_ATTR), "balance_performance\n").unwrap();
        }
        // Non-policy siblings that must not be picked up
        fs::create_dir_all(dir.path().join("cpufreq")).unwrap();
        fs::create_dir_all(dir.path().join("cpuidle")).unwrap();
        fs::create_dir_all(dir.path().join("intel_pstate")).unwrap();
        fs::write(dir.path().join("intel_pstate").join("no_turbo"), "0\n").unwrap();
        dir
    }

    fn open(dir: &tempfile::TempDir) -> SysfsCpu {
        SysfsCpu::with_paths(dir.path(), &dir.path().join("intel_pstate").join("no_turbo")).unwrap()
    }

    #[test]
    fn enumerates_only_core_policy_directories() {
        let dir = sysfs_replica(4);
        let cpu = open(&dir);
        assert_eq!(cpu.core_count(), 4);
    }

    #[test]
    fn governor_and_epp_writes_land_per_core() {
        let dir = sysfs_replica(2);
        let mut cpu = open(&dir);

        cpu.write_governor(1, "performance").unwrap();
        cpu.write_epp(0, "power").unwrap();

        assert_eq!(cpu.read_governor(1).unwrap(), "performance");
        assert_eq!(cpu.read_governor(0).unwrap(), "powersave");
        assert_eq!(cpu.read_epp(0).unwrap(), "power");
    }

    #[test]
    fn turbo_writes_are_inverted() {
        let dir = sysfs_replica(1);
        let mut cpu = open(&dir);

        cpu.write_turbo(false).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("intel_pstate").join("no_turbo")).unwrap(),
            "1"
        );
        assert!(!cpu.read_turbo().unwrap());

        cpu.write_turbo(true).unwrap();
        assert!(cpu.read_turbo().unwrap());
    }

    #[test]
    fn missing_turbo_toggle_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = SysfsCpu::with_paths(dir.path(), &dir.path().join("no_turbo")).unwrap_err();
        assert!(err.to_string().contains("intel_pstate"));
    }

    #[test]
    fn empty_tree_reports_no_policies() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("no_turbo"), "0").unwrap();
        let err = SysfsCpu::with_paths(dir.path(), &dir.path().join("no_turbo")).unwrap_err();
        assert!(matches!(err, NitroError::NoCpuPolicies));
    }
}
