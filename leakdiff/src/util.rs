
use std::io::{ ErrorKind, Read };

use crate::error::{ LeakError, Result };

/// Utilities for controlling the state of the current process.
pub struct LeakEnv;
impl LeakEnv {
    const BOOST_PATH: &'static str =
        "/sys/devices/system/cpu/cpufreq/boost";
    const ISOLATED_PATH: &'static str =
        "/sys/devices/system/cpu/isolated";
    const NOHZ_PATH: &'static str =
        "/sys/devices/system/cpu/nohz_full";
    const SMT_PATH: &'static str =
        "/sys/devices/system/cpu/smt/control";
    const PARANOID_PATH: &'static str =
        "/proc/sys/kernel/perf_event_paranoid";
    pub const RDPMC_PATH: &'static str =
        "/sys/bus/event_source/devices/cpu/rdpmc";

    fn read_trimmed(path: &str) -> std::result::Result<String, ErrorKind> {
        let mut f = std::fs::File::open(path).map_err(|e| e.kind())?;
        let mut res = String::new();
        f.read_to_string(&mut res).map_err(|e| e.kind())?;
        Ok(res.trim().to_string())
    }

    /// Return a string describing a cpu list, or "disabled" if empty.
    fn cpu_list(path: &str) -> std::result::Result<String, ErrorKind> {
        let res = Self::read_trimmed(path)?;
        match res.as_str() {
            "" => Ok("disabled".to_string()),
            _ => Ok(res),
        }
    }

    /// Return a string describing the set of isolated cores.
    pub fn sysfs_isolated() -> std::result::Result<String, ErrorKind> {
        Self::cpu_list(Self::ISOLATED_PATH)
    }

    /// Return a string describing the set of 'nohz_full' cores.
    pub fn sysfs_nohz() -> std::result::Result<String, ErrorKind> {
        Self::cpu_list(Self::NOHZ_PATH)
    }

    /// Returns true if cpufreq boost is enabled.
    pub fn sysfs_cpufreq_boost_enabled() -> std::result::Result<bool, ErrorKind> {
        match Self::read_trimmed(Self::BOOST_PATH)?.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(ErrorKind::InvalidData),
        }
    }

    /// Return a string describing the cpufreq scaling strategy for a
    /// particular core.
    pub fn sysfs_cpufreq_governor(n: usize)
        -> std::result::Result<String, ErrorKind>
    {
        Self::read_trimmed(&format!(
            "/sys/devices/system/cpu/cpufreq/policy{}/scaling_governor", n
        ))
    }

    /// Returns true if SMT is enabled.
    pub fn sysfs_smt_enabled() -> std::result::Result<bool, ErrorKind> {
        match Self::read_trimmed(Self::SMT_PATH)?.as_str() {
            "off" | "forceoff" | "notsupported" => Ok(false),
            "on" => Ok(true),
            _ => Err(ErrorKind::InvalidData),
        }
    }

    /// Returns true if userspace may use `rdpmc` on counters it has mapped.
    pub fn sysfs_rdpmc_enabled() -> std::result::Result<bool, ErrorKind> {
        match Self::read_trimmed(Self::RDPMC_PATH)?.as_str() {
            "0" => Ok(false),
            "1" | "2" => Ok(true),
            _ => Err(ErrorKind::InvalidData),
        }
    }

    /// Return the value of `kernel.perf_event_paranoid`.
    pub fn procfs_perf_event_paranoid() -> std::result::Result<i32, ErrorKind> {
        Self::read_trimmed(Self::PARANOID_PATH)?
            .parse().map_err(|_| ErrorKind::InvalidData)
    }

    /// Return the number of online cores.
    pub fn online_cores() -> Option<usize> {
        nix::unistd::sysconf(nix::unistd::SysconfVar::_NPROCESSORS_ONLN)
            .ok().flatten().map(|n| n as usize)
    }
}

impl LeakEnv {
    /// Pin to a particular core.
    pub fn pin_to_core(core: usize) -> Result<()> {
        let this_pid = nix::unistd::Pid::from_raw(0);
        let mut cpuset = nix::sched::CpuSet::new();
        cpuset.set(core).map_err(|errno| LeakError::Affinity { core, errno })?;
        nix::sched::sched_setaffinity(this_pid, &cpuset)
            .map_err(|errno| LeakError::Affinity { core, errno })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pin_out_of_range() {
        assert!(matches!(LeakEnv::pin_to_core(usize::MAX),
            Err(LeakError::Affinity { .. })));
    }
}
