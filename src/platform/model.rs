//! Host model: the physical-simulation capability the kernel calls into.

use std::collections::BTreeMap;

use crate::range::MachineRange;
use crate::registry::Job;
use crate::sim::{PStateSpec, PlatformSpec, SimTime};

/// Execution time and power draw are delegated to an implementation of this
/// trait; the kernel never computes them itself.
pub trait HostModel {
    /// Simulated duration of `job` on `alloc`, before any walltime cut.
    fn execution_time(&self, job: &Job, alloc: &MachineRange) -> SimTime;

    /// Instantaneous power of one machine in `pstate`.
    fn power_watts(&self, pstate: u32, busy: bool) -> f64;
}

/// 直接使用作业声明的 runtime；功率来自平台的 pstate 表
#[derive(Debug, Clone, Default)]
pub struct ProfileModel {
    pstates: BTreeMap<u32, PStateSpec>,
}

impl ProfileModel {
    pub fn from_platform(platform: &PlatformSpec) -> Self {
        Self {
            pstates: platform.pstates.iter().map(|p| (p.id, *p)).collect(),
        }
    }
}

impl HostModel for ProfileModel {
    fn execution_time(&self, job: &Job, _alloc: &MachineRange) -> SimTime {
        job.runtime
    }

    fn power_watts(&self, pstate: u32, busy: bool) -> f64 {
        self.pstates.get(&pstate).map_or(0.0, |p| {
            if busy {
                p.watts_busy
            } else {
                p.watts_idle
            }
        })
    }
}
