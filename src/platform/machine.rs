//! 机器清单
//!
//! 机器在仿真开始时创建，之后只修改 pstate 和占用情况，从不销毁。

use std::collections::BTreeSet;

use tracing::{error, trace};

use crate::error::{Result, SimError};
use crate::range::{MachineId, MachineRange};
use crate::registry::JobId;
use crate::sim::{PlatformSpec, SimTime};

use super::model::HostModel;

#[derive(Debug, Clone)]
pub struct Machine {
    pub id: MachineId,
    pub name: String,
    pub pstate: u32,
    pub occupants: Vec<JobId>,
    pub energy_joules: f64,
    last_update: SimTime,
}

impl Machine {
    pub fn is_busy(&self) -> bool {
        !self.occupants.is_empty()
    }

    /// 把 `last_update..now` 的能耗累加进来
    fn account(&mut self, now: SimTime, model: &dyn HostModel) {
        let dt = now.saturating_sub(self.last_update).as_secs_f64();
        self.energy_joules += model.power_watts(self.pstate, self.is_busy()) * dt;
        self.last_update = now;
    }
}

#[derive(Debug, Clone)]
pub struct Machines {
    machines: Vec<Machine>,
    usable: MachineRange,
    /// 被至少一个作业占用的机器
    busy: MachineRange,
    /// 空表示不校验 pstate 编号
    known_pstates: BTreeSet<u32>,
    allow_time_sharing: bool,
}

impl Machines {
    pub fn new(platform: &PlatformSpec, limit: Option<u32>, allow_time_sharing: bool) -> Result<Self> {
        platform.validate()?;
        let names = platform.machine_names()?;
        let machines: Vec<Machine> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Machine {
                id: i as MachineId,
                name,
                pstate: platform.initial_pstate,
                occupants: Vec::new(),
                energy_joules: 0.0,
                last_update: SimTime::ZERO,
            })
            .collect();
        let count = machines.len() as u32;
        let usable_count = limit.map_or(count, |l| l.min(count));
        Ok(Self {
            machines,
            usable: MachineRange::from_interval(0, usable_count.saturating_sub(1)),
            busy: MachineRange::default(),
            known_pstates: platform.pstates.iter().map(|p| p.id).collect(),
            allow_time_sharing,
        })
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn usable(&self) -> &MachineRange {
        &self.usable
    }

    pub fn busy(&self) -> &MachineRange {
        &self.busy
    }

    pub fn get(&self, id: MachineId) -> Option<&Machine> {
        self.machines.get(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Machine> + '_ {
        self.machines.iter()
    }

    pub fn allow_time_sharing(&self) -> bool {
        self.allow_time_sharing
    }

    /// 校验分配：必须落在可用机器内，且不与已占用机器重叠（除非允许分时）
    pub fn check_allocation(&self, job: &JobId, alloc: &MachineRange) -> Result<()> {
        let outside = alloc.difference(&self.usable);
        if !outside.is_empty() {
            return Err(SimError::InvalidDecision(format!(
                "job {job} allocated to unusable machines {outside}"
            )));
        }
        if self.allow_time_sharing {
            return Ok(());
        }
        let conflict = alloc.intersection(&self.busy);
        if !conflict.is_empty() {
            let occupants: Vec<(MachineId, &[JobId])> = conflict
                .iter()
                .map(|id| (id, self.machines[id as usize].occupants.as_slice()))
                .collect();
            error!(
                job = %job,
                alloc = %alloc,
                busy = %self.busy,
                ?occupants,
                "allocation conflict"
            );
            return Err(SimError::AllocationConflict {
                job: job.to_string(),
                machines: conflict,
            });
        }
        Ok(())
    }

    pub fn occupy(&mut self, job: &JobId, alloc: &MachineRange, now: SimTime, model: &dyn HostModel) {
        for id in alloc.iter() {
            let m = &mut self.machines[id as usize];
            m.account(now, model);
            m.occupants.push(job.clone());
        }
        self.busy = self.busy.union(alloc);
        trace!(job = %job, alloc = %alloc, busy = %self.busy, "machines occupied");
    }

    pub fn release(&mut self, job: &JobId, alloc: &MachineRange, now: SimTime, model: &dyn HostModel) {
        for id in alloc.iter() {
            let m = &mut self.machines[id as usize];
            m.account(now, model);
            m.occupants.retain(|j| j != job);
            if m.occupants.is_empty() {
                self.busy.remove(id);
            }
        }
        trace!(job = %job, alloc = %alloc, busy = %self.busy, "machines released");
    }

    /// pstate 编号必须在平台表中（表为空时不校验），机器必须存在
    pub fn check_pstate(&self, range: &MachineRange, pstate: u32) -> Result<()> {
        if !self.known_pstates.is_empty() && !self.known_pstates.contains(&pstate) {
            return Err(SimError::InvalidDecision(format!("unknown pstate {pstate}")));
        }
        let all = MachineRange::from_interval(0, self.machines.len() as MachineId - 1);
        let outside = range.difference(&all);
        if !outside.is_empty() {
            return Err(SimError::InvalidDecision(format!(
                "pstate change on unknown machines {outside}"
            )));
        }
        Ok(())
    }

    /// 调用前先 [`Machines::check_pstate`]
    pub fn set_pstate(&mut self, range: &MachineRange, pstate: u32, now: SimTime, model: &dyn HostModel) {
        for id in range.iter() {
            if let Some(m) = self.machines.get_mut(id as usize) {
                m.account(now, model);
                m.pstate = pstate;
            }
        }
        trace!(machines = %range, pstate, "pstate changed");
    }

    /// 仿真结束时结算所有机器的能耗
    pub fn settle_energy(&mut self, now: SimTime, model: &dyn HostModel) -> f64 {
        self.machines
            .iter_mut()
            .map(|m| {
                m.account(now, model);
                m.energy_joules
            })
            .sum()
    }
}
