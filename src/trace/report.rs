//! 作业结果与汇总统计输出

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::registry::{JobState, Registry};
use crate::sim::SimTime;

pub const JOBS_CSV_HEADER: &str =
    "job_id,workload,submission_time,requested,state,allocated,starting_time,finish_time,outcome";

/// 按提交顺序写出每个作业的最终记录
pub fn write_jobs_csv<W: Write + ?Sized>(registry: &Registry, out: &mut W) -> io::Result<()> {
    writeln!(out, "{JOBS_CSV_HEADER}")?;
    for job in registry.jobs() {
        let opt = |t: Option<SimTime>| t.map(|t| t.to_string()).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            job.id,
            job.id.workload(),
            job.submitted_at,
            job.requested,
            job.state.as_str(),
            job.allocation,
            opt(job.started_at),
            opt(job.finished_at),
            job.outcome.map(|o| o.as_str()).unwrap_or_default(),
        )?;
    }
    out.flush()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub makespan_s: f64,
    pub nb_jobs: usize,
    pub nb_jobs_completed: usize,
    pub nb_jobs_killed: usize,
    pub nb_jobs_rejected: usize,
    /// 仿真结束时仍未结束的作业
    pub nb_jobs_unfinished: usize,
    pub mean_waiting_time_s: f64,
    pub mean_turnaround_time_s: f64,
    pub consumed_joules: f64,
    pub nb_pstate_changes: usize,
    pub nb_protocol_messages: u64,
    /// 失败时的原因码，成功时为 None
    pub error_reason: Option<String>,
}

impl SimulationReport {
    pub fn collect(
        registry: &Registry,
        makespan: SimTime,
        consumed_joules: f64,
        nb_pstate_changes: usize,
        nb_protocol_messages: u64,
    ) -> Self {
        let mean = |xs: Vec<SimTime>| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().map(|t| t.as_secs_f64()).sum::<f64>() / xs.len() as f64
            }
        };
        let waits = registry.jobs().filter_map(|j| j.waiting_time()).collect();
        let turnarounds = registry
            .jobs()
            .filter(|j| j.started_at.is_some())
            .filter_map(|j| j.turnaround_time())
            .collect();
        let nb_jobs = registry.jobs().count();
        let completed = registry.count_in(JobState::Completed);
        let killed = registry.count_in(JobState::Killed);
        let rejected = registry.count_in(JobState::Rejected);
        Self {
            makespan_s: makespan.as_secs_f64(),
            nb_jobs,
            nb_jobs_completed: completed,
            nb_jobs_killed: killed,
            nb_jobs_rejected: rejected,
            nb_jobs_unfinished: nb_jobs - completed - killed - rejected,
            mean_waiting_time_s: mean(waits),
            mean_turnaround_time_s: mean(turnarounds),
            consumed_joules,
            nb_pstate_changes,
            nb_protocol_messages,
            error_reason: None,
        }
    }
}
