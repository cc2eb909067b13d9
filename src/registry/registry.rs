//! 作业 / 工作流登记表
//!
//! 持有所有已提交作业的状态机，以及工作流的依赖推进。只由内核线程修改。

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::error::{Result, SimError};
use crate::range::MachineRange;
use crate::sim::SimTime;

use super::job::{Job, JobId, JobOutcome, JobState, JobSubmission, RejectReason};
use super::workflow::Workflow;

/// 提交的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 进入 Submitted，需要报告给决策者
    Submitted,
    /// 请求的机器数超过可用上限，直接 Rejected
    TooLarge,
    /// 最后一个工作流已结束，之后的提交被忽略
    Ignored,
}

#[derive(Debug, Default)]
pub struct Registry {
    usable_machines: u32,
    jobs: HashMap<JobId, Job>,
    /// 提交顺序，用于确定性输出
    order: Vec<JobId>,
    declared: HashSet<JobId>,
    workflows: Vec<Workflow>,
    /// 工作流任务 -> (工作流下标, 任务下标)
    workflow_tasks: HashMap<JobId, (usize, usize)>,
    pending_arrivals: usize,
    terminate_with_last_workflow: bool,
    arrivals_ignored: bool,
}

impl Registry {
    pub fn new(usable_machines: u32, terminate_with_last_workflow: bool) -> Self {
        Self {
            usable_machines,
            terminate_with_last_workflow,
            ..Self::default()
        }
    }

    pub fn usable_machines(&self) -> u32 {
        self.usable_machines
    }

    /// 登记一个将在未来到达的工作负载作业
    pub fn declare_arrival(&mut self, id: &JobId) -> Result<()> {
        if !self.declared.insert(id.clone()) {
            return Err(SimError::Config(format!("duplicate job id {id}")));
        }
        self.pending_arrivals += 1;
        Ok(())
    }

    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<()> {
        if self.workflows.iter().any(|w| w.name == workflow.name) {
            return Err(SimError::Config(format!(
                "duplicate workflow {}",
                workflow.name
            )));
        }
        let wf_idx = self.workflows.len();
        for task in 0..workflow.tasks().len() {
            let id = workflow.job_id(task);
            if !self.declared.insert(id.clone()) {
                return Err(SimError::Config(format!("duplicate job id {id}")));
            }
            self.workflow_tasks.insert(id, (wf_idx, task));
        }
        self.workflows.push(workflow);
        Ok(())
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    /// 工作负载作业到达
    pub fn arrive(&mut self, sub: &JobSubmission, now: SimTime) -> Admission {
        self.pending_arrivals = self.pending_arrivals.saturating_sub(1);
        if self.arrivals_ignored {
            debug!(job = %sub.id, "arrival ignored after the last workflow");
            return Admission::Ignored;
        }
        self.submit(sub, now)
    }

    fn submit(&mut self, sub: &JobSubmission, now: SimTime) -> Admission {
        let mut job = Job::new(sub, now);
        let admission = if job.requested > self.usable_machines {
            info!(
                job = %job.id,
                requested = job.requested,
                usable = self.usable_machines,
                "job requests more machines than available, rejected"
            );
            job.state = JobState::Rejected;
            job.outcome = Some(JobOutcome::Rejected(RejectReason::TooLarge));
            job.finished_at = Some(now);
            Admission::TooLarge
        } else {
            Admission::Submitted
        };
        self.order.push(job.id.clone());
        self.jobs.insert(job.id.clone(), job);
        admission
    }

    /// 工作流开始：返回首批可提交的任务
    pub fn start_workflow(
        &mut self,
        name: &str,
        now: SimTime,
    ) -> Result<Vec<(JobSubmission, Admission)>> {
        let idx = self
            .workflows
            .iter()
            .position(|w| w.name == name)
            .ok_or_else(|| SimError::Config(format!("unknown workflow {name}")))?;
        self.workflows[idx].started = true;
        info!(workflow = name, "workflow started");
        Ok(self.release_workflow(idx, now))
    }

    /// 反复释放直到没有新任务（过大的任务会立即失败并可能腾出并发名额）
    fn release_workflow(&mut self, idx: usize, now: SimTime) -> Vec<(JobSubmission, Admission)> {
        let mut out = Vec::new();
        loop {
            let subs = self.workflows[idx].release_eligible();
            if subs.is_empty() {
                break;
            }
            for sub in subs {
                let admission = self.submit(&sub, now);
                if admission == Admission::TooLarge {
                    if let Some(&(_, task)) = self.workflow_tasks.get(&sub.id) {
                        self.workflows[idx].mark_done(task, false);
                    }
                }
                out.push((sub, admission));
            }
        }
        self.check_workflow_finished(idx);
        out
    }

    fn check_workflow_finished(&mut self, idx: usize) {
        if !self.workflows[idx].is_finished() {
            return;
        }
        debug!(workflow = %self.workflows[idx].name, "workflow finished");
        if self.terminate_with_last_workflow
            && !self.arrivals_ignored
            && self.workflows.iter().all(Workflow::is_finished)
        {
            info!("last workflow finished, ignoring further job submissions");
            self.arrivals_ignored = true;
        }
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    fn job_mut(&mut self, id: &JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| SimError::UnknownJob(id.to_string()))
    }

    /// Submitted -> Allocated
    pub fn allocate(&mut self, id: &JobId, alloc: &MachineRange) -> Result<()> {
        let job = self.job_mut(id)?;
        job.transition(JobState::Allocated)?;
        job.allocation = alloc.clone();
        Ok(())
    }

    /// Allocated -> Running
    pub fn start(&mut self, id: &JobId, now: SimTime) -> Result<()> {
        let job = self.job_mut(id)?;
        job.transition(JobState::Running)?;
        job.started_at = Some(now);
        Ok(())
    }

    /// Submitted -> Rejected (decision-maker refusal)
    pub fn reject(&mut self, id: &JobId, now: SimTime) -> Result<Vec<(JobSubmission, Admission)>> {
        let job = self.job_mut(id)?;
        job.transition(JobState::Rejected)?;
        job.outcome = Some(JobOutcome::Rejected(RejectReason::Decision));
        job.finished_at = Some(now);
        Ok(self.on_terminal(id, false, now))
    }

    /// Running -> Completed | Killed. Returns the newly released workflow tasks.
    pub fn finish(
        &mut self,
        id: &JobId,
        outcome: JobOutcome,
        now: SimTime,
    ) -> Result<Vec<(JobSubmission, Admission)>> {
        let job = self.job_mut(id)?;
        job.transition(outcome.state())?;
        job.outcome = Some(outcome);
        job.finished_at = Some(now);
        Ok(self.on_terminal(id, outcome == JobOutcome::Success, now))
    }

    fn on_terminal(&mut self, id: &JobId, success: bool, now: SimTime) -> Vec<(JobSubmission, Admission)> {
        let Some(&(idx, task)) = self.workflow_tasks.get(id) else {
            return Vec::new();
        };
        self.workflows[idx].mark_done(task, success);
        self.release_workflow(idx, now)
    }

    pub fn arrivals_ignored(&self) -> bool {
        self.arrivals_ignored
    }

    /// 还有需要决策者参与的工作：未到达的作业、未分配的作业、可达的工作流任务
    pub fn has_pending_work(&self) -> bool {
        (self.pending_arrivals > 0 && !self.arrivals_ignored)
            || self
                .jobs
                .values()
                .any(|j| matches!(j.state, JobState::Submitted | JobState::Allocated))
            || self.workflows.iter().any(Workflow::has_pending_work)
    }

    pub fn running_jobs(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Running)
            .count()
    }

    /// 按提交顺序遍历作业
    pub fn jobs(&self) -> impl Iterator<Item = &Job> + '_ {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    pub fn count_in(&self, state: JobState) -> usize {
        self.jobs.values().filter(|j| j.state == state).count()
    }
}
