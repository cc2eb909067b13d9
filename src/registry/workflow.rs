//! 工作流：带依赖边的作业 DAG
//!
//! 任务只在所有前驱都 `Completed` 且在途任务数低于并发上限时才被释放（提交）。
//! 在途 = 已提交但尚未进入终止状态。

use std::collections::HashMap;

use crate::error::{Result, SimError};
use crate::sim::{SimTime, TaskSpec, WorkflowSpec};

use super::job::{JobId, JobSubmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Released,
    Completed,
    /// 被 kill 或 reject；后继永远不可达
    Failed,
}

#[derive(Debug, Clone)]
pub struct WorkflowTask {
    pub name: String,
    pub requested: u32,
    pub runtime: SimTime,
    pub walltime: Option<SimTime>,
    pub after: Vec<usize>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub start_time: SimTime,
    /// 0 表示不限
    pub max_concurrent: usize,
    pub started: bool,
    tasks: Vec<WorkflowTask>,
    /// 拓扑序，构造时校验无环
    topo: Vec<usize>,
}

fn secs(what: &str, s: f64) -> Result<SimTime> {
    SimTime::try_from_secs_f64(s).ok_or_else(|| SimError::Config(format!("invalid {what} {s}")))
}

fn task_from_spec(spec: &TaskSpec) -> Result<WorkflowTask> {
    if spec.res == 0 {
        return Err(SimError::Config(format!(
            "task {} requests no machine",
            spec.id
        )));
    }
    Ok(WorkflowTask {
        name: spec.id.clone(),
        requested: spec.res,
        runtime: secs("runtime", spec.runtime)?,
        walltime: spec.walltime.map(|w| secs("walltime", w)).transpose()?,
        after: Vec::new(),
        status: TaskStatus::Waiting,
    })
}

impl Workflow {
    /// `start_override` replaces the start time written in the file.
    pub fn from_spec(spec: &WorkflowSpec, start_override: Option<f64>) -> Result<Self> {
        if spec.name.is_empty() || spec.name.contains('!') {
            return Err(SimError::Config(format!(
                "invalid workflow name {:?}",
                spec.name
            )));
        }
        let mut index = HashMap::new();
        for (i, t) in spec.tasks.iter().enumerate() {
            if index.insert(t.id.as_str(), i).is_some() {
                return Err(SimError::Config(format!(
                    "workflow {}: duplicate task {}",
                    spec.name, t.id
                )));
            }
        }

        let mut tasks = spec
            .tasks
            .iter()
            .map(task_from_spec)
            .collect::<Result<Vec<_>>>()?;
        for (i, t) in spec.tasks.iter().enumerate() {
            for pred in &t.after {
                let &p = index.get(pred.as_str()).ok_or_else(|| {
                    SimError::Config(format!(
                        "workflow {}: task {} depends on unknown task {pred}",
                        spec.name, t.id
                    ))
                })?;
                tasks[i].after.push(p);
            }
        }

        let topo = topological_order(&tasks).ok_or_else(|| {
            SimError::Config(format!("workflow {} has a dependency cycle", spec.name))
        })?;

        Ok(Self {
            name: spec.name.clone(),
            start_time: secs("start time", start_override.unwrap_or(spec.start_time))?,
            max_concurrent: spec.max_concurrent,
            started: false,
            tasks,
            topo,
        })
    }

    pub fn tasks(&self) -> &[WorkflowTask] {
        &self.tasks
    }

    pub fn job_id(&self, task: usize) -> JobId {
        JobId::new(&self.name, &self.tasks[task].name)
    }

    pub fn in_flight(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Released)
            .count()
    }

    fn has_capacity(&self) -> bool {
        self.max_concurrent == 0 || self.in_flight() < self.max_concurrent
    }

    /// 释放当前可提交的任务（按声明顺序），并标记为 Released
    pub fn release_eligible(&mut self) -> Vec<JobSubmission> {
        let mut out = Vec::new();
        if !self.started {
            return out;
        }
        for i in 0..self.tasks.len() {
            if !self.has_capacity() {
                break;
            }
            let task = &self.tasks[i];
            let ready = task.status == TaskStatus::Waiting
                && task
                    .after
                    .iter()
                    .all(|&p| self.tasks[p].status == TaskStatus::Completed);
            if ready {
                self.tasks[i].status = TaskStatus::Released;
                let task = &self.tasks[i];
                out.push(JobSubmission {
                    id: self.job_id(i),
                    requested: task.requested,
                    runtime: task.runtime,
                    walltime: task.walltime,
                });
            }
        }
        out
    }

    pub fn mark_done(&mut self, task: usize, success: bool) {
        self.tasks[task].status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
    }

    /// 仍在等待、且所有祖先都没有失败的任务数
    pub fn reachable_waiting(&self) -> usize {
        let mut dead = vec![false; self.tasks.len()];
        let mut count = 0;
        for &i in &self.topo {
            let t = &self.tasks[i];
            dead[i] = t.status == TaskStatus::Failed || t.after.iter().any(|&p| dead[p]);
            if t.status == TaskStatus::Waiting && !dead[i] {
                count += 1;
            }
        }
        count
    }

    pub fn has_pending_work(&self) -> bool {
        !self.started || self.reachable_waiting() > 0
    }

    pub fn is_finished(&self) -> bool {
        self.started && self.in_flight() == 0 && self.reachable_waiting() == 0
    }
}

/// Kahn 算法；存在环时返回 None
fn topological_order(tasks: &[WorkflowTask]) -> Option<Vec<usize>> {
    let mut indegree: Vec<usize> = tasks.iter().map(|t| t.after.len()).collect();
    let mut succ = vec![Vec::new(); tasks.len()];
    for (i, t) in tasks.iter().enumerate() {
        for &p in &t.after {
            succ[p].push(i);
        }
    }
    let mut ready: Vec<usize> = (0..tasks.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(i) = ready.pop() {
        order.push(i);
        for &s in &succ[i] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.push(s);
            }
        }
    }
    (order.len() == tasks.len()).then_some(order)
}
