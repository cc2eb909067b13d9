//! 事件
//!
//! 封闭的事件枚举：新增种类时 `match` 会在编译期提醒所有处理点。

use serde::{Deserialize, Serialize};

use crate::protocol::Decision;
use crate::registry::{JobId, JobOutcome, JobSubmission};

/// 事件种类；同一时刻的事件按 [`EventOrder`](super::EventOrder) 给出的种类顺序处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobArrival,
    JobCompletion,
    WorkflowTrigger,
    RequestedCall,
    DecisionMakerReply,
    SimulationEnd,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::JobArrival,
        EventKind::JobCompletion,
        EventKind::WorkflowTrigger,
        EventKind::RequestedCall,
        EventKind::DecisionMakerReply,
        EventKind::SimulationEnd,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            EventKind::JobArrival => 0,
            EventKind::JobCompletion => 1,
            EventKind::WorkflowTrigger => 2,
            EventKind::RequestedCall => 3,
            EventKind::DecisionMakerReply => 4,
            EventKind::SimulationEnd => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// 工作负载中的作业到达
    JobArrival(JobSubmission),
    /// 作业运行结束（正常完成或 walltime 到期）
    JobCompletion { job_id: JobId, outcome: JobOutcome },
    /// 工作流到达开始时间
    WorkflowTrigger { workflow: String },
    /// CALL_ME_LATER 到期
    RequestedCall,
    /// 决策者的一批决策，在回复时间点按顺序执行
    DecisionMakerReply { decisions: Vec<Decision> },
    /// 配置的仿真时间上限
    SimulationEnd,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::JobArrival(_) => EventKind::JobArrival,
            Event::JobCompletion { .. } => EventKind::JobCompletion,
            Event::WorkflowTrigger { .. } => EventKind::WorkflowTrigger,
            Event::RequestedCall => EventKind::RequestedCall,
            Event::DecisionMakerReply { .. } => EventKind::DecisionMakerReply,
            Event::SimulationEnd => EventKind::SimulationEnd,
        }
    }
}
