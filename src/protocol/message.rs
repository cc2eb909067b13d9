//! 协议消息
//!
//! 每条消息是一个信封：当前仿真时间（秒）+ 有序事件 / 决策列表。
//! 事件与决策都序列化为 `{"type": "...", "data": {...}}`。

use serde::{Deserialize, Serialize};

use crate::range::MachineRange;
use crate::registry::JobId;

pub const PROTOCOL_VERSION: &str = "rjmsim/1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub now: f64,
    #[serde(default = "Vec::new")]
    pub events: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: u32,
    pub name: String,
    pub pstate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub id: JobId,
    pub res: u32,
    pub subtime: f64,
    #[serde(default)]
    pub walltime: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionState {
    CompletedSuccessfully,
    CompletedKilled,
    CompletedWalltimeReached,
}

/// 内核 -> 决策者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimEvent {
    SimulationBegins {
        protocol_version: String,
        nb_resources: u32,
        allow_time_sharing: bool,
        resources: Vec<ResourceInfo>,
    },
    JobSubmitted {
        job_id: JobId,
        job: JobDescription,
    },
    JobCompleted {
        job_id: JobId,
        job_state: CompletionState,
        alloc: MachineRange,
    },
    JobKilled {
        job_ids: Vec<JobId>,
    },
    RequestedCall,
    SimulationEnds,
}

/// 决策者 -> 内核
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// 只允许出现在握手回复的第一条
    Hello { protocol_version: String },
    ExecuteJob { job_id: JobId, alloc: MachineRange },
    RejectJob { job_id: JobId },
    KillJob { job_ids: Vec<JobId> },
    SetPstate { machines: MachineRange, pstate: u32 },
    CallMeLater { timestamp: f64 },
    Finished,
}
