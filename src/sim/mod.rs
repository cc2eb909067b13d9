//! 仿真核心模块
//!
//! 此模块包含离散事件内核的组成部分：仿真时间、事件与事件队列、配置、
//! 输入文件格式，以及驱动整个仿真的 [`Orchestrator`]。

// 子模块声明
mod config;
mod event;
mod orchestrator;
mod queue;
mod scheduled_event;
mod time;
mod workload;

// 重新导出公共接口
pub use config::{EventOrder, SimConfig};
pub use event::{Event, EventKind};
pub use orchestrator::{Orchestrator, Phase, output_path};
pub use queue::EventQueue;
pub use scheduled_event::ScheduledEvent;
pub use time::SimTime;
pub use workload::{
    JobSpec, MachineSpec, PStateSpec, PlatformSpec, TaskSpec, WorkflowSpec, WorkloadSpec,
};
