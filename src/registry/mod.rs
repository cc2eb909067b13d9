//! 作业 / 工作流登记表模块

mod job;
mod registry;
mod workflow;

pub use job::{Job, JobId, JobOutcome, JobState, JobSubmission, KillReason, RejectReason};
pub use registry::{Admission, Registry};
pub use workflow::{TaskStatus, Workflow, WorkflowTask};
