//! 仿真输出
//!
//! - pstate 变化 trace（能耗分析工具依赖它逐字节可复现）
//! - 作业结果 CSV 与汇总统计 JSON

mod pstate;
mod report;

pub use pstate::{PSTATE_CSV_HEADER, PStateChange, PStateTracer};
pub use report::{JOBS_CSV_HEADER, SimulationReport, write_jobs_csv};
