//! 仿真配置

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::event::EventKind;
use super::time::SimTime;
use crate::error::{Result, SimError};

/// 同一时刻不同种类事件的处理顺序，必须是 [`EventKind::ALL`] 的一个排列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EventKind>", into = "Vec<EventKind>")]
pub struct EventOrder {
    kinds: [EventKind; 6],
}

impl EventOrder {
    pub fn new(kinds: Vec<EventKind>) -> Result<Self> {
        let mut seen = [false; 6];
        for kind in &kinds {
            if std::mem::replace(&mut seen[kind.index()], true) {
                return Err(SimError::Config(format!(
                    "event kind {kind:?} listed twice in event order"
                )));
            }
        }
        let kinds: [EventKind; 6] = kinds.try_into().map_err(|v: Vec<EventKind>| {
            SimError::Config(format!(
                "event order must list all {} kinds, got {}",
                EventKind::ALL.len(),
                v.len()
            ))
        })?;
        Ok(Self { kinds })
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    pub fn rank(&self, kind: EventKind) -> u8 {
        self.kinds
            .iter()
            .position(|k| *k == kind)
            .map_or(u8::MAX, |p| p as u8)
    }
}

/// 到达 → 完成 → 工作流触发 → 回调 → 决策 → 结束
impl Default for EventOrder {
    fn default() -> Self {
        Self {
            kinds: EventKind::ALL,
        }
    }
}

impl TryFrom<Vec<EventKind>> for EventOrder {
    type Error = SimError;

    fn try_from(kinds: Vec<EventKind>) -> Result<Self> {
        Self::new(kinds)
    }
}

impl From<EventOrder> for Vec<EventKind> {
    fn from(order: EventOrder) -> Self {
        order.kinds.to_vec()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// 允许多个作业同时占用同一台机器
    pub allow_time_sharing: bool,
    /// 只使用前 N 台机器计算；None 表示全部
    pub limit_machines: Option<u32>,
    /// 最后一个工作流结束后忽略之后的作业提交
    pub terminate_with_last_workflow: bool,
    /// 等待决策者回复的墙钟超时（毫秒）
    pub reply_timeout_ms: u64,
    pub event_order: EventOrder,
    /// 仿真时间上限（秒）
    pub max_simulated_time_s: Option<f64>,
    /// 每累计多少条 pstate 记录写一次 trace 文件
    pub trace_flush_every: usize,
    /// 输出文件前缀，例如 `out/run1_`；None 表示只保存在内存
    pub export_prefix: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            allow_time_sharing: false,
            limit_machines: None,
            terminate_with_last_workflow: false,
            reply_timeout_ms: 30_000,
            event_order: EventOrder::default(),
            max_simulated_time_s: None,
            trace_flush_every: 4096,
            export_prefix: None,
        }
    }
}

impl SimConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn max_simulated_time(&self) -> Result<Option<SimTime>> {
        self.max_simulated_time_s
            .map(|s| {
                SimTime::try_from_secs_f64(s).ok_or_else(|| {
                    SimError::Config(format!("invalid max simulated time {s}"))
                })
            })
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        if self.reply_timeout_ms == 0 {
            return Err(SimError::Config("reply timeout must be positive".into()));
        }
        if self.limit_machines == Some(0) {
            return Err(SimError::Config("limit_machines must be positive".into()));
        }
        self.max_simulated_time()?;
        Ok(())
    }
}
