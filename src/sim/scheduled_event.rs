//! 调度事件
//!
//! 定义调度事件结构及其优先级比较：时间 → 种类顺序 → 入队序号。

use super::event::Event;
use super::time::SimTime;
use std::cmp::Ordering;

/// 调度事件，包含执行时间、种类优先级、序列号和事件本身。
#[derive(Debug)]
pub struct ScheduledEvent {
    pub at: SimTime,
    pub(crate) rank: u8,
    pub seq: u64,
    pub ev: Event,
}

impl ScheduledEvent {
    fn key(&self) -> (SimTime, u8, u64) {
        (self.at, self.rank, self.seq)
    }
}

// BinaryHeap 是 max-heap；我们需要最小键优先，因此反向比较。
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key()).reverse()
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledEvent {}
