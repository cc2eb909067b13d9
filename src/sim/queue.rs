//! 事件队列
//!
//! 维护当前仿真时间与按 (时间, 种类, 序号) 排序的事件堆。

use super::config::EventOrder;
use super::event::{Event, EventKind};
use super::scheduled_event::ScheduledEvent;
use super::time::SimTime;
use crate::registry::JobId;
use std::collections::BinaryHeap;
use tracing::{debug, trace};

#[derive(Debug, Default)]
pub struct EventQueue {
    now: SimTime,
    next_seq: u64,
    order: EventOrder,
    q: BinaryHeap<ScheduledEvent>,
}

impl EventQueue {
    pub fn new(order: EventOrder) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// 调度事件在指定时间执行；早于当前时间的请求被钳到 `now`。
    #[tracing::instrument(skip(self, ev), fields(kind = ?ev.kind(), schedule_at = %at))]
    pub fn schedule(&mut self, at: SimTime, ev: Event) {
        debug_assert!(at >= self.now, "scheduling into the past");
        let at = at.max(self.now);
        let seq = self.next_seq;
        trace!(now = %self.now, seq, "调度事件");

        self.next_seq = self.next_seq.wrapping_add(1);
        self.q.push(ScheduledEvent {
            at,
            rank: self.order.rank(ev.kind()),
            seq,
            ev,
        });

        debug!(queue_size = self.q.len(), "事件已加入队列");
    }

    /// 弹出最早的事件并推进时间
    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        let item = self.q.pop()?;
        self.now = item.at;
        Some(item)
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.q.peek().map(|item| item.at)
    }

    /// 是否还有与当前时间相同的事件
    pub fn has_event_at_now(&self) -> bool {
        self.peek_time() == Some(self.now)
    }

    /// 丢弃指定种类的全部事件
    pub fn discard(&mut self, kind: EventKind) -> usize {
        let before = self.q.len();
        self.q.retain(|item| item.ev.kind() != kind);
        before - self.q.len()
    }

    /// 取消作业尚未发生的完成事件（作业已被 kill）
    pub fn cancel_completion(&mut self, job: &JobId) -> bool {
        let before = self.q.len();
        self.q.retain(
            |item| !matches!(&item.ev, Event::JobCompletion { job_id, .. } if job_id == job),
        );
        before != self.q.len()
    }

    pub fn clear(&mut self) {
        self.q.clear();
    }
}
