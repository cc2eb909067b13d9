//! 请求 / 应答会话
//!
//! 同一时刻最多一条未应答的请求；请求时间单调不减；应答时间不得早于请求时间；
//! 之后的请求也不得早于上一条应答的时间。

use std::time::Duration;

use tracing::{debug, warn};

use super::codec::{decode, encode};
use super::message::{Decision, Envelope, PROTOCOL_VERSION, ResourceInfo, SimEvent};
use super::transport::Transport;
use crate::error::{Result, SimError};
use crate::sim::SimTime;

/// 一次应答：决策生效的仿真时间 + 有序决策
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub at: SimTime,
    pub decisions: Vec<Decision>,
}

#[derive(Debug)]
pub struct ProtocolSession<T> {
    transport: T,
    timeout: Duration,
    pending: Option<SimTime>,
    last_sent: Option<SimTime>,
    last_reply: Option<SimTime>,
    messages: u64,
}

impl<T: Transport> ProtocolSession<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            pending: None,
            last_sent: None,
            last_reply: None,
            messages: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 已完成的请求 / 应答往返次数
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// 下一条请求允许的最早时间：上一条请求和上一条应答中较晚的那个
    pub fn horizon(&self) -> SimTime {
        self.last_sent
            .into_iter()
            .chain(self.last_reply)
            .max()
            .unwrap_or(SimTime::ZERO)
    }

    pub fn send(&mut self, now: SimTime, events: Vec<SimEvent>) -> Result<()> {
        if self.pending.is_some() {
            return Err(SimError::RequestPending);
        }
        let min = self.horizon();
        if now < min {
            return Err(SimError::BackwardTime { got: now, min });
        }
        let envelope = Envelope {
            now: now.as_secs_f64(),
            events,
        };
        debug!(now = %now, nb_events = envelope.events.len(), "sending message to the decision-maker");
        self.transport.send(encode(&envelope)?)?;
        self.pending = Some(now);
        self.last_sent = Some(now);
        Ok(())
    }

    /// 唯一的挂起点：等待与最近一次请求匹配的应答
    pub fn wait_reply(&mut self) -> Result<Reply> {
        let sent_at = self.pending.ok_or(SimError::NoPendingRequest)?;
        let frame = self.transport.recv(self.timeout)?;
        let envelope: Envelope<Decision> = decode(&frame)?;
        let at = SimTime::try_from_secs_f64(envelope.now).ok_or_else(|| {
            SimError::MalformedMessage(format!("invalid reply time {}", envelope.now))
        })?;
        if at < sent_at {
            return Err(SimError::BackwardTime {
                got: at,
                min: sent_at,
            });
        }
        self.pending = None;
        self.last_reply = Some(at);
        self.messages += 1;
        debug!(at = %at, nb_decisions = envelope.events.len(), "reply received");
        Ok(Reply {
            at,
            decisions: envelope.events,
        })
    }

    pub fn request(&mut self, now: SimTime, events: Vec<SimEvent>) -> Result<Reply> {
        self.send(now, events)?;
        self.wait_reply()
    }

    /// 开场握手：发送 SIMULATION_BEGINS，应答的第一条决策必须是版本一致的 HELLO。
    /// 返回握手应答中剩余的决策。
    pub fn handshake(
        &mut self,
        resources: Vec<ResourceInfo>,
        nb_resources: u32,
        allow_time_sharing: bool,
    ) -> Result<Reply> {
        let begins = SimEvent::SimulationBegins {
            protocol_version: PROTOCOL_VERSION.to_string(),
            nb_resources,
            allow_time_sharing,
            resources,
        };
        let mut reply = self.request(SimTime::ZERO, vec![begins])?;
        if reply.decisions.is_empty() {
            return Err(SimError::HandshakeMissing);
        }
        match reply.decisions.remove(0) {
            Decision::Hello { protocol_version } if protocol_version == PROTOCOL_VERSION => {
                debug!(version = %protocol_version, "handshake complete");
                Ok(reply)
            }
            Decision::Hello { protocol_version } => {
                warn!(expected = PROTOCOL_VERSION, got = %protocol_version, "protocol version mismatch");
                Err(SimError::VersionMismatch {
                    expected: PROTOCOL_VERSION.to_string(),
                    got: protocol_version,
                })
            }
            _ => Err(SimError::HandshakeMissing),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
