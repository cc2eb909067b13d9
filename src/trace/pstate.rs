//! PState 变化记录
//!
//! 只追加。记录时校验顺序：时间单调不减，同一台机器在同一时刻最多变化一次。
//! flush 只写出尚未写出的记录，所以多次调用不会重复或乱序。

use std::fmt;
use std::io::{self, Write};

use tracing::{debug, error};

use crate::error::{Result, SimError};
use crate::range::MachineRange;
use crate::sim::SimTime;

pub const PSTATE_CSV_HEADER: &str = "time,machine_id,new_pstate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PStateChange {
    pub at: SimTime,
    pub machines: MachineRange,
    pub pstate: u32,
}

impl fmt::Display for PStateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.at, self.machines, self.pstate)
    }
}

#[derive(Default)]
pub struct PStateTracer {
    records: Vec<PStateChange>,
    flushed: usize,
    header_written: bool,
    last_at: Option<SimTime>,
    /// 在 `last_at` 时刻已经变化过的机器
    touched_at_last: MachineRange,
    sink: Option<Box<dyn Write>>,
    flush_every: usize,
}

impl fmt::Debug for PStateTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PStateTracer")
            .field("records", &self.records.len())
            .field("flushed", &self.flushed)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl PStateTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带输出目标的 tracer；每累计 `flush_every` 条未写记录就写一次（0 表示只在最后写）
    pub fn with_sink(sink: Box<dyn Write>, flush_every: usize) -> Self {
        Self {
            sink: Some(sink),
            flush_every,
            ..Self::default()
        }
    }

    pub fn records(&self) -> &[PStateChange] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&mut self, at: SimTime, machines: &MachineRange, pstate: u32) -> Result<()> {
        if machines.is_empty() {
            return Ok(());
        }
        match self.last_at {
            Some(last) if at < last => {
                error!(at = %at, last = %last, machines = %machines, pstate, "pstate change goes back in time");
                return Err(SimError::PStateOrdering {
                    at,
                    machines: machines.clone(),
                });
            }
            Some(last) if at == last => {
                let again = machines.intersection(&self.touched_at_last);
                if !again.is_empty() {
                    error!(
                        at = %at,
                        machines = %again,
                        pstate,
                        touched = %self.touched_at_last,
                        "machine changes pstate twice at the same time"
                    );
                    return Err(SimError::PStateOrdering { at, machines: again });
                }
                self.touched_at_last = self.touched_at_last.union(machines);
            }
            _ => {
                self.last_at = Some(at);
                self.touched_at_last = machines.clone();
            }
        }

        self.records.push(PStateChange {
            at,
            machines: machines.clone(),
            pstate,
        });
        debug!(at = %at, machines = %machines, pstate, "pstate change recorded");

        if self.sink.is_some()
            && self.flush_every > 0
            && self.records.len() - self.flushed >= self.flush_every
        {
            self.flush()?;
        }
        Ok(())
    }

    /// 把未写出的记录追加到 `out`
    pub fn flush_to<W: Write + ?Sized>(&mut self, out: &mut W) -> io::Result<()> {
        if !self.header_written {
            writeln!(out, "{PSTATE_CSV_HEADER}")?;
            self.header_written = true;
        }
        while let Some(rec) = self.records.get(self.flushed) {
            writeln!(out, "{rec}")?;
            self.flushed += 1;
        }
        out.flush()
    }

    /// 写入自带的 sink；没有 sink 时什么都不做
    pub fn flush(&mut self) -> Result<()> {
        if let Some(mut sink) = self.sink.take() {
            let res = self.flush_to(sink.as_mut());
            self.sink = Some(sink);
            res?;
        }
        Ok(())
    }

    /// 全部记录的 CSV 文本（与 flush 的输出逐字节一致）
    pub fn to_csv(&self) -> String {
        let mut out = format!("{PSTATE_CSV_HEADER}\n");
        for rec in &self.records {
            out.push_str(&rec.to_string());
            out.push('\n');
        }
        out
    }
}
