//! 区间集合实现
//!
//! 点操作通过二分查找定位区间（O(log k)），集合间操作是一次线性归并（O(k)），
//! k 为区间个数而不是机器个数。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SimError;

pub type MachineId = u32;

/// 有序机器集合。不变式：区间按起点升序、互不重叠、也不相邻（相邻即合并）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MachineRange {
    intervals: Vec<(MachineId, MachineId)>,
}

impl MachineRange {
    pub fn new() -> Self {
        Self::default()
    }

    /// 闭区间 `[lo, hi]`；`lo > hi` 时返回空集合
    pub fn from_interval(lo: MachineId, hi: MachineId) -> Self {
        if lo > hi {
            return Self::default();
        }
        Self {
            intervals: vec![(lo, hi)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// 机器个数
    pub fn size(&self) -> usize {
        self.intervals
            .iter()
            .map(|&(lo, hi)| (hi - lo) as usize + 1)
            .sum()
    }

    pub fn intervals(&self) -> &[(MachineId, MachineId)] {
        &self.intervals
    }

    pub fn first(&self) -> Option<MachineId> {
        self.intervals.first().map(|&(lo, _)| lo)
    }

    pub fn last(&self) -> Option<MachineId> {
        self.intervals.last().map(|&(_, hi)| hi)
    }

    /// 第一个 `hi >= id` 的区间下标
    fn locate(&self, id: MachineId) -> usize {
        self.intervals.partition_point(|&(_, hi)| hi < id)
    }

    pub fn contains(&self, id: MachineId) -> bool {
        let idx = self.locate(id);
        self.intervals
            .get(idx)
            .is_some_and(|&(lo, hi)| lo <= id && id <= hi)
    }

    /// In-place insertion. Inserting an existing id is a no-op.
    pub fn insert(&mut self, id: MachineId) {
        let idx = self.locate(id);
        if let Some(&(lo, _)) = self.intervals.get(idx) {
            if lo <= id {
                return;
            }
        }

        let joins_prev = idx > 0 && self.intervals[idx - 1].1.checked_add(1) == Some(id);
        let joins_next = self
            .intervals
            .get(idx)
            .is_some_and(|&(lo, _)| id.checked_add(1) == Some(lo));

        match (joins_prev, joins_next) {
            (true, true) => {
                let hi = self.intervals[idx].1;
                self.intervals[idx - 1].1 = hi;
                self.intervals.remove(idx);
            }
            (true, false) => self.intervals[idx - 1].1 = id,
            (false, true) => self.intervals[idx].0 = id,
            (false, false) => self.intervals.insert(idx, (id, id)),
        }
    }

    /// In-place removal. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: MachineId) {
        let idx = self.locate(id);
        let Some(&(lo, hi)) = self.intervals.get(idx) else {
            return;
        };
        if id < lo {
            return;
        }
        match (lo == id, hi == id) {
            (true, true) => {
                self.intervals.remove(idx);
            }
            (true, false) => self.intervals[idx].0 = id + 1,
            (false, true) => self.intervals[idx].1 = id - 1,
            (false, false) => {
                self.intervals[idx].1 = id - 1;
                self.intervals.insert(idx + 1, (id + 1, hi));
            }
        }
    }

    /// 追加一个区间，调用方保证 `lo` 不小于已有的最大值（归并时使用）
    fn push_merging(&mut self, lo: MachineId, hi: MachineId) {
        if let Some(last) = self.intervals.last_mut() {
            if last.1.checked_add(1).is_none_or(|next| lo <= next) {
                last.1 = last.1.max(hi);
                return;
            }
        }
        self.intervals.push((lo, hi));
    }

    pub fn union(&self, other: &MachineRange) -> MachineRange {
        let mut out = MachineRange {
            intervals: Vec::with_capacity(self.intervals.len() + other.intervals.len()),
        };
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() || j < other.intervals.len() {
            let take_left = match (self.intervals.get(i), other.intervals.get(j)) {
                (Some(a), Some(b)) => a.0 <= b.0,
                (Some(_), None) => true,
                _ => false,
            };
            let (lo, hi) = if take_left {
                i += 1;
                self.intervals[i - 1]
            } else {
                j += 1;
                other.intervals[j - 1]
            };
            out.push_merging(lo, hi);
        }
        out
    }

    pub fn intersection(&self, other: &MachineRange) -> MachineRange {
        let mut out = MachineRange::default();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let (alo, ahi) = self.intervals[i];
            let (blo, bhi) = other.intervals[j];
            let lo = alo.max(blo);
            let hi = ahi.min(bhi);
            if lo <= hi {
                out.intervals.push((lo, hi));
            }
            if ahi < bhi {
                i += 1;
            } else {
                j += 1;
            }
        }
        out
    }

    pub fn difference(&self, other: &MachineRange) -> MachineRange {
        let mut out = MachineRange::default();
        let mut j = 0;
        for &(lo, hi) in &self.intervals {
            let mut cur = lo;
            let mut exhausted = false;
            while j < other.intervals.len() && other.intervals[j].1 < cur {
                j += 1;
            }
            let mut k = j;
            while let Some(&(blo, bhi)) = other.intervals.get(k) {
                if blo > hi {
                    break;
                }
                if blo > cur {
                    out.intervals.push((cur, blo - 1));
                }
                match bhi.checked_add(1) {
                    Some(next) if bhi < hi => cur = next,
                    _ => {
                        exhausted = true;
                        break;
                    }
                }
                k += 1;
            }
            if !exhausted {
                out.intervals.push((cur, hi));
            }
        }
        out
    }

    pub fn overlaps(&self, other: &MachineRange) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MachineId> + '_ {
        self.intervals.iter().flat_map(|&(lo, hi)| lo..=hi)
    }

    pub fn to_vec(&self) -> Vec<MachineId> {
        self.iter().collect()
    }
}

impl FromIterator<MachineId> for MachineRange {
    fn from_iter<T: IntoIterator<Item = MachineId>>(iter: T) -> Self {
        let mut ids: Vec<MachineId> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let mut out = MachineRange::default();
        for id in ids {
            out.push_merging(id, id);
        }
        out
    }
}

/// 文本形式："0-3 5 7-8"
impl fmt::Display for MachineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(lo, hi)) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for MachineRange {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| SimError::RangeParse {
            text: s.to_string(),
            reason: reason.to_string(),
        };
        let mut out = MachineRange::default();
        for part in s.split_whitespace() {
            let (lo, hi) = match part.split_once('-') {
                Some((a, b)) => (a, b),
                None => (part, part),
            };
            let lo: MachineId = lo.parse().map_err(|_| bad("not a machine id"))?;
            let hi: MachineId = hi.parse().map_err(|_| bad("not a machine id"))?;
            if lo > hi {
                return Err(bad("reversed interval"));
            }
            out = out.union(&MachineRange::from_interval(lo, hi));
        }
        Ok(out)
    }
}

impl Serialize for MachineRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MachineRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
