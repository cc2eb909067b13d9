//! 机器集合（Resource Range）
//!
//! 以有序、不相交、不相邻的闭区间数组表示一组机器编号。

mod machine_range;

pub use machine_range::{MachineId, MachineRange};
