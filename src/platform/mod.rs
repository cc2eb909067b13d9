//! 平台：机器清单与主机模型接口

mod machine;
mod model;

pub use machine::{Machine, Machines};
pub use model::{HostModel, ProfileModel};
