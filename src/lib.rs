//! 写时复制虚拟内存模拟器
//!
//! 模拟一台只有单个处理器的机器：二级页表、带映射计数的物理页帧、
//! 不区分进程的 TLB，以及按需 fork 的进程切换。所有状态都保存在
//! [`Machine`] 中，外部驱动逐条调用它的入口函数。

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod logging;
pub mod machine;
pub mod mm;
pub mod task;
pub mod trace;

pub use config::SimConfig;
pub use error::VmError;
pub use machine::{Machine, MmuStats, SwitchKind};
