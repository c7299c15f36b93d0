// 进程管理实现
// 模拟器中同一时刻至多有一个进程处于运行状态，由 [`Processor`] 记录；
// 其余进程都在 [`TaskManager`] 的等待队列中。进程切换与按需 fork 在
// [`crate::machine::Machine::switch_to`] 中完成。

mod manager; // 等待队列模块
mod processor; // 处理器模块
#[allow(clippy::module_inception)]
mod task; // 任务模块

pub use manager::TaskManager; // 导出等待队列
pub use processor::Processor; // 导出处理器
pub use task::{Pid, TaskControlBlock}; // 导出任务控制块
