//! 进程控制块
use crate::mm::MemorySet;
use core::fmt::{self, Debug, Formatter};

/// 进程标识符，由驱动框架指定
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Pid(pub usize);

impl Debug for Pid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("pid[{}]", self.0))
    }
}

/// 任务控制块结构体
#[derive(Debug)]
pub struct TaskControlBlock {
    /// 进程标识符
    pub pid: Pid,
    /// 应用程序地址空间
    pub memory_set: MemorySet,
}

impl TaskControlBlock {
    /// 以给定地址空间创建进程
    pub fn new(pid: Pid, memory_set: MemorySet) -> Self {
        Self {
            pid,
            memory_set,
        }
    }

    /// 获取进程标识符
    pub fn getpid(&self) -> Pid {
        self.pid
    }
}
