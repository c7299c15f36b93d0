// 实现 [`Processor`]
// 记录当前正在运行的进程。页表与快表的所有操作都隐式作用于当前进程，
// 当前进程的地址空间就是地址转换的根。

use super::{Pid, TaskControlBlock};
use crate::mm::MemorySet;

/// 处理器管理结构
#[derive(Debug, Default)]
pub struct Processor {
    /// 当前处理器上正在执行的任务
    current: Option<TaskControlBlock>,
}

impl Processor {
    /// 创建一个空的处理器
    pub fn new() -> Self {
        Self { current: None }
    }

    /// 取走当前任务，留下 None
    pub fn take_current(&mut self) -> Option<TaskControlBlock> {
        self.current.take()
    }

    /// 设置当前任务
    pub fn set_current(&mut self, task: TaskControlBlock) {
        debug_assert!(self.current.is_none());
        self.current = Some(task);
    }

    pub fn current(&self) -> Option<&TaskControlBlock> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut TaskControlBlock> {
        self.current.as_mut()
    }

    /// 当前进程的 pid
    pub fn current_pid(&self) -> Option<Pid> {
        self.current.as_ref().map(|task| task.pid)
    }

    /// 页表基址：当前进程的地址空间
    pub fn ptbr(&self) -> Option<&MemorySet> {
        self.current.as_ref().map(|task| &task.memory_set)
    }
}
