//! [`TaskManager`] 的实现
//!
//! 保存所有未在运行的进程，切换时按 pid 取出目标进程。

use super::{Pid, TaskControlBlock};
use std::collections::VecDeque;

/// 等待队列
#[derive(Debug, Default)]
pub struct TaskManager {
    ready_queue: VecDeque<TaskControlBlock>, // 等待队列，存储任务的控制块
}

impl TaskManager {
    /// 创建一个空的 `TaskManager`
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
        }
    }
    /// 将任务加入队尾
    pub fn add(&mut self, task: TaskControlBlock) {
        self.ready_queue.push_back(task);
    }
    /// 从队首取出一个任务
    pub fn fetch(&mut self) -> Option<TaskControlBlock> {
        self.ready_queue.pop_front()
    }
    /// 将指定 pid 的任务从队列中摘下
    pub fn take(&mut self, pid: Pid) -> Option<TaskControlBlock> {
        let idx = self.ready_queue.iter().position(|task| task.pid == pid)?;
        self.ready_queue.remove(idx)
    }
    pub fn iter(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.ready_queue.iter()
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskControlBlock> {
        self.ready_queue.iter_mut()
    }
}
