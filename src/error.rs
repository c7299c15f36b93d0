//! 模拟器错误类型

use crate::mm::{Access, VirtPageNum};
use crate::task::Pid;
use thiserror::Error;

/// 访存、分配与进程切换可能报告的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    /// 所有物理页帧均已被映射
    #[error("out of memory: no free page frame")]
    OutOfMemory,
    /// 对真正只读（非写时复制）的页执行写操作
    #[error("protection violation: {access:?} access to {vpn:?}")]
    ProtectionViolation { vpn: VirtPageNum, access: Access },
    /// 没有当前进程，或引用了不存在的进程
    #[error("invalid process {0:?}")]
    InvalidProcess(Option<Pid>),
    /// 释放一个尚未映射的页
    #[error("{0:?} is not mapped")]
    NotMapped(VirtPageNum),
    /// 在已有映射的页上再次分配
    #[error("{0:?} is already mapped")]
    AlreadyMapped(VirtPageNum),
    /// 虚拟页号超出地址空间
    #[error("{0:?} is outside the address space")]
    VpnOutOfRange(VirtPageNum),
    /// TLB 没有空闲表项，说明配置有误
    #[error("tlb has no free entry for {0:?}")]
    TlbFull(VirtPageNum),
    /// 配置不可用
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
