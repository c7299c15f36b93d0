// 内存管理实现
// 模拟两级页表的虚拟内存，实现了帧分配器、页表、快表以及地址空间。
// 每个进程都有一个 `memory_set` 描述它的虚拟内存，多个地址空间可以通过写时复制共享页帧。

mod address; // 页号相关模块
mod frame_allocator; // 帧分配器模块
mod memory_set; // 地址空间模块
mod page_table; // 页表模块
mod tlb; // 快表模块

pub use address::{PhysPageNum, VirtPageNum}; // 物理页号、虚拟页号
pub use frame_allocator::{FrameAllocator, FrameAllocatorImpl, MapCountAllocator}; // 帧分配器
pub use memory_set::{MapPermission, MemorySet}; // 映射权限、地址空间
pub use page_table::{Access, PTEFlags, PageTable, PageTableEntry, PteCheck}; // 页表相关
pub use tlb::{Tlb, TlbEntry}; // 快表
