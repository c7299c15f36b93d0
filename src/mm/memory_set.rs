//! [`MemorySet`] 的实现：单个进程的地址空间
use super::{FrameAllocator, PageTable, PageTableEntry, PteCheck};
use super::{Access, PhysPageNum, VirtPageNum};
use crate::config::SimConfig;
use crate::error::VmError;
use bitflags::*;

/// 地址空间
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemorySet {
    page_table: PageTable,
}

impl MemorySet {
    /// 创建一个新的空的 `MemorySet`。
    pub fn new_bare(config: &SimConfig) -> Self {
        Self {
            page_table: PageTable::new(config.dirs_per_space, config.ptes_per_dir),
        }
    }
    /// 通过写时复制共享父进程的全部映射来创建子进程的地址空间。
    ///
    /// 父进程中所有可写页都被降级为只读，子进程复制降级后的页表，
    /// 每个被共享的页帧映射计数加一。原始权限保存在页表项中，缺页时据此恢复。
    pub fn from_existed_user<A: FrameAllocator>(user_space: &mut Self, frames: &mut A) -> Self {
        for (vpn, pte) in user_space.page_table.mappings_mut() {
            if pte.writable() {
                pte.set_permission(MapPermission::R);
                trace!("cow: {:?} downgraded to read-only", vpn);
            }
            frames.share(pte.ppn());
        }
        Self {
            page_table: user_space.page_table.clone(),
        }
    }
    /// 将虚拟页号转换为页表项
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.page_table.translate(vpn)
    }
    /// 检查访问权限
    pub fn resolve(&self, vpn: VirtPageNum, access: Access) -> PteCheck {
        self.page_table.resolve(vpn, access)
    }
    /// 映射
    pub fn map(
        &mut self,
        vpn: VirtPageNum,
        ppn: PhysPageNum,
        perm: MapPermission,
    ) -> Result<(), VmError> {
        self.page_table.map(vpn, ppn, perm)
    }
    /// 解除映射
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Result<PhysPageNum, VmError> {
        self.page_table.unmap(vpn)
    }
    /// 写时复制完成后让页表项指向新的页帧，并恢复原始权限
    pub fn remap_private(&mut self, vpn: VirtPageNum, ppn: PhysPageNum) -> Option<PageTableEntry> {
        let pte = self.page_table.entry_mut(vpn)?;
        pte.set_ppn(ppn);
        pte.set_permission(pte.origin_permission());
        Some(*pte)
    }
    /// 若 `ppn` 被本地址空间以写时复制方式映射，恢复其原始权限，返回对应的虚拟页号
    pub fn restore_cow_mapping(&mut self, ppn: PhysPageNum) -> Option<VirtPageNum> {
        self.page_table
            .mappings_mut()
            .find(|(_, pte)| pte.ppn() == ppn)
            .and_then(|(vpn, pte)| {
                if !pte.is_cow() {
                    return None;
                }
                pte.set_permission(pte.origin_permission());
                Some(vpn)
            })
    }
    /// 清除所有映射，返回被释放的 (虚拟页号, 物理页号)
    pub fn recycle_data_pages(&mut self) -> Vec<(VirtPageNum, PhysPageNum)> {
        let mapped: Vec<_> = self
            .page_table
            .mappings()
            .map(|(vpn, pte)| (vpn, pte.ppn()))
            .collect();
        for (vpn, _) in mapped.iter() {
            let _ = self.page_table.unmap(*vpn);
        }
        mapped
    }
    /// 按虚拟页号顺序列出所有有效映射
    pub fn mappings(&self) -> impl Iterator<Item = (VirtPageNum, PageTableEntry)> + '_ {
        self.page_table.mappings()
    }
    /// 已经创建的页目录数
    pub fn nr_directories(&self) -> usize {
        self.page_table.nr_directories()
    }
    /// 有效映射数
    pub fn nr_mapped(&self) -> usize {
        self.page_table.mappings().count()
    }
}

bitflags! {
    /// 映射权限，表示页表项中的权限：`R W`，空集即无权限
    pub struct MapPermission: u8 {
        /// 可读
        const R = 1 << 1;
        /// 可写
        const W = 1 << 2;
    }
}
