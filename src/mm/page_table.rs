//! 实现 [`PageTableEntry`] 和 [`PageTable`]。

use super::{MapPermission, PhysPageNum, VirtPageNum};
use crate::error::VmError;
use bitflags::*;
use core::fmt::{self, Debug, Formatter};

bitflags! {
    /// 页表项标志
    pub struct PTEFlags: u16 {
        const V = 1 << 0;  // 有效位
        const R = 1 << 1;  // 可读位
        const W = 1 << 2;  // 可写位
        const OR = 1 << 8; // 原始权限：可读（软件保留位）
        const OW = 1 << 9; // 原始权限：可写（软件保留位）
    }
}

/// 原始权限相对当前权限位的偏移
const ORIGIN_SHIFT: u16 = 7;
/// 页表项中标志位所占的位数
const FLAGS_BITS: usize = 10;

/// 一次访存的类型
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    /// 读
    Read,
    /// 写
    Write,
}

impl From<Access> for MapPermission {
    /// 访问所需的权限，写权限隐含读权限
    fn from(access: Access) -> Self {
        match access {
            Access::Read => MapPermission::R,
            Access::Write => MapPermission::R | MapPermission::W,
        }
    }
}

/// 页表检查结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PteCheck {
    /// 映射存在且权限满足
    Granted(PhysPageNum, MapPermission),
    /// 页目录不存在或页表项无效
    Miss,
    /// 对写时复制共享页的写访问，需要交给缺页处理
    CopyOnWrite(PhysPageNum),
    /// 对真正只读页的写访问
    Violation,
}

#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
/// 页表项结构
pub struct PageTableEntry {
    /// 页表项的比特位
    pub bits: usize,
}

impl PageTableEntry {
    /// 创建新的有效页表项，原始权限即为当前权限
    pub fn new(ppn: PhysPageNum, perm: MapPermission) -> Self {
        let perm = PTEFlags::from_bits_truncate(perm.bits() as u16);
        let origin = PTEFlags::from_bits_truncate(perm.bits() << ORIGIN_SHIFT);
        let flags = PTEFlags::V | perm | origin;
        PageTableEntry {
            bits: ppn.0 << FLAGS_BITS | flags.bits() as usize,
        }
    }
    /// 创建空的页表项
    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }
    /// 从页表项获取物理页号
    pub fn ppn(&self) -> PhysPageNum {
        (self.bits >> FLAGS_BITS).into()
    }
    /// 从页表项获取标志位
    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate((self.bits & ((1 << FLAGS_BITS) - 1)) as u16)
    }
    /// 判断页表项指向的页面是否有效
    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }
    /// 判断页表项指向的页面是否可读
    pub fn readable(&self) -> bool {
        self.flags().contains(PTEFlags::R)
    }
    /// 判断页表项指向的页面是否可写
    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }
    /// 当前权限
    pub fn permission(&self) -> MapPermission {
        let bits = (self.flags() & (PTEFlags::R | PTEFlags::W)).bits();
        MapPermission::from_bits_truncate(bits as u8)
    }
    /// 进程最初申请的权限
    pub fn origin_permission(&self) -> MapPermission {
        let bits = (self.flags() & (PTEFlags::OR | PTEFlags::OW)).bits() >> ORIGIN_SHIFT;
        MapPermission::from_bits_truncate(bits as u8)
    }
    /// 是否为被降级成只读的写时复制页
    pub fn is_cow(&self) -> bool {
        self.is_valid() && !self.writable() && self.origin_permission().contains(MapPermission::W)
    }
    /// 原地修改当前权限，保留物理页号与原始权限
    pub fn set_permission(&mut self, perm: MapPermission) {
        let mut flags = self.flags();
        flags.remove(PTEFlags::R | PTEFlags::W);
        flags.insert(PTEFlags::from_bits_truncate(perm.bits() as u16));
        self.bits = self.ppn().0 << FLAGS_BITS | flags.bits() as usize;
    }
    /// 原地修改物理页号
    pub fn set_ppn(&mut self, ppn: PhysPageNum) {
        self.bits = ppn.0 << FLAGS_BITS | self.flags().bits() as usize;
    }
    /// 检查本页表项能否满足一次访问
    pub fn check(&self, access: Access) -> PteCheck {
        if !self.is_valid() {
            return PteCheck::Miss;
        }
        let required = MapPermission::from(access);
        if self.permission().contains(required) {
            PteCheck::Granted(self.ppn(), self.permission())
        } else if access == Access::Write && self.is_cow() {
            PteCheck::CopyOnWrite(self.ppn())
        } else {
            PteCheck::Violation
        }
    }
}

impl Debug for PageTableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("PTE:invalid");
        }
        f.write_fmt(format_args!(
            "PTE:{:?} {:?} (origin {:?})",
            self.ppn(),
            self.permission(),
            self.origin_permission()
        ))
    }
}

/// 二级页表中的一个页目录，`pd_index` 为它在根表中的位置
#[derive(Clone, Debug, PartialEq, Eq)]
struct PteDirectory {
    pd_index: usize,
    ptes: Vec<PageTableEntry>,
}

/// 两级页表结构
///
/// 页目录放在 `dirs` 这个 arena 中，根表 `pdes` 只保存槽位下标，
/// `None` 表示该页目录尚未创建。页目录在页表销毁前不会被回收。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageTable {
    pdes: Vec<Option<usize>>,
    dirs: Vec<PteDirectory>,
    ptes_per_dir: usize,
}

impl PageTable {
    /// 创建新的空页表
    pub fn new(dirs_per_space: usize, ptes_per_dir: usize) -> Self {
        PageTable {
            pdes: vec![None; dirs_per_space],
            dirs: Vec::new(),
            ptes_per_dir,
        }
    }
    /// 虚拟页号是否落在地址空间内
    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        vpn.0 < self.pdes.len() * self.ptes_per_dir
    }
    /// 已经创建的页目录数
    pub fn nr_directories(&self) -> usize {
        self.dirs.len()
    }
    /// 根据虚拟页号查找页表项，页目录不存在时先创建
    fn find_pte_create(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        if !self.contains(vpn) {
            return None;
        }
        let [pd_index, pte_index] = vpn.indexes(self.ptes_per_dir);
        let slot = match self.pdes[pd_index] {
            Some(slot) => slot,
            None => {
                trace!("page table: create directory {}", pd_index);
                self.dirs.push(PteDirectory {
                    pd_index,
                    ptes: vec![PageTableEntry::empty(); self.ptes_per_dir],
                });
                let slot = self.dirs.len() - 1;
                self.pdes[pd_index] = Some(slot);
                slot
            }
        };
        Some(&mut self.dirs[slot].ptes[pte_index])
    }
    /// 根据虚拟页号查找页表项
    fn find_pte(&self, vpn: VirtPageNum) -> Option<&PageTableEntry> {
        if !self.contains(vpn) {
            return None;
        }
        let [pd_index, pte_index] = vpn.indexes(self.ptes_per_dir);
        let slot = self.pdes[pd_index]?;
        Some(&self.dirs[slot].ptes[pte_index])
    }
    fn find_pte_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        if !self.contains(vpn) {
            return None;
        }
        let [pd_index, pte_index] = vpn.indexes(self.ptes_per_dir);
        let slot = self.pdes[pd_index]?;
        Some(&mut self.dirs[slot].ptes[pte_index])
    }
    /// 建立虚拟页号到物理页号的映射，这是页表项由无效变为有效的唯一途径
    pub fn map(
        &mut self,
        vpn: VirtPageNum,
        ppn: PhysPageNum,
        perm: MapPermission,
    ) -> Result<(), VmError> {
        let pte = self.find_pte_create(vpn).ok_or(VmError::VpnOutOfRange(vpn))?;
        if pte.is_valid() {
            return Err(VmError::AlreadyMapped(vpn));
        }
        *pte = PageTableEntry::new(ppn, perm);
        Ok(())
    }
    /// 移除映射，返回原来的物理页号
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Result<PhysPageNum, VmError> {
        if !self.contains(vpn) {
            return Err(VmError::VpnOutOfRange(vpn));
        }
        match self.find_pte_mut(vpn) {
            Some(pte) if pte.is_valid() => {
                let ppn = pte.ppn();
                *pte = PageTableEntry::empty();
                Ok(ppn)
            }
            _ => Err(VmError::NotMapped(vpn)),
        }
    }
    /// 从虚拟页号获取有效的页表项
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(vpn).filter(|pte| pte.is_valid()).copied()
    }
    /// 检查虚拟页号能否以 `access` 方式访问
    pub fn resolve(&self, vpn: VirtPageNum, access: Access) -> PteCheck {
        self.find_pte(vpn)
            .map_or(PteCheck::Miss, |pte| pte.check(access))
    }
    /// 获取有效页表项的可变引用
    pub fn entry_mut(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        self.find_pte_mut(vpn).filter(|pte| pte.is_valid())
    }
    /// 按虚拟页号顺序列出所有有效映射
    pub fn mappings(&self) -> impl Iterator<Item = (VirtPageNum, PageTableEntry)> + '_ {
        let n = self.ptes_per_dir;
        self.pdes
            .iter()
            .enumerate()
            .filter_map(move |(pd_index, slot)| slot.map(|slot| (pd_index, slot)))
            .flat_map(move |(pd_index, slot)| {
                self.dirs[slot]
                    .ptes
                    .iter()
                    .enumerate()
                    .filter(|(_, pte)| pte.is_valid())
                    .map(move |(i, pte)| (VirtPageNum::from_indexes(pd_index, i, n), *pte))
            })
    }
    /// 列出所有有效页表项的可变引用（不保证顺序）
    pub fn mappings_mut(
        &mut self,
    ) -> impl Iterator<Item = (VirtPageNum, &mut PageTableEntry)> + '_ {
        let n = self.ptes_per_dir;
        self.dirs.iter_mut().flat_map(move |dir| {
            let pd_index = dir.pd_index;
            dir.ptes
                .iter_mut()
                .enumerate()
                .filter(|(_, pte)| pte.is_valid())
                .map(move |(i, pte)| (VirtPageNum::from_indexes(pd_index, i, n), pte))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw() -> MapPermission {
        MapPermission::R | MapPermission::W
    }

    #[test]
    fn test_pte_fields() {
        let pte = PageTableEntry::new(PhysPageNum(42), rw());
        assert!(pte.is_valid());
        assert!(pte.readable() && pte.writable());
        assert_eq!(pte.ppn(), PhysPageNum(42));
        assert_eq!(pte.origin_permission(), rw());
        assert!(!PageTableEntry::empty().is_valid());
    }

    #[test]
    fn test_downgrade_keeps_origin() {
        let mut pte = PageTableEntry::new(PhysPageNum(7), rw());
        pte.set_permission(MapPermission::R);
        assert!(!pte.writable());
        assert!(pte.is_cow());
        assert_eq!(pte.origin_permission(), rw());
        assert_eq!(pte.check(Access::Read), PteCheck::Granted(PhysPageNum(7), MapPermission::R));
        assert_eq!(pte.check(Access::Write), PteCheck::CopyOnWrite(PhysPageNum(7)));
        pte.set_ppn(PhysPageNum(9));
        pte.set_permission(pte.origin_permission());
        assert_eq!(pte.check(Access::Write), PteCheck::Granted(PhysPageNum(9), rw()));
    }

    #[test]
    fn test_read_only_write_is_violation() {
        let pte = PageTableEntry::new(PhysPageNum(3), MapPermission::R);
        assert!(!pte.is_cow());
        assert_eq!(pte.check(Access::Write), PteCheck::Violation);
    }

    #[test]
    fn test_directory_created_lazily() {
        let mut pt = PageTable::new(4, 4);
        assert_eq!(pt.nr_directories(), 0);
        assert_eq!(pt.resolve(VirtPageNum(9), Access::Read), PteCheck::Miss);
        pt.map(VirtPageNum(9), PhysPageNum(1), MapPermission::R).unwrap();
        assert_eq!(pt.nr_directories(), 1);
        // 同一页目录内的其他页不会再创建目录
        pt.map(VirtPageNum(10), PhysPageNum(2), MapPermission::R).unwrap();
        assert_eq!(pt.nr_directories(), 1);
        assert_eq!(pt.translate(VirtPageNum(9)).unwrap().ppn(), PhysPageNum(1));
        assert!(pt.translate(VirtPageNum(8)).is_none());
    }

    #[test]
    fn test_map_twice_rejected() {
        let mut pt = PageTable::new(2, 2);
        pt.map(VirtPageNum(1), PhysPageNum(0), rw()).unwrap();
        assert_eq!(
            pt.map(VirtPageNum(1), PhysPageNum(1), rw()),
            Err(VmError::AlreadyMapped(VirtPageNum(1)))
        );
        assert_eq!(
            pt.map(VirtPageNum(4), PhysPageNum(1), rw()),
            Err(VmError::VpnOutOfRange(VirtPageNum(4)))
        );
    }

    #[test]
    fn test_unmap() {
        let mut pt = PageTable::new(2, 2);
        assert_eq!(pt.unmap(VirtPageNum(0)), Err(VmError::NotMapped(VirtPageNum(0))));
        pt.map(VirtPageNum(3), PhysPageNum(5), rw()).unwrap();
        assert_eq!(pt.unmap(VirtPageNum(3)), Ok(PhysPageNum(5)));
        assert_eq!(pt.resolve(VirtPageNum(3), Access::Read), PteCheck::Miss);
        assert_eq!(pt.unmap(VirtPageNum(3)), Err(VmError::NotMapped(VirtPageNum(3))));
    }

    #[test]
    fn test_mappings_in_vpn_order() {
        let mut pt = PageTable::new(4, 4);
        pt.map(VirtPageNum(13), PhysPageNum(0), rw()).unwrap();
        pt.map(VirtPageNum(2), PhysPageNum(1), MapPermission::R).unwrap();
        let vpns: Vec<_> = pt.mappings().map(|(vpn, _)| vpn.0).collect();
        assert_eq!(vpns, vec![2, 13]);
        for (_, pte) in pt.mappings_mut() {
            pte.set_permission(MapPermission::R);
        }
        assert!(pt.mappings().all(|(_, pte)| !pte.writable()));
    }
}
