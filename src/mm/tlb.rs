//! 快表（TLB）的实现
//!
//! TLB 只缓存当前进程的地址转换，表项不带进程标识，因此每次切换进程都必须整体清空。
//! 容量在配置时保证不小于一个地址空间的页数，所以不需要替换策略。

use super::{Access, MapPermission, PhysPageNum, VirtPageNum};
use crate::error::VmError;

/// TLB 表项
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TlbEntry {
    pub valid: bool,
    pub vpn: VirtPageNum,
    pub ppn: PhysPageNum,
    pub perm: MapPermission,
}

impl TlbEntry {
    /// 无效表项
    pub const INVALID: Self = TlbEntry {
        valid: false,
        vpn: VirtPageNum(0),
        ppn: PhysPageNum(0),
        perm: MapPermission::empty(),
    };
}

/// 固定大小的 TLB
#[derive(Clone, Debug)]
pub struct Tlb {
    entries: Vec<TlbEntry>,
}

impl Tlb {
    /// 创建含 `nr_entries` 个无效表项的 TLB
    pub fn new(nr_entries: usize) -> Self {
        Self {
            entries: vec![TlbEntry::INVALID; nr_entries],
        }
    }

    /// 查找缓存的转换，只读表项不能满足写访问
    pub fn lookup(&self, vpn: VirtPageNum, access: Access) -> Option<PhysPageNum> {
        let required = MapPermission::from(access);
        self.entries
            .iter()
            .find(|e| e.valid && e.vpn == vpn && e.perm.contains(required))
            .map(|e| e.ppn)
    }

    /// 插入一条转换；已缓存的虚拟页号原地更新，否则占用第一个无效表项
    pub fn insert(
        &mut self,
        vpn: VirtPageNum,
        ppn: PhysPageNum,
        perm: MapPermission,
    ) -> Result<(), VmError> {
        let slot = match self.entries.iter().position(|e| e.valid && e.vpn == vpn) {
            Some(slot) => slot,
            None => self
                .entries
                .iter()
                .position(|e| !e.valid)
                .ok_or(VmError::TlbFull(vpn))?,
        };
        self.entries[slot] = TlbEntry {
            valid: true,
            vpn,
            ppn,
            perm,
        };
        Ok(())
    }

    /// 使某个虚拟页号的缓存失效
    pub fn invalidate(&mut self, vpn: VirtPageNum) {
        for e in self.entries.iter_mut().filter(|e| e.valid && e.vpn == vpn) {
            *e = TlbEntry::INVALID;
        }
    }

    /// 清空整个 TLB
    pub fn flush_all(&mut self) {
        self.entries.fill(TlbEntry::INVALID);
    }

    /// 是否没有任何有效表项
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.valid)
    }

    /// 所有有效表项
    pub fn valid_entries(&self) -> impl Iterator<Item = &TlbEntry> {
        self.entries.iter().filter(|e| e.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_requires_compatible_permission() {
        let mut tlb = Tlb::new(4);
        tlb.insert(VirtPageNum(3), PhysPageNum(8), MapPermission::R).unwrap();
        assert_eq!(tlb.lookup(VirtPageNum(3), Access::Read), Some(PhysPageNum(8)));
        assert_eq!(tlb.lookup(VirtPageNum(3), Access::Write), None);
        assert_eq!(tlb.lookup(VirtPageNum(4), Access::Read), None);
    }

    #[test]
    fn test_insert_updates_in_place() {
        let mut tlb = Tlb::new(4);
        tlb.insert(VirtPageNum(3), PhysPageNum(8), MapPermission::R).unwrap();
        tlb.insert(VirtPageNum(3), PhysPageNum(9), MapPermission::R | MapPermission::W)
            .unwrap();
        assert_eq!(tlb.valid_entries().count(), 1);
        assert_eq!(tlb.lookup(VirtPageNum(3), Access::Write), Some(PhysPageNum(9)));
    }

    #[test]
    fn test_full_tlb_reports_error() {
        let mut tlb = Tlb::new(1);
        tlb.insert(VirtPageNum(0), PhysPageNum(0), MapPermission::R).unwrap();
        assert_eq!(
            tlb.insert(VirtPageNum(1), PhysPageNum(1), MapPermission::R),
            Err(VmError::TlbFull(VirtPageNum(1)))
        );
        // 失效后空出的表项可以复用
        tlb.invalidate(VirtPageNum(0));
        assert!(tlb.insert(VirtPageNum(1), PhysPageNum(1), MapPermission::R).is_ok());
    }

    #[test]
    fn test_flush_all() {
        let mut tlb = Tlb::new(4);
        tlb.insert(VirtPageNum(0), PhysPageNum(0), MapPermission::R).unwrap();
        tlb.insert(VirtPageNum(1), PhysPageNum(1), MapPermission::R).unwrap();
        assert!(!tlb.is_empty());
        tlb.flush_all();
        assert!(tlb.is_empty());
        assert_eq!(tlb.lookup(VirtPageNum(0), Access::Read), None);
    }
}
