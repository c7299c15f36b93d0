//! 虚拟页号与物理页号的实现
use core::fmt::{self, Debug, Formatter};

/// 物理页号（PFN）结构体
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct PhysPageNum(pub usize);

/// 虚拟页号（VPN）结构体
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtPageNum(pub usize);

impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0)) // 格式化虚拟页号输出
    }
}
impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PPN:{:#x}", self.0)) // 格式化物理页号输出
    }
}

impl From<usize> for PhysPageNum {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<usize> for VirtPageNum {
    fn from(v: usize) -> Self {
        Self(v)
    }
}
impl From<PhysPageNum> for usize {
    fn from(v: PhysPageNum) -> Self {
        v.0
    }
}
impl From<VirtPageNum> for usize {
    fn from(v: VirtPageNum) -> Self {
        v.0
    }
}

impl VirtPageNum {
    /// 拆分为 `[页目录索引, 页表项索引]`
    pub fn indexes(&self, ptes_per_dir: usize) -> [usize; 2] {
        [self.0 / ptes_per_dir, self.0 % ptes_per_dir]
    }

    /// 由两级索引拼回虚拟页号
    pub fn from_indexes(pd_index: usize, pte_index: usize, ptes_per_dir: usize) -> Self {
        Self(pd_index * ptes_per_dir + pte_index)
    }
}
