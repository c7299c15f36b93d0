//! 模拟器的配置常量与运行时配置

use crate::error::VmError;

/// 物理页帧总数
pub const NR_PAGEFRAMES: usize = 128;
/// 每个页目录中的页表项数
pub const NR_PTES_PER_PAGE: usize = 16;
/// 每个地址空间中的页目录数
pub const NR_PDES_PER_PAGE: usize = 16;
/// TLB 表项数，足以缓存一个地址空间的全部映射
pub const NR_TLB_ENTRIES: usize = NR_PTES_PER_PAGE * NR_PDES_PER_PAGE;

/// 页表两级扇出各自的上限
pub const MAX_FANOUT: usize = 1 << 16;
/// 物理页帧数的上限
pub const MAX_PAGEFRAMES: usize = 1 << 24;
/// TLB 表项数的上限
pub const MAX_TLB_ENTRIES: usize = 1 << 24;

/// 模拟器启动时的初始进程
pub const INIT_PID: usize = 0;

/// 一次模拟运行使用的配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// TLB 表项数
    pub tlb_entries: usize,
    /// 每个页目录中的页表项数
    pub ptes_per_dir: usize,
    /// 每个地址空间中的页目录数
    pub dirs_per_space: usize,
    /// 物理页帧总数
    pub nr_frames: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tlb_entries: NR_TLB_ENTRIES,
            ptes_per_dir: NR_PTES_PER_PAGE,
            dirs_per_space: NR_PDES_PER_PAGE,
            nr_frames: NR_PAGEFRAMES,
        }
    }
}

impl SimConfig {
    /// 单个地址空间可表示的虚拟页数，乘积溢出时为 `None`
    pub fn nr_vpns(&self) -> Option<usize> {
        self.ptes_per_dir.checked_mul(self.dirs_per_space)
    }

    /// 检查配置是否可用
    ///
    /// TLB 必须能容纳一个地址空间的全部映射，否则插入可能失败。
    pub fn validate(&self) -> Result<(), VmError> {
        if self.ptes_per_dir == 0 || self.dirs_per_space == 0 {
            return Err(VmError::InvalidConfig("page table fan-out must be non-zero"));
        }
        if self.ptes_per_dir > MAX_FANOUT || self.dirs_per_space > MAX_FANOUT {
            return Err(VmError::InvalidConfig("page table fan-out is too large"));
        }
        if self.nr_frames == 0 {
            return Err(VmError::InvalidConfig("at least one page frame is required"));
        }
        if self.nr_frames > MAX_PAGEFRAMES {
            return Err(VmError::InvalidConfig("too many page frames"));
        }
        if self.tlb_entries > MAX_TLB_ENTRIES {
            return Err(VmError::InvalidConfig("too many tlb entries"));
        }
        let nr_vpns = self
            .nr_vpns()
            .ok_or(VmError::InvalidConfig("page table fan-out overflows"))?;
        if self.tlb_entries < nr_vpns {
            return Err(VmError::InvalidConfig(
                "tlb must cover every vpn of an address space",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.nr_vpns(), Some(256));
    }

    #[test]
    fn test_small_tlb_rejected() {
        let config = SimConfig {
            tlb_entries: 8,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
    }

    #[test]
    fn test_overflowing_fan_out_rejected() {
        let config = SimConfig {
            tlb_entries: 0,
            ptes_per_dir: usize::MAX / 2,
            dirs_per_space: usize::MAX / 2,
            nr_frames: 1,
        };
        assert_eq!(config.nr_vpns(), None);
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
        // 单独一级过大同样被拒绝
        let config = SimConfig {
            ptes_per_dir: MAX_FANOUT + 1,
            dirs_per_space: 1,
            tlb_entries: MAX_FANOUT + 1,
            nr_frames: 1,
        };
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_tables_rejected() {
        let config = SimConfig {
            nr_frames: MAX_PAGEFRAMES + 1,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
        let config = SimConfig {
            tlb_entries: MAX_TLB_ENTRIES + 1,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_frames_rejected() {
        let config = SimConfig {
            nr_frames: 0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
