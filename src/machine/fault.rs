//! 缺页处理
//!
//! 框架只在 TLB 与页表都无法满足访问时调用 [`Machine::handle_fault`]，原因有三种：
//! 页目录不存在或页表项无效、对写时复制共享页的写、对真正只读页的写。
//! 前两种分别分配新页帧或复制共享页帧，最后一种报告保护错误且不改变任何状态。

use super::Machine;
use crate::error::VmError;
use crate::mm::{Access, FrameAllocator, MapPermission, PhysPageNum, PteCheck, VirtPageNum};

impl Machine {
    /// 处理当前进程对 `vpn` 的 `access` 访问引发的缺页
    pub fn handle_fault(&mut self, vpn: VirtPageNum, access: Access) -> Result<(), VmError> {
        self.check_vpn(vpn)?;
        let task = self
            .processor
            .current_mut()
            .ok_or(VmError::InvalidProcess(None))?;
        match task.memory_set.resolve(vpn, access) {
            PteCheck::Miss => {
                let ppn = self.frames.alloc().ok_or_else(|| {
                    warn!("{:?}: page fault on {:?}, out of memory", task.pid, vpn);
                    VmError::OutOfMemory
                })?;
                let perm = MapPermission::from(access);
                if let Err(err) = task.memory_set.map(vpn, ppn, perm) {
                    self.frames.dealloc(ppn);
                    return Err(err);
                }
                self.stats.page_faults += 1;
                debug!("{:?}: page fault on {:?} -> {:?}", task.pid, vpn, ppn);
                self.tlb.insert(vpn, ppn, perm)
            }
            PteCheck::CopyOnWrite(shared) => self.copy_on_write(vpn, shared),
            // 已经可以访问，只需回填 TLB
            PteCheck::Granted(ppn, perm) => self.tlb.insert(vpn, ppn, perm),
            PteCheck::Violation => {
                self.stats.protection_faults += 1;
                warn!("{:?}: {:?} access to read-only {:?}", task.pid, access, vpn);
                Err(VmError::ProtectionViolation { vpn, access })
            }
        }
    }

    /// 为写时复制页换上私有页帧
    ///
    /// 新页帧先于旧页帧的计数递减分配，因此一定与共享页帧不同。旧页帧只剩一个
    /// 映射者时，该映射者的写权限被立即恢复，所以写时复制页的映射计数总是至少为 2。
    fn copy_on_write(&mut self, vpn: VirtPageNum, shared: PhysPageNum) -> Result<(), VmError> {
        let task = self
            .processor
            .current_mut()
            .ok_or(VmError::InvalidProcess(None))?;
        debug_assert!(
            self.frames.map_count(shared) >= 2,
            "copy-on-write {:?} has a private frame {:?}",
            vpn,
            shared
        );
        let private = self.frames.alloc().ok_or_else(|| {
            warn!("{:?}: copy-on-write of {:?}, out of memory", task.pid, vpn);
            VmError::OutOfMemory
        })?;
        let pte = match task.memory_set.remap_private(vpn, private) {
            Some(pte) => pte,
            None => {
                self.frames.dealloc(private);
                return Err(VmError::NotMapped(vpn));
            }
        };
        self.stats.cow_faults += 1;
        debug!(
            "{:?}: copy-on-write {:?}: {:?} -> {:?}",
            task.pid, vpn, shared, private
        );
        self.tlb.insert(vpn, private, pte.permission())?;
        self.put_frame(shared);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::task::Pid;

    fn machine(nr_frames: usize) -> Machine {
        Machine::new(SimConfig {
            tlb_entries: 16,
            ptes_per_dir: 4,
            dirs_per_space: 4,
            nr_frames,
        })
        .unwrap()
    }

    #[test]
    fn test_true_fault_maps_requested_permission() {
        let mut m = machine(4);
        m.handle_fault(VirtPageNum(5), Access::Read).unwrap();
        let pte = m.pte(Pid(0), VirtPageNum(5)).unwrap();
        assert_eq!(pte.permission(), MapPermission::R);
        assert_eq!(m.translate_via_tlb(VirtPageNum(5), Access::Read), Some(pte.ppn()));
        assert_eq!(m.stats().page_faults, 1);
        // 直接调用缺页处理不经过 TLB 计数
        assert_eq!(m.stats().tlb_misses, 0);
    }

    #[test]
    fn test_true_fault_out_of_memory() {
        let mut m = machine(1);
        m.allocate_page(VirtPageNum(0), Access::Write).unwrap();
        assert_eq!(
            m.handle_fault(VirtPageNum(9), Access::Write),
            Err(VmError::OutOfMemory)
        );
        assert!(m.pte(Pid(0), VirtPageNum(9)).is_none());
    }

    #[test]
    fn test_violation_mutates_nothing() {
        let mut m = machine(4);
        let ppn = m.allocate_page(VirtPageNum(3), Access::Read).unwrap();
        let before = m.memory_set(Pid(0)).cloned();
        assert_eq!(
            m.handle_fault(VirtPageNum(3), Access::Write),
            Err(VmError::ProtectionViolation {
                vpn: VirtPageNum(3),
                access: Access::Write
            })
        );
        assert_eq!(m.memory_set(Pid(0)).cloned(), before);
        assert_eq!(m.map_count(ppn), 1);
        assert_eq!(m.frames().free_frames(), 3);
    }

    #[test]
    fn test_cow_out_of_memory_keeps_sharing() {
        let mut m = machine(1);
        let shared = m.allocate_page(VirtPageNum(0), Access::Write).unwrap();
        m.switch_to(Pid(1));
        assert_eq!(
            m.handle_fault(VirtPageNum(0), Access::Write),
            Err(VmError::OutOfMemory)
        );
        assert_eq!(m.map_count(shared), 2);
        assert!(m.pte(Pid(1), VirtPageNum(0)).unwrap().is_cow());
        assert!(m.pte(Pid(0), VirtPageNum(0)).unwrap().is_cow());
    }

    #[test]
    fn test_cow_after_sharer_released() {
        let mut m = machine(4);
        let shared = m.allocate_page(VirtPageNum(0), Access::Write).unwrap();
        m.switch_to(Pid(1));
        m.release_page(VirtPageNum(0)).unwrap();
        // 父进程是唯一的映射者，写权限已被恢复
        assert!(m.pte(Pid(0), VirtPageNum(0)).unwrap().writable());
        m.switch_to(Pid(0));
        assert_eq!(m.access(VirtPageNum(0), Access::Write), Ok(shared));
        assert_eq!(m.stats().cow_faults, 0);
    }

    #[test]
    fn test_cow_entries_never_left_private() {
        let mut m = machine(8);
        let shared = m.allocate_page(VirtPageNum(0), Access::Write).unwrap();
        m.switch_to(Pid(1));
        m.switch_to(Pid(2));
        assert_eq!(m.map_count(shared), 3);
        m.release_page(VirtPageNum(0)).unwrap();
        // 仍有两个映射者，保持共享
        assert!(m.pte(Pid(0), VirtPageNum(0)).unwrap().is_cow());
        assert!(m.pte(Pid(1), VirtPageNum(0)).unwrap().is_cow());
        assert_eq!(m.exit_current(), Ok(Some(Pid(0))));
        assert_eq!(m.map_count(shared), 2);
        m.switch_to(Pid(1));
        m.release_page(VirtPageNum(0)).unwrap();
        // 唯一的映射者在等待队列中，权限被立即恢复
        let pte = m.pte(Pid(0), VirtPageNum(0)).unwrap();
        assert!(pte.writable() && !pte.is_cow());
        for task in m.processes() {
            for (_, pte) in task.memory_set.mappings() {
                assert!(!pte.is_cow() || m.map_count(pte.ppn()) >= 2);
            }
        }
        m.switch_to(Pid(0));
        assert_eq!(m.access(VirtPageNum(0), Access::Write), Ok(shared));
        assert_eq!(m.stats().cow_faults, 0);
    }

    #[test]
    fn test_spurious_fault_refills_tlb() {
        let mut m = machine(4);
        let ppn = m.allocate_page(VirtPageNum(2), Access::Write).unwrap();
        m.switch_to(Pid(0));
        assert!(m.tlb().is_empty());
        m.handle_fault(VirtPageNum(2), Access::Read).unwrap();
        assert_eq!(m.translate_via_tlb(VirtPageNum(2), Access::Write), Some(ppn));
    }
}
