//! 模拟器上下文 [`Machine`]
//!
//! 一个 `Machine` 持有一次模拟运行的全部状态：页帧分配器、TLB、当前进程与等待队列。
//! 驱动框架对每条模拟指令调用一次这里的入口函数，每次调用都在返回前让
//! 映射计数、页表权限与 TLB 内容重新保持一致。

mod fault;

use crate::config::{SimConfig, INIT_PID};
use crate::error::VmError;
use crate::mm::{
    Access, FrameAllocator, FrameAllocatorImpl, MapPermission, MemorySet, PageTableEntry,
    PhysPageNum, PteCheck, Tlb, VirtPageNum,
};
use crate::task::{Pid, Processor, TaskControlBlock, TaskManager};

/// 访存统计
///
/// TLB 命中与未命中只由 [`Machine::access`] 计数；三类缺页在
/// [`Machine::handle_fault`] 中计数，框架直接调用缺页处理时同样会累加。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MmuStats {
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    /// 无映射导致的缺页
    pub page_faults: u64,
    /// 写时复制缺页
    pub cow_faults: u64,
    pub protection_faults: u64,
}

/// `switch_to` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// 目标就是当前进程
    Unchanged,
    /// 从等待队列恢复
    Resumed,
    /// 从当前进程按需 fork
    Forked { parent: Pid },
    /// 没有当前进程可供 fork，创建空进程
    Created,
}

/// 模拟器上下文
#[derive(Debug)]
pub struct Machine {
    config: SimConfig,
    frames: FrameAllocatorImpl,
    tlb: Tlb,
    processor: Processor,
    manager: TaskManager,
    stats: MmuStats,
}

impl Machine {
    /// 按配置创建模拟器，初始进程 `INIT_PID` 为当前进程
    pub fn new(config: SimConfig) -> Result<Self, VmError> {
        config.validate()?;
        let mut processor = Processor::new();
        processor.set_current(TaskControlBlock::new(
            Pid(INIT_PID),
            MemorySet::new_bare(&config),
        ));
        info!(
            "machine: {} frames, {} tlb entries, {}x{} page table",
            config.nr_frames, config.tlb_entries, config.dirs_per_space, config.ptes_per_dir
        );
        Ok(Self {
            config,
            frames: FrameAllocatorImpl::new(config.nr_frames),
            tlb: Tlb::new(config.tlb_entries),
            processor,
            manager: TaskManager::new(),
            stats: MmuStats::default(),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn stats(&self) -> MmuStats {
        self.stats
    }

    pub fn frames(&self) -> &FrameAllocatorImpl {
        &self.frames
    }

    /// 页帧的映射计数
    pub fn map_count(&self, ppn: PhysPageNum) -> usize {
        self.frames.map_count(ppn)
    }

    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    /// 当前进程的 pid
    pub fn current_pid(&self) -> Option<Pid> {
        self.processor.current_pid()
    }

    /// 等待队列中的 pid，按队列顺序
    pub fn waiting(&self) -> impl Iterator<Item = Pid> + '_ {
        self.manager.iter().map(|task| task.pid)
    }

    /// 所有进程，当前进程在前
    pub fn processes(&self) -> impl Iterator<Item = &TaskControlBlock> {
        self.processor.current().into_iter().chain(self.manager.iter())
    }

    /// 指定进程的地址空间
    pub fn memory_set(&self, pid: Pid) -> Option<&MemorySet> {
        self.processes()
            .find(|task| task.pid == pid)
            .map(|task| &task.memory_set)
    }

    /// 指定进程中某个虚拟页的有效页表项
    pub fn pte(&self, pid: Pid, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.memory_set(pid)?.translate(vpn)
    }

    fn check_vpn(&self, vpn: VirtPageNum) -> Result<(), VmError> {
        if self.config.nr_vpns().map_or(false, |nr_vpns| vpn.0 < nr_vpns) {
            Ok(())
        } else {
            Err(VmError::VpnOutOfRange(vpn))
        }
    }

    /// 只通过 TLB 转换，未命中时没有任何副作用
    pub fn translate_via_tlb(&self, vpn: VirtPageNum, access: Access) -> Option<PhysPageNum> {
        self.tlb.lookup(vpn, access)
    }

    /// 经页表成功转换后由框架调用，缓存该转换
    ///
    /// 只缓存当前页表确实允许的转换：映射不存在时返回 [`VmError::NotMapped`]，
    /// 页表不允许 `access` 或页帧不一致时返回 [`VmError::ProtectionViolation`]。
    pub fn insert_into_tlb(
        &mut self,
        vpn: VirtPageNum,
        access: Access,
        ppn: PhysPageNum,
    ) -> Result<(), VmError> {
        self.check_vpn(vpn)?;
        let space = self.processor.ptbr().ok_or(VmError::InvalidProcess(None))?;
        match space.resolve(vpn, access) {
            PteCheck::Granted(mapped, _) if mapped == ppn => {
                self.tlb.insert(vpn, ppn, access.into())
            }
            PteCheck::Miss => Err(VmError::NotMapped(vpn)),
            _ => {
                warn!("tlb: refused to cache {:?} -> {:?} for {:?}", vpn, ppn, access);
                Err(VmError::ProtectionViolation { vpn, access })
            }
        }
    }

    /// 为当前进程的 `vpn` 分配编号最小的空闲页帧
    ///
    /// 读访问得到只读页，写访问得到可读写页。页帧耗尽时返回
    /// [`VmError::OutOfMemory`]，地址空间保持不变。
    pub fn allocate_page(
        &mut self,
        vpn: VirtPageNum,
        access: Access,
    ) -> Result<PhysPageNum, VmError> {
        self.check_vpn(vpn)?;
        let task = self
            .processor
            .current_mut()
            .ok_or(VmError::InvalidProcess(None))?;
        if task.memory_set.translate(vpn).is_some() {
            return Err(VmError::AlreadyMapped(vpn));
        }
        let ppn = self.frames.alloc().ok_or_else(|| {
            warn!("alloc {:?}: out of memory", vpn);
            VmError::OutOfMemory
        })?;
        let perm = MapPermission::from(access);
        if let Err(err) = task.memory_set.map(vpn, ppn, perm) {
            self.frames.dealloc(ppn);
            return Err(err);
        }
        self.tlb.insert(vpn, ppn, perm)?;
        debug!("{:?}: alloc {:?} -> {:?} {:?}", task.pid, vpn, ppn, perm);
        Ok(ppn)
    }

    /// 释放当前进程的 `vpn`
    pub fn release_page(&mut self, vpn: VirtPageNum) -> Result<(), VmError> {
        self.check_vpn(vpn)?;
        let task = self
            .processor
            .current_mut()
            .ok_or(VmError::InvalidProcess(None))?;
        let ppn = task.memory_set.unmap(vpn)?;
        debug!("{:?}: free {:?} ({:?})", task.pid, vpn, ppn);
        self.tlb.invalidate(vpn);
        self.put_frame(ppn);
        Ok(())
    }

    /// 切换到 `pid`；进程不存在时从当前进程按需 fork
    ///
    /// 返回前 TLB 总是被清空。
    pub fn switch_to(&mut self, pid: Pid) -> SwitchKind {
        let kind = if self.processor.current_pid() == Some(pid) {
            SwitchKind::Unchanged
        } else if let Some(next) = self.manager.take(pid) {
            if let Some(prev) = self.processor.take_current() {
                self.manager.add(prev);
            }
            self.processor.set_current(next);
            SwitchKind::Resumed
        } else if let Some(mut prev) = self.processor.take_current() {
            let memory_set = MemorySet::from_existed_user(&mut prev.memory_set, &mut self.frames);
            let parent = prev.getpid();
            let child = TaskControlBlock::new(pid, memory_set);
            self.manager.add(prev);
            self.processor.set_current(child);
            SwitchKind::Forked { parent }
        } else {
            self.processor
                .set_current(TaskControlBlock::new(pid, MemorySet::new_bare(&self.config)));
            SwitchKind::Created
        };
        self.tlb.flush_all();
        info!("switch to {:?}: {:?}", pid, kind);
        kind
    }

    /// 当前进程退出：回收全部映射，并调度等待队列的队首进程
    ///
    /// 返回新的当前进程。
    pub fn exit_current(&mut self) -> Result<Option<Pid>, VmError> {
        let mut task = self
            .processor
            .take_current()
            .ok_or(VmError::InvalidProcess(None))?;
        for (_, ppn) in task.memory_set.recycle_data_pages() {
            self.put_frame(ppn);
        }
        self.tlb.flush_all();
        if let Some(next) = self.manager.fetch() {
            self.processor.set_current(next);
        }
        info!("{:?} exited, current is {:?}", task.pid, self.current_pid());
        Ok(self.current_pid())
    }

    /// 一次完整的访存：先查 TLB，再查页表，最后交给缺页处理并重试一次
    pub fn access(&mut self, vpn: VirtPageNum, access: Access) -> Result<PhysPageNum, VmError> {
        self.check_vpn(vpn)?;
        if let Some(ppn) = self.translate_via_tlb(vpn, access) {
            self.stats.tlb_hits += 1;
            return Ok(ppn);
        }
        self.stats.tlb_misses += 1;
        if let Some(ppn) = self.walk(vpn, access)? {
            return Ok(ppn);
        }
        self.handle_fault(vpn, access)?;
        self.walk(vpn, access)?
            .ok_or(VmError::ProtectionViolation { vpn, access })
    }

    /// 遍历当前页表，转换成功时回填 TLB
    fn walk(&mut self, vpn: VirtPageNum, access: Access) -> Result<Option<PhysPageNum>, VmError> {
        let space = self.processor.ptbr().ok_or(VmError::InvalidProcess(None))?;
        match space.resolve(vpn, access) {
            PteCheck::Granted(ppn, perm) => {
                self.tlb.insert(vpn, ppn, perm)?;
                Ok(Some(ppn))
            }
            _ => Ok(None),
        }
    }

    /// 页帧少了一个映射者；只剩一个映射者时立即恢复它的写权限
    fn put_frame(&mut self, ppn: PhysPageNum) {
        if self.frames.dealloc(ppn) == 1 {
            self.restore_sole_owner(ppn);
        }
    }

    /// 恢复页帧唯一映射者的原始权限
    ///
    /// 计数降到 1 的页帧总是刚被当前进程解除映射、换掉或随进程退出，
    /// 因此唯一的映射者一定在等待队列中。
    fn restore_sole_owner(&mut self, ppn: PhysPageNum) {
        debug_assert!(
            self.processor
                .ptbr()
                .map_or(true, |space| space.mappings().all(|(_, pte)| pte.ppn() != ppn)),
            "current process still maps {:?}",
            ppn
        );
        for task in self.manager.iter_mut() {
            if let Some(vpn) = task.memory_set.restore_cow_mapping(ppn) {
                debug!("{:?}: {:?} is private again", task.pid, vpn);
                return;
            }
        }
    }
}
