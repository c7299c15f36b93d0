//! 实现 [`FrameAllocator`]，记录每个物理页帧被多少个虚拟页映射。
use super::PhysPageNum;

/// 物理页帧分配器的接口
pub trait FrameAllocator {
    /// 分配一个空闲页帧，映射计数置为 1
    fn alloc(&mut self) -> Option<PhysPageNum>;
    /// 页帧多了一个映射者
    fn share(&mut self, ppn: PhysPageNum);
    /// 页帧少了一个映射者，返回剩余的映射计数
    fn dealloc(&mut self, ppn: PhysPageNum) -> usize;
    /// 当前映射计数
    fn map_count(&self, ppn: PhysPageNum) -> usize;
}

/// 基于映射计数的页帧分配器
///
/// 计数为 0 的页帧即为空闲，分配时总是选取编号最小的空闲页帧，
/// 因此同一条访存序列总能得到相同的分配结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapCountAllocator {
    mapcounts: Vec<usize>, // 每个页帧的映射计数
}

impl MapCountAllocator {
    /// 创建拥有 `nr_frames` 个空闲页帧的分配器
    pub fn new(nr_frames: usize) -> Self {
        Self {
            mapcounts: vec![0; nr_frames],
        }
    }

    /// 编号最小的空闲页帧
    pub fn lowest_free(&self) -> Option<PhysPageNum> {
        lowest_index(&self.mapcounts, |count| *count == 0).map(PhysPageNum)
    }

    /// 页帧总数
    pub fn nr_frames(&self) -> usize {
        self.mapcounts.len()
    }

    /// 空闲页帧数
    pub fn free_frames(&self) -> usize {
        self.mapcounts.iter().filter(|count| **count == 0).count()
    }

    /// 依次列出所有页帧及其映射计数
    pub fn iter(&self) -> impl Iterator<Item = (PhysPageNum, usize)> + '_ {
        self.mapcounts
            .iter()
            .enumerate()
            .map(|(pfn, count)| (PhysPageNum(pfn), *count))
    }
}

impl FrameAllocator for MapCountAllocator {
    fn alloc(&mut self) -> Option<PhysPageNum> {
        let ppn = self.lowest_free()?;
        self.mapcounts[ppn.0] = 1;
        trace!("frame allocator: alloc {:?}", ppn);
        Some(ppn)
    }

    fn share(&mut self, ppn: PhysPageNum) {
        let count = &mut self.mapcounts[ppn.0];
        assert!(*count > 0, "Frame {:?} is shared before allocation!", ppn);
        *count += 1;
    }

    fn dealloc(&mut self, ppn: PhysPageNum) -> usize {
        let count = &mut self.mapcounts[ppn.0];
        if *count == 0 {
            panic!("Frame {:?} has not been allocated!", ppn);
        }
        *count -= 1;
        if *count == 0 {
            trace!("frame allocator: {:?} back to the free pool", ppn);
        }
        *count
    }

    fn map_count(&self, ppn: PhysPageNum) -> usize {
        self.mapcounts.get(ppn.0).copied().unwrap_or(0)
    }
}

/// FrameAllocator 的实现类型
pub type FrameAllocatorImpl = MapCountAllocator;

/// 在满足条件的元素中选出下标最小者
fn lowest_index<T, F>(items: &[T], mut pred: F) -> Option<usize>
where
    F: FnMut(&T) -> bool,
{
    items.iter().position(|item| pred(item))
}
