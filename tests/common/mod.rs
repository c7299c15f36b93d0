use std::collections::HashMap;
use vmsim::mm::{MapPermission, PhysPageNum};
use vmsim::{Machine, SimConfig};

pub fn small_machine(nr_frames: usize) -> Machine {
    Machine::new(SimConfig {
        tlb_entries: 16,
        ptes_per_dir: 4,
        dirs_per_space: 4,
        nr_frames,
    })
    .unwrap()
}

/// 检查整机状态的一致性
///
/// - 每个页帧的映射计数等于引用它的页表项个数
/// - 被多个页表项共享的页帧在所有映射中都不可写
/// - TLB 中的转换都来自当前页表，权限不超过页表项
pub fn check_invariants(machine: &Machine) {
    let mut refs: HashMap<PhysPageNum, usize> = HashMap::new();
    for task in machine.processes() {
        for (_, pte) in task.memory_set.mappings() {
            *refs.entry(pte.ppn()).or_default() += 1;
        }
    }
    for (ppn, count) in machine.frames().iter() {
        assert_eq!(
            refs.get(&ppn).copied().unwrap_or(0),
            count,
            "map count of {:?} disagrees with the page tables",
            ppn
        );
    }
    for task in machine.processes() {
        for (vpn, pte) in task.memory_set.mappings() {
            if machine.map_count(pte.ppn()) > 1 {
                assert!(
                    !pte.writable(),
                    "{:?} of {:?} is writable while {:?} is shared",
                    vpn,
                    task.pid,
                    pte.ppn()
                );
            }
        }
    }
    let current = machine.current_pid();
    for entry in machine.tlb().valid_entries() {
        let pte = current
            .and_then(|pid| machine.pte(pid, entry.vpn))
            .unwrap_or_else(|| panic!("stale tlb entry for {:?}", entry.vpn));
        assert_eq!(entry.ppn, pte.ppn());
        assert!(pte.permission().contains(entry.perm));
        if entry.perm.contains(MapPermission::W) {
            assert_eq!(machine.map_count(entry.ppn), 1);
        }
    }
}
