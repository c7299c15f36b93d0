//! 访存轨迹的解析与执行
//!
//! 每行一条命令，`#` 开头的记号及其后的内容为注释：
//!
//! ```text
//! alloc <vpn> r|rw   分配页
//! free <vpn>         释放页
//! read <vpn>         读访问
//! write <vpn>        写访问
//! switch <pid>       切换进程，不存在时 fork
//! exit               当前进程退出
//! show | pages | tlb | stats
//! ```

use crate::error::VmError;
use crate::machine::{Machine, SwitchKind};
use crate::mm::{Access, MapPermission, VirtPageNum};
use crate::task::Pid;
use std::io::{self, Write};
use thiserror::Error;

/// 一条轨迹命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Alloc(VirtPageNum, Access),
    Free(VirtPageNum),
    Access(VirtPageNum, Access),
    Switch(Pid),
    Exit,
    /// 打印当前进程的页表
    Show,
    /// 打印页帧映射计数
    Pages,
    /// 打印 TLB
    Tlb,
    Stats,
}

/// 轨迹解析错误
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("line {line}: unknown command `{command}`")]
    UnknownCommand { line: usize, command: String },
    #[error("line {line}: `{command}` expects {expected}")]
    BadArguments {
        line: usize,
        command: String,
        expected: &'static str,
    },
    #[error("line {line}: invalid number `{token}`")]
    BadNumber { line: usize, token: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 按空白切分一行，丢弃注释
pub fn parse_command(line: &str) -> Vec<&str> {
    line.split_whitespace()
        .take_while(|token| !token.starts_with('#'))
        .collect()
}

fn parse_number(line: usize, token: &str) -> Result<usize, TraceError> {
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| TraceError::BadNumber {
        line,
        token: token.to_string(),
    })
}

/// 解析一行，空行与纯注释行返回 `None`
pub fn parse_line(line: usize, text: &str) -> Result<Option<Command>, TraceError> {
    let tokens = parse_command(text);
    let Some((&name, args)) = tokens.split_first() else {
        return Ok(None);
    };
    let bad_args = |expected| TraceError::BadArguments {
        line,
        command: name.to_string(),
        expected,
    };
    let command = match (name, args) {
        ("alloc", [vpn, perm]) => {
            let access = match *perm {
                "r" => Access::Read,
                "rw" | "w" => Access::Write,
                _ => return Err(bad_args("a vpn and r|rw")),
            };
            Command::Alloc(VirtPageNum(parse_number(line, vpn)?), access)
        }
        ("alloc", _) => return Err(bad_args("a vpn and r|rw")),
        ("free", [vpn]) => Command::Free(VirtPageNum(parse_number(line, vpn)?)),
        ("read", [vpn]) => Command::Access(VirtPageNum(parse_number(line, vpn)?), Access::Read),
        ("write", [vpn]) => {
            Command::Access(VirtPageNum(parse_number(line, vpn)?), Access::Write)
        }
        ("free" | "read" | "write", _) => return Err(bad_args("a vpn")),
        ("switch", [pid]) => Command::Switch(Pid(parse_number(line, pid)?)),
        ("switch", _) => return Err(bad_args("a pid")),
        ("exit", []) => Command::Exit,
        ("show", []) => Command::Show,
        ("pages", []) => Command::Pages,
        ("tlb", []) => Command::Tlb,
        ("stats", []) => Command::Stats,
        ("exit" | "show" | "pages" | "tlb" | "stats", _) => return Err(bad_args("no arguments")),
        _ => {
            return Err(TraceError::UnknownCommand {
                line,
                command: name.to_string(),
            })
        }
    };
    Ok(Some(command))
}

/// 解析整个轨迹，行号从 1 开始
pub fn parse(source: &str) -> Result<Vec<Command>, TraceError> {
    let mut commands = Vec::new();
    for (idx, text) in source.lines().enumerate() {
        if let Some(command) = parse_line(idx + 1, text)? {
            commands.push(command);
        }
    }
    Ok(commands)
}

fn perm_str(perm: MapPermission) -> &'static str {
    match (perm.contains(MapPermission::R), perm.contains(MapPermission::W)) {
        (true, true) => "rw",
        (true, false) => "r-",
        (false, true) => "-w",
        (false, false) => "--",
    }
}

fn access_str(access: Access) -> &'static str {
    match access {
        Access::Read => "read",
        Access::Write => "write",
    }
}

/// 依次执行命令并输出报告
///
/// 单条命令失败只会被报告，不会中断后续命令。
pub fn run<W: Write>(machine: &mut Machine, commands: &[Command], out: &mut W) -> io::Result<()> {
    for command in commands {
        execute(machine, *command, out)?;
    }
    Ok(())
}

fn report<W: Write>(out: &mut W, what: &str, result: Result<String, VmError>) -> io::Result<()> {
    match result {
        Ok(done) => writeln!(out, "{} -> {}", what, done),
        Err(err) => writeln!(out, "{}: {}", what, err),
    }
}

fn execute<W: Write>(machine: &mut Machine, command: Command, out: &mut W) -> io::Result<()> {
    match command {
        Command::Alloc(vpn, access) => {
            let what = format!("alloc {} {}", vpn.0, perm_str(access.into()));
            let result = machine
                .allocate_page(vpn, access)
                .map(|ppn| format!("pfn {}", ppn.0));
            report(out, &what, result)
        }
        Command::Free(vpn) => {
            let what = format!("free {}", vpn.0);
            report(out, &what, machine.release_page(vpn).map(|_| "ok".to_string()))
        }
        Command::Access(vpn, access) => {
            let what = format!("{} {}", access_str(access), vpn.0);
            let result = machine.access(vpn, access).map(|ppn| format!("pfn {}", ppn.0));
            report(out, &what, result)
        }
        Command::Switch(pid) => {
            let done = match machine.switch_to(pid) {
                SwitchKind::Unchanged => "already running".to_string(),
                SwitchKind::Resumed => "resumed".to_string(),
                SwitchKind::Forked { parent } => format!("forked from pid {}", parent.0),
                SwitchKind::Created => "created".to_string(),
            };
            report(out, &format!("switch {}", pid.0), Ok(done))
        }
        Command::Exit => {
            let result = machine.exit_current().map(|next| match next {
                Some(pid) => format!("pid {} running", pid.0),
                None => "no process left".to_string(),
            });
            report(out, "exit", result)
        }
        Command::Show => {
            let Some(pid) = machine.current_pid() else {
                return writeln!(out, "show: no current process");
            };
            let Some(space) = machine.memory_set(pid) else {
                return Ok(());
            };
            writeln!(
                out,
                "page table of pid {} ({} directories)",
                pid.0,
                space.nr_directories()
            )?;
            for (vpn, pte) in space.mappings() {
                writeln!(
                    out,
                    "  vpn {:>4} -> pfn {:>4}  {} (origin {})",
                    vpn.0,
                    pte.ppn().0,
                    perm_str(pte.permission()),
                    perm_str(pte.origin_permission()),
                )?;
            }
            Ok(())
        }
        Command::Pages => {
            let frames = machine.frames();
            writeln!(
                out,
                "page frames: {} of {} free",
                frames.free_frames(),
                frames.nr_frames()
            )?;
            for (ppn, count) in frames.iter().filter(|(_, count)| *count > 0) {
                writeln!(out, "  pfn {:>4}: {}", ppn.0, count)?;
            }
            Ok(())
        }
        Command::Tlb => {
            writeln!(out, "tlb")?;
            for entry in machine.tlb().valid_entries() {
                writeln!(
                    out,
                    "  vpn {:>4} -> pfn {:>4}  {}",
                    entry.vpn.0,
                    entry.ppn.0,
                    perm_str(entry.perm)
                )?;
            }
            Ok(())
        }
        Command::Stats => {
            let stats = machine.stats();
            writeln!(
                out,
                "tlb hits {}, tlb misses {}, page faults {}, cow faults {}, protection faults {}",
                stats.tlb_hits,
                stats.tlb_misses,
                stats.page_faults,
                stats.cow_faults,
                stats.protection_faults
            )
        }
    }
}
