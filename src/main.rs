// 命令行入口：读取访存轨迹并在模拟器上逐条执行
extern crate clap;
use clap::{App, Arg, ArgMatches};
use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;
use vmsim::trace::{self, TraceError};
use vmsim::{logging, Machine, SimConfig};

fn parse_usize(matches: &ArgMatches, name: &str, default: usize) -> Result<usize, String> {
    match matches.value_of(name) {
        Some(value) => value
            .parse()
            .map_err(|_| format!("--{} expects a number, got `{}`", name, value)),
        None => Ok(default),
    }
}

fn config_from(matches: &ArgMatches) -> Result<SimConfig, String> {
    let default = SimConfig::default();
    let ptes_per_dir = parse_usize(matches, "ptes-per-dir", default.ptes_per_dir)?;
    let dirs_per_space = parse_usize(matches, "dirs", default.dirs_per_space)?;
    Ok(SimConfig {
        // 未指定时 TLB 恰好覆盖整个地址空间；乘积溢出的配置随后由 validate 拒绝
        tlb_entries: parse_usize(
            matches,
            "tlb-entries",
            ptes_per_dir.checked_mul(dirs_per_space).unwrap_or(0),
        )?,
        ptes_per_dir,
        dirs_per_space,
        nr_frames: parse_usize(matches, "frames", default.nr_frames)?,
    })
}

fn read_trace(path: Option<&str>) -> Result<String, TraceError> {
    let mut source = String::new();
    match path {
        Some(path) => source = fs::read_to_string(path)?,
        None => {
            io::stdin().read_to_string(&mut source)?;
        }
    }
    Ok(source)
}

fn main() -> ExitCode {
    // 解析命令行参数
    let matches = App::new("vmsim")
        .about("Copy-on-write virtual memory simulator")
        .arg(
            Arg::with_name("trace")
                .index(1)
                .help("Trace file to execute, read from stdin when omitted"),
        )
        .arg(
            Arg::with_name("frames")
                .short("f")
                .long("frames")
                .takes_value(true)
                .help("Number of physical page frames"),
        )
        .arg(
            Arg::with_name("tlb-entries")
                .short("t")
                .long("tlb-entries")
                .takes_value(true)
                .help("Number of TLB entries"),
        )
        .arg(
            Arg::with_name("ptes-per-dir")
                .short("p")
                .long("ptes-per-dir")
                .takes_value(true)
                .help("Page table entries per page directory"),
        )
        .arg(
            Arg::with_name("dirs")
                .short("d")
                .long("dirs")
                .takes_value(true)
                .help("Page directories per address space"),
        )
        .get_matches();

    if let Err(err) = logging::init() {
        eprintln!("vmsim: {}", err);
    }
    let config = match config_from(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("vmsim: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let mut machine = match Machine::new(config) {
        Ok(machine) => machine,
        Err(err) => {
            eprintln!("vmsim: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let commands = match read_trace(matches.value_of("trace")).and_then(|src| trace::parse(&src)) {
        Ok(commands) => commands,
        Err(err) => {
            eprintln!("vmsim: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let stdout = io::stdout();
    if let Err(err) = trace::run(&mut machine, &commands, &mut stdout.lock()) {
        eprintln!("vmsim: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
