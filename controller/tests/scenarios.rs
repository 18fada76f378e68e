//! 端到端场景：真实 FAT 后端 + 模拟宿主，从 `$F` 命令一路
//! 走到解析器字节流与连接输出。

use std::sync::Arc;

use api::{
    crc16_ccitt, FsSettings, MotionState, ProgramFlow, Status, ASCII_ACK, ASCII_CAN, ASCII_EOT,
    ASCII_SOH,
};
use controller::{cli, Core, Host};
use device::RamDisk;
use fs::{FatFs, FlashFs};
use stream::SourceLayer;
use sync::SpinLock;
use vfs::{FileSystem, MountFlags, OpenMode};

struct MockHost {
    state: SpinLock<MotionState>,
    check_mode: SpinLock<bool>,
    out: SpinLock<Vec<u8>>,
    now: SpinLock<u64>,
    call_pops: SpinLock<usize>,
}

impl MockHost {
    fn new() -> Arc<Self> {
        Arc::new(MockHost {
            state: SpinLock::new(MotionState::Idle),
            check_mode: SpinLock::new(false),
            out: SpinLock::new(Vec::new()),
            now: SpinLock::new(0),
            call_pops: SpinLock::new(0),
        })
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.out.lock()).into_owned()
    }

    fn raw_output(&self) -> Vec<u8> {
        self.out.lock().clone()
    }

    fn clear_output(&self) {
        self.out.lock().clear();
    }
}

impl Host for MockHost {
    fn motion_state(&self) -> MotionState {
        if *self.check_mode.lock() {
            MotionState::CheckMode
        } else {
            *self.state.lock()
        }
    }

    fn write(&self, text: &str) {
        self.out.lock().extend_from_slice(text.as_bytes());
    }

    fn write_char(&self, c: u8) {
        self.out.lock().push(c);
    }

    fn elapsed_ms(&self) -> u64 {
        *self.now.lock()
    }

    fn set_check_mode(&self, on: bool) {
        *self.check_mode.lock() = on;
    }

    fn ngc_call_pop(&self) {
        *self.call_pops.lock() += 1;
    }
}

fn setup(files: &[(&str, &[u8])]) -> (Arc<Core>, Arc<MockHost>) {
    let disk = RamDisk::new(1024 * 1024, 512);
    let fat = FatFs::new(disk, None);
    fat.format().unwrap();
    for (path, content) in files {
        let f = fat.open(path, OpenMode::parse("w")).unwrap();
        assert_eq!(f.write(content).unwrap(), content.len());
        f.close().unwrap();
    }
    let host = MockHost::new();
    let core = Core::new(host.clone(), fat, None);
    core.mount_sd().unwrap();
    // drain the mount-changed flag so it does not leak into assertions
    let _ = core.report_suffix(false);
    (core, host)
}

/// Minimal stand-in for the G-code parser: assembles lines, reports
/// a status per line and drives program-flow notifications.
fn run_parser(core: &Core, mut on_line: impl FnMut(&Core, &str) -> Status) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cur: Vec<u8> = Vec::new();
    let mut stalls = 0;
    loop {
        match core.read_input() {
            Some(c) => {
                stalls = 0;
                if c == b'\n' || c == b'\r' {
                    if !cur.is_empty() {
                        let line = String::from_utf8(cur.clone()).unwrap();
                        cur.clear();
                        let status = on_line(core, &line);
                        core.report_status(status);
                        lines.push(line);
                    }
                } else {
                    cur.push(c);
                }
            }
            None => {
                stalls += 1;
                if stalls > 4 {
                    break;
                }
            }
        }
    }
    lines
}

fn gcode_line(core: &Core, line: &str) -> Status {
    if let Some(rest) = line.strip_prefix("G65 P") {
        let id: u32 = rest.trim().parse().unwrap();
        return core.execute_macro(id, &Default::default(), 1);
    }
    match line {
        "M30" => {
            core.program_completed(ProgramFlow::CompletedM30, false);
            Status::Ok
        }
        "M2" => {
            core.program_completed(ProgramFlow::CompletedM2, false);
            Status::Ok
        }
        "BADCMD" => Status::ExpectedGcodeWord,
        _ => Status::Ok,
    }
}

#[test]
fn s1_happy_path() {
    let (core, host) = setup(&[("/hello.nc", b"G1 X1\nG1 X2\nM30\n")]);

    assert_eq!(cli::execute(&core, "$F=/hello.nc"), Status::Ok);
    // the command is confirmed before input is redirected
    assert_eq!(host.output(), "ok\r\n");
    assert!(core.fs_busy());

    // realtime report carries progress and the job name
    let suffix = core.report_suffix(false);
    assert!(suffix.contains(",hello.nc"), "suffix was {suffix}");

    let mut last_pos = 0;
    let mut line_at_m30 = 0;
    let lines = run_parser(&core, |core, line| {
        let info = core.job_info().unwrap();
        assert!(info.pos >= last_pos, "pos must be monotonic");
        last_pos = info.pos;
        if line == "M30" {
            line_at_m30 = info.line;
            assert_eq!(info.pos, info.size, "pos == size at EOF");
        }
        gcode_line(core, line)
    });

    assert_eq!(lines, ["G1 X1", "G1 X2", "M30"]);
    assert_eq!(line_at_m30, 3);
    assert!(!core.fs_busy());
    assert!(core.job_info().is_none());
}

#[test]
fn s2_missing_trailing_newline() {
    let (core, host) = setup(&[("/noeol.nc", b"G1 X1")]);

    assert_eq!(core.stream_file("/noeol.nc", false), Status::Ok);

    let mut line_count = 0;
    let lines = run_parser(&core, |core, _line| {
        line_count = core.job_info().map(|i| i.line).unwrap_or(0);
        Status::Ok
    });

    // parser saw the content with exactly one synthesized terminator
    assert_eq!(lines, ["G1 X1"]);
    assert!(line_count >= 1);
    // file exhausted without an M2/M30: auto-completes once idle
    assert!(host.output().contains("[MSG:Pgm End]"));
    assert!(!core.fs_busy());
}

#[test]
fn s3_mid_file_error_terminates_job() {
    let (core, host) = setup(&[("/bad.nc", b"G1 X1\nBADCMD\nG1 X2\n")]);

    assert_eq!(core.stream_file("/bad.nc", false), Status::Ok);
    host.clear_output();

    let lines = run_parser(&core, gcode_line);

    // the bad line is reported with its line number, then the job ends
    let out = host.output();
    assert!(
        out.contains(&format!(
            "error:{} in SD file at line 2",
            Status::ExpectedGcodeWord.code()
        )),
        "output was {out}"
    );
    assert!(out.contains("error:36\r\n"));
    // G1 X2 was never delivered
    assert_eq!(lines, ["G1 X1", "BADCMD"]);
    assert!(!core.fs_busy());

    // the subsystem is reusable immediately
    assert_eq!(core.stream_file("/bad.nc", false), Status::Ok);
    core.job().end_job(true);
}

#[test]
fn s4_rewind_and_cycle_start() {
    let (core, host) = setup(&[("/loop.nc", b"G1 X1\nM2\n")]);

    // arming twice is the same as arming once
    assert_eq!(cli::execute(&core, "$FR"), Status::Ok);
    assert_eq!(cli::execute(&core, "$FR"), Status::Ok);
    assert_eq!(core.stream_file("/loop.nc", false), Status::Ok);

    run_parser(&core, gcode_line);

    // after M2 the job waits for cycle start instead of ending
    assert_eq!(core.router().top(), Some(SourceLayer::AwaitCycleStart));
    assert_eq!(core.report_suffix(false), "|SD:Pending");
    assert!(host
        .output()
        .contains("[MSG:Press cycle start to rerun job]"));

    // cycle start restreams from byte 0
    core.input_byte(b'~');
    assert_eq!(core.router().top(), Some(SourceLayer::File));
    let info = core.job_info().unwrap();
    assert_eq!(info.pos, 0);

    let lines = run_parser(&core, gcode_line);
    assert_eq!(lines, ["G1 X1", "M2"]);
    assert_eq!(core.router().top(), Some(SourceLayer::AwaitCycleStart));

    core.job().end_job(true);
    assert!(!core.fs_busy());
}

#[test]
fn s5_macro_nesting() {
    let (core, _host) = setup(&[
        ("/P100.macro", b"G1 X1\nG65 P101\nG1 X3\n"),
        ("/P101.macro", b"G1 X2\n"),
    ]);

    assert_eq!(
        core.execute_macro(100, &Default::default(), 1),
        Status::Ok
    );
    assert_eq!(core.router().top(), Some(SourceLayer::Macro));

    let mut max_depth = 0;
    let lines = run_parser(&core, |core, line| {
        let status = gcode_line(core, line);
        max_depth = max_depth.max(core.macros().depth());
        status
    });

    assert_eq!(lines, ["G1 X1", "G65 P101", "G1 X2", "G1 X3"]);
    assert_eq!(max_depth, 2);
    assert_eq!(core.macros().depth(), 0);
    // redirection fully unwound
    assert_eq!(core.router().top(), None);
}

#[test]
fn s5b_macro_error_unwinds_stack() {
    let (core, host) = setup(&[("/P100.macro", b"G1 X1\nBADCMD\n")]);

    assert_eq!(
        core.execute_macro(100, &Default::default(), 1),
        Status::Ok
    );
    host.clear_output();

    run_parser(&core, gcode_line);

    let out = host.output();
    assert!(
        out.contains("error 36 in macro P100.macro"),
        "output was {out}"
    );
    assert_eq!(core.macros().depth(), 0);
    assert_eq!(core.router().top(), None);
}

#[test]
fn macro_eof_without_m99_pops_call_frame() {
    let (core, host) = setup(&[("/P100.macro", b"G1 X1\nG1 X2\n")]);

    assert_eq!(core.execute_macro(100, &Default::default(), 1), Status::Ok);
    let lines = run_parser(&core, gcode_line);

    assert_eq!(lines, ["G1 X1", "G1 X2"]);
    assert_eq!(core.macros().depth(), 0);
    // the parser-side call level came back down too
    assert_eq!(*host.call_pops.lock(), 1);
}

#[test]
fn tool_select_skips_t0_unless_enabled() {
    let (core, _host) = setup(&[("/ts.macro", b"G1 X9\n")]);

    // T0 with the setting bit clear leaves the macro alone
    assert_eq!(core.macros().tool_select(0), Status::Unhandled);
    assert_eq!(core.macros().depth(), 0);

    assert_eq!(core.macros().tool_select(2), Status::Ok);
    assert_eq!(run_parser(&core, gcode_line), ["G1 X9"]);

    core.set_fs_settings(FsSettings::default() | FsSettings::TC_MACRO_ON_T0);
    assert_eq!(core.macros().tool_select(0), Status::Ok);
    assert_eq!(run_parser(&core, gcode_line), ["G1 X9"]);
}

fn ymodem_packet(soh: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = if soh == 0x01 { 128 } else { 1024 };
    assert_eq!(payload.len(), len);
    let mut pkt = vec![soh, seq, !seq];
    pkt.extend_from_slice(payload);
    let crc = crc16_ccitt(payload);
    pkt.push((crc >> 8) as u8);
    pkt.push(crc as u8);
    pkt
}

#[test]
fn s6_ymodem_round_trip() {
    let (core, host) = setup(&[]);

    let content: Vec<u8> = (0..42u8).map(|i| b'A' + (i % 26)).collect();

    let mut header = Vec::new();
    header.extend_from_slice(b"upload.nc\0");
    header.extend_from_slice(b"42");
    header.resize(128, 0);

    let mut data = content.clone();
    data.resize(128, 0x1A);

    for b in ymodem_packet(0x01, 0, &header) {
        core.input_byte(b);
    }
    for b in ymodem_packet(0x01, 1, &data) {
        core.input_byte(b);
    }
    core.input_byte(ASCII_EOT);
    core.input_byte(ASCII_EOT);
    core.poll();

    // ACK C (header) / ACK (data) / ACK C (first EOT) / ACK (batch end)
    assert_eq!(
        host.raw_output(),
        vec![ASCII_ACK, b'C', ASCII_ACK, ASCII_ACK, b'C', ASCII_ACK]
    );
    assert!(!core.ymodem().active());
    assert_eq!(core.router().top(), None);

    let info = core.vfs().stat("/upload.nc").unwrap();
    assert_eq!(info.size, 42);
    let f = core.vfs().open("/upload.nc", "r").unwrap();
    let mut buf = [0u8; 64];
    let n = f.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], &content[..]);
}

#[test]
fn ymodem_retransmitted_packet_is_acked_once_written() {
    let (core, host) = setup(&[]);

    let mut header = Vec::new();
    header.extend_from_slice(b"dup.nc\0");
    header.extend_from_slice(b"5");
    header.resize(128, 0);

    let mut data = b"12345".to_vec();
    data.resize(128, 0);

    for b in ymodem_packet(0x01, 0, &header) {
        core.input_byte(b);
    }
    // same data packet twice: sender missed our ACK
    for b in ymodem_packet(0x01, 1, &data) {
        core.input_byte(b);
    }
    for b in ymodem_packet(0x01, 1, &data) {
        core.input_byte(b);
    }
    core.input_byte(ASCII_EOT);
    core.input_byte(ASCII_EOT);
    core.poll();

    assert!(host
        .raw_output()
        .starts_with(&[ASCII_ACK, b'C', ASCII_ACK, ASCII_ACK]));
    let info = core.vfs().stat("/dup.nc").unwrap();
    assert_eq!(info.size, 5);
}

#[test]
fn ymodem_sender_cancel_releases_input() {
    let (core, host) = setup(&[]);

    let mut header = Vec::new();
    header.extend_from_slice(b"half.nc\0");
    header.extend_from_slice(b"256");
    header.resize(128, 0);
    for b in ymodem_packet(0x01, 0, &header) {
        core.input_byte(b);
    }
    core.input_byte(ASCII_CAN);
    core.input_byte(ASCII_CAN);
    core.poll();

    assert!(!core.ymodem().active());
    assert_eq!(core.router().top(), None);

    // serial input flows again after the aborted transfer
    host.clear_output();
    core.input_byte(b'G');
    assert_eq!(core.read_input(), Some(b'G'));
}

#[test]
fn soh_during_file_job_is_dropped() {
    let (core, _host) = setup(&[("/job.nc", b"G1 X1\nM30\n")]);

    assert_eq!(core.stream_file("/job.nc", false), Status::Ok);
    core.input_byte(ASCII_SOH);

    assert!(!core.ymodem().active());
    assert_eq!(core.router().top(), Some(SourceLayer::File));

    // the job streams to completion untouched
    assert_eq!(run_parser(&core, gcode_line), ["G1 X1", "M30"]);
    assert!(!core.fs_busy());
}

#[test]
fn dump_collapses_line_endings() {
    let (core, host) = setup(&[("/dump.nc", b"G1 X1\r\nG1 X2\n")]);

    host.clear_output();
    assert_eq!(cli::execute(&core, "$F<=/dump.nc"), Status::Ok);
    assert_eq!(host.output(), "G1 X1\r\nG1 X2\r\n");
}

#[test]
fn listing_reports_and_tags_entries() {
    let (core, host) = setup(&[
        ("/part.nc", b"G1\n"),
        ("/readme.md", b"hi"),
    ]);
    core.vfs().mkdir("/jobs").unwrap();
    {
        let f = core
            .vfs()
            .open("/jobs/deep.gcode", "w")
            .unwrap();
        f.write(b"G0\n").unwrap();
        f.close().unwrap();
    }

    host.clear_output();
    assert_eq!(cli::execute(&core, "$F"), Status::Ok);
    let out = host.output();
    assert!(out.contains("[FILE:/part.nc|SIZE:3]"), "output was {out}");
    assert!(out.contains("[FILE:/jobs|SIZE:-1]"));
    assert!(out.contains("[FILE:/jobs/deep.gcode|SIZE:3]"));
    // filtered listing drops non-gcode extensions
    assert!(!out.contains("readme.md"));

    host.clear_output();
    assert_eq!(cli::execute(&core, "$F+"), Status::Ok);
    assert!(host.output().contains("readme.md"));
}

#[test]
fn listing_shows_mounted_volumes_as_directories() {
    let (core, host) = setup(&[("/part.nc", b"G1\n")]);
    let flash = FlashFs::new(256, 64, None);
    core.vfs()
        .mount("/littlefs", flash.clone(), MountFlags::empty())
        .unwrap();
    {
        let f = core.vfs().open("/littlefs/P100.macro", "w").unwrap();
        f.write(b"G1 X1\n").unwrap();
        f.close().unwrap();
    }

    host.clear_output();
    assert_eq!(cli::execute(&core, "$F"), Status::Ok);
    let out = host.output();
    assert!(out.contains("[FILE:/littlefs|SIZE:-1]"), "output was {out}");
    assert!(out.contains("[FILE:/littlefs/P100.macro|SIZE:6]"));

    // a hidden volume stays out of the listing
    core.vfs().unmount("/littlefs").unwrap();
    core.vfs()
        .mount("/littlefs", flash, MountFlags::HIDDEN)
        .unwrap();
    host.clear_output();
    assert_eq!(cli::execute(&core, "$F"), Status::Ok);
    assert!(!host.output().contains("littlefs"));
}

#[test]
fn unmount_then_commands_fail() {
    let (core, _host) = setup(&[("/a.nc", b"G1\n")]);

    assert_eq!(cli::execute(&core, "$FU"), Status::Ok);
    assert_eq!(core.list_files(true), Status::FsNotMounted);
    assert_eq!(core.stream_file("/a.nc", false), Status::FsNotMounted);
    assert_eq!(cli::execute(&core, "$FU"), Status::FsNotMounted);

    // remount brings everything back
    assert_eq!(cli::execute(&core, "$FM"), Status::Ok);
    assert_eq!(core.stream_file("/a.nc", false), Status::Ok);
    core.job().end_job(true);
}

#[test]
fn busy_state_blocks_job_start() {
    let (core, host) = setup(&[("/a.nc", b"G1\n")]);

    *host.state.lock() = MotionState::Cycle;
    assert_eq!(core.stream_file("/a.nc", false), Status::SystemGcLock);

    *host.state.lock() = MotionState::Alarm;
    assert_eq!(core.stream_file("/a.nc", false), Status::SystemGcLock);

    *host.state.lock() = MotionState::Idle;
    assert_eq!(core.stream_file("/a.nc", false), Status::Ok);
    core.job().end_job(true);
}

#[test]
fn prescan_runs_file_twice_in_check_mode() {
    let (core, host) = setup(&[("/sub.nc", b"G1 X1\nM30\n")]);
    core.set_fs_settings(FsSettings::default() | FsSettings::M98_PRESCAN);

    assert_eq!(core.stream_file("/sub.nc", false), Status::Ok);
    // prescan switched the parser into check mode
    assert!(*host.check_mode.lock());

    let mut seen = Vec::new();
    run_parser(&core, |core, line| {
        seen.push((line.to_string(), core.motion_state()));
        gcode_line(core, line)
    });

    // the file went through twice: once checked, once for real
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0].1, MotionState::CheckMode);
    assert_eq!(seen[2].1, MotionState::Idle);
    assert!(!*host.check_mode.lock());
}

#[test]
fn reset_during_stream_reports_line() {
    let (core, host) = setup(&[("/long.nc", b"G1 X1\nG1 X2\nG1 X3\n")]);

    assert_eq!(core.stream_file("/long.nc", false), Status::Ok);
    // deliver the first line only
    let mut delivered = 0;
    while delivered < 6 {
        if core.read_input().is_some() {
            delivered += 1;
        }
    }
    host.clear_output();

    core.input_byte(0x18); // CMD_RESET
    let out = host.output();
    assert!(
        out.contains("Reset during streaming of file at line: 1"),
        "output was {out}"
    );
    assert!(!core.fs_busy());
}
