//! `$F` 命令族
//!
//! 宿主的命令行把以 `$F` 开头的行整行交给 [`execute`]，
//! 返回状态由宿主沿正常报告链发布。不认识的命令返回
//! `Unhandled`，让宿主继续尝试别的处理者。
//!
//! | 命令 | 含义 |
//! |------|------|
//! | `$F` | 列文件（按扩展名过滤）；`$F=<path>` 流式执行 |
//! | `$F+` | 列所有文件；`$F+=<path>` 流式执行 |
//! | `$FR` | 为下一个作业武装重绕模式 |
//! | `$FD=<path>` | 删除文件 |
//! | `$F<=<path>` | 把文件内容打到输出 |
//! | `$FM` | 挂载 SD 卡 |
//! | `$FU` | 卸载 SD 卡 |
//! | `$FF=yes` | 格式化 SD 卡 |

use api::{MotionState, Status, ASCII_EOL};
use stream::ControllerOps;
use vfs::FsError;

use crate::core::Core;

/// 执行一条 `$F` 命令
pub fn execute(core: &Core, line: &str) -> Status {
    let Some(rest) = line.strip_prefix("$F") else {
        return Status::Unhandled;
    };
    let (cmd, args) = match rest.find('=') {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };

    match cmd {
        "" => match args {
            Some(path) => core.stream_file(path, false),
            None => {
                core.job().disarm_rewind();
                core.list_files(true)
            }
        },
        "+" => match args {
            Some(path) => core.stream_file(path, false),
            None => {
                core.job().disarm_rewind();
                core.list_files(false)
            }
        },
        "R" => {
            core.job().arm_rewind();
            Status::Ok
        }
        "D" => match args {
            Some(path) => unlink(core, path),
            None => Status::Unhandled,
        },
        "<" => match args {
            Some(path) => dump(core, path),
            None => Status::Unhandled,
        },
        "M" => match core.mount_sd() {
            Ok(()) => Status::Ok,
            Err(_) => Status::SdMountError,
        },
        "U" => {
            if !core.sd().mounted() {
                Status::FsNotMounted
            } else {
                match core.unmount_sd() {
                    Ok(()) => Status::Ok,
                    Err(_) => Status::SdMountError,
                }
            }
        }
        "F" => {
            if args == Some("yes") {
                format_card(core)
            } else {
                Status::InvalidStatement
            }
        }
        _ => Status::Unhandled,
    }
}

fn idle_gate(core: &Core) -> Option<Status> {
    if !core.sd().mounted() {
        return Some(Status::FsNotMounted);
    }
    match core.motion_state() {
        MotionState::Idle | MotionState::CheckMode => None,
        _ => Some(Status::SystemGcLock),
    }
}

fn unlink(core: &Core, path: &str) -> Status {
    if let Some(status) = idle_gate(core) {
        return status;
    }
    match core.vfs().unlink(path) {
        Ok(()) => Status::Ok,
        Err(FsError::NotMounted) => Status::FsNotMounted,
        Err(FsError::ReadOnly) => Status::FsReadOnly,
        Err(_) => Status::FileReadError,
    }
}

/// 把文件打到输出，行尾游程折叠成单个 EOL
fn dump(core: &Core, path: &str) -> Status {
    if let Some(status) = idle_gate(core) {
        return status;
    }
    let file = match core.vfs().open(path, "r") {
        Ok(file) => file,
        Err(_) => return Status::FileOpenFailed,
    };

    let ops = core.ops();
    let mut buf = [0u8; 64];
    let mut eol_run = 0u32;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => {
                let _ = file.close();
                return Status::FileReadError;
            }
        };
        for &c in &buf[..n] {
            if c == b'\r' || c == b'\n' {
                if eol_run == 0 {
                    ops.write(ASCII_EOL);
                }
                eol_run += 1;
            } else {
                eol_run = 0;
                ops.write_char(c);
            }
        }
    }
    let _ = file.close();
    Status::Ok
}

fn format_card(core: &Core) -> Status {
    if let Some(status) = idle_gate(core) {
        return status;
    }
    if core.fs_busy() {
        return Status::SystemGcLock;
    }
    match core.vfs().format("/") {
        Ok(()) => Status::Ok,
        Err(_) => Status::FsFormatFailed,
    }
}
