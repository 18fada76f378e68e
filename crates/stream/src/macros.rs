//! G65 宏引擎
//!
//! 把宏编号解析成卷上的 `P{id}.macro` 文件并将其内容作为
//! 控制器输入执行。宏可以再调用宏，调用栈深度有上限；栈上
//! 每一帧对应一个打开的宏文件。编号低于 100 的宏是内建
//! 操作（读设置、读写 NGC 参数、读刀偏），不涉及文件。
//!
//! 换刀（tc.macro）、选刀（ts.macro）与托盘交换（ps.macro）
//! 钩子通过挂载观察者发现：卷挂上来时探测对应文件并认领，
//! 卷卸载时释放。

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use api::{FsSettings, MessageKind, Status};
use sync::SpinLock;
use vfs::{Mount, MountObserver, Vfs};

use crate::ops::ControllerOps;
use crate::reader::{FileReader, ReadOutcome};
use crate::source::{InputRouter, SourceLayer};

/// 宏调用栈深度上限
pub const MACRO_STACK_DEPTH: usize = 5;

/// G65 字参数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MacroArgs {
    /// Q 字
    pub q: Option<f32>,
    /// R 字
    pub r: Option<f32>,
    /// S 字
    pub s: Option<f32>,
}

/// [`MacroEngine::read`] 的产出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroRead {
    /// 下一个宏字节
    Byte(u8),
    /// 本轮无数据
    NoData,
    /// 一个宏执行完毕，携带其最后一条状态
    ///
    /// 调用方需把状态沿宏层以下的报告链发出去。
    Finished(Status),
}

/// 宏状态陷阱的裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapResult {
    /// 宏未在执行，陷阱不接手
    NotMine,
    /// 状态被吞掉，宏继续执行
    Swallowed,
    /// 出错，宏栈已整体拆除，状态需经下层链重报
    Abort,
}

struct Frame {
    label: String,
    reader: FileReader,
    repeats: u32,
}

struct MacroInner {
    frames: Vec<Frame>,
    /// 认领了 tc.macro 的卷挂载点
    tc_volume: Option<String>,
    ts_volume: Option<String>,
    ps_volume: Option<String>,
}

/// 宏引擎
pub struct MacroEngine {
    vfs: Arc<Vfs>,
    router: Arc<InputRouter>,
    ops: Arc<dyn ControllerOps>,
    inner: SpinLock<MacroInner>,
}

impl MacroEngine {
    /// 创建空栈的宏引擎
    pub fn new(vfs: Arc<Vfs>, router: Arc<InputRouter>, ops: Arc<dyn ControllerOps>) -> Arc<Self> {
        Arc::new(MacroEngine {
            vfs,
            router,
            ops,
            inner: SpinLock::new(MacroInner {
                frames: Vec::new(),
                tc_volume: None,
                ts_volume: None,
                ps_volume: None,
            }),
        })
    }

    /// 当前调用栈深度
    pub fn depth(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// 执行编号宏
    ///
    /// `id >= 100` 解析为文件宏：先找 `/littlefs/P{id}.macro`，
    /// 再找根卷 `/P{id}.macro`，都不存在时返回 `Unhandled`
    /// 交给链上的下一个处理者。`repeats` 指定整文件重复次数。
    pub fn execute(&self, id: u32, args: &MacroArgs, repeats: u32) -> Status {
        if id < 100 {
            return self.builtin(id, args);
        }

        if !self.ops.motion_state().permits_stream_start() {
            return Status::Unhandled;
        }
        if self.inner.lock().frames.len() >= MACRO_STACK_DEPTH {
            return Status::FlowControlStackOverflow;
        }

        let label = format!("P{id}.macro");
        let file = self
            .vfs
            .open(&format!("/littlefs/{label}"), "r")
            .or_else(|_| self.vfs.open(&format!("/{label}"), "r"));
        let file = match file {
            Ok(file) => file,
            Err(_) => return Status::Unhandled,
        };

        self.push_frame(label, file, repeats.max(1));
        Status::Ok
    }

    /// 宏流读取器：取下一个输入字节
    pub fn read(&self) -> MacroRead {
        loop {
            let mut inner = self.inner.lock();
            let Some(frame) = inner.frames.last() else {
                return MacroRead::NoData;
            };

            match frame.reader.next() {
                ReadOutcome::Byte(c) => return MacroRead::Byte(c),
                ReadOutcome::NoData => return MacroRead::NoData,
                ReadOutcome::Eof => {
                    if frame.repeats > 1 {
                        // 整文件重复：回卷继续，不弹栈
                        frame.reader.rewind();
                        if let Some(frame) = inner.frames.last_mut() {
                            frame.repeats -= 1;
                        }
                        continue;
                    }
                    let status = self.ops.last_error();
                    Self::pop_frame(&mut inner, &self.ops);
                    let emptied = inner.frames.is_empty();
                    drop(inner);
                    if emptied {
                        self.detach();
                    }
                    return MacroRead::Finished(status);
                }
            }
        }
    }

    /// M99：结束当前宏，返回调用方
    pub fn macro_return(&self) {
        let mut inner = self.inner.lock();
        if inner.frames.is_empty() {
            return;
        }
        Self::pop_frame(&mut inner, &self.ops);
        let emptied = inner.frames.is_empty();
        drop(inner);
        if emptied {
            self.detach();
        }
    }

    /// 宏级状态陷阱
    ///
    /// 执行宏期间 OK 与 `Unhandled` 被吞掉（宏内不回 "ok"）；
    /// 其余状态报警告、整栈拆除并要求调用方沿下层链重报。
    pub fn trap_status(&self, status: Status) -> TrapResult {
        let label = {
            let inner = self.inner.lock();
            let Some(frame) = inner.frames.last() else {
                return TrapResult::NotMine;
            };
            frame.label.clone()
        };
        self.ops.set_last_error(status);

        if status == Status::Ok || status == Status::Unhandled {
            return TrapResult::Swallowed;
        }

        self.ops.report_message(
            &format!("error {} in macro {}", status.code(), label),
            MessageKind::Warning,
        );
        self.unwind_all();
        TrapResult::Abort
    }

    /// 软复位：放弃所有宏帧
    pub fn on_reset(&self) {
        self.unwind_all();
    }

    /// 换刀钩子：有认领的 tc.macro 时用它顶替内建换刀流程
    ///
    /// 返回 `Unhandled` 表示未接手，内建流程照常执行。
    pub fn tool_change(&self, current_tool: u32, next_tool: u32) -> Status {
        let volume = {
            let inner = self.inner.lock();
            match inner.tc_volume.clone() {
                Some(v) => v,
                None => return Status::Unhandled,
            }
        };
        if current_tool == next_tool {
            return Status::Unhandled;
        }
        if next_tool == 0 && !self.ops.fs_settings().contains(FsSettings::TC_MACRO_ON_T0) {
            return Status::Unhandled;
        }
        self.run_hook(&volume, "tc.macro")
    }

    /// 选刀钩子（Tx 预选）
    ///
    /// T0 默认不触发，除非设置位允许换刀宏处理 T0。
    pub fn tool_select(&self, tool: u32) -> Status {
        let volume = {
            let inner = self.inner.lock();
            match inner.ts_volume.clone() {
                Some(v) => v,
                None => return Status::Unhandled,
            }
        };
        if tool == 0 && !self.ops.fs_settings().contains(FsSettings::TC_MACRO_ON_T0) {
            return Status::Unhandled;
        }
        self.run_hook(&volume, "ts.macro")
    }

    /// 托盘交换钩子（M60）
    pub fn pallet_shuttle(&self) -> Status {
        let volume = {
            let inner = self.inner.lock();
            match inner.ps_volume.clone() {
                Some(v) => v,
                None => return Status::Unhandled,
            }
        };
        self.run_hook(&volume, "ps.macro")
    }

    fn run_hook(&self, volume: &str, name: &str) -> Status {
        if self.inner.lock().frames.len() >= MACRO_STACK_DEPTH {
            return Status::FlowControlStackOverflow;
        }
        let path = if volume == "/" {
            format!("/{name}")
        } else {
            format!("{volume}/{name}")
        };
        match self.vfs.open(&path, "r") {
            Ok(file) => {
                self.push_frame(String::from(name), file, 1);
                Status::Ok
            }
            Err(_) => Status::ToolChangeFailed,
        }
    }

    fn push_frame(&self, label: String, file: Arc<dyn vfs::File>, repeats: u32) {
        let size = file.size();
        {
            let mut inner = self.inner.lock();
            inner.frames.push(Frame {
                label,
                reader: FileReader::new(file, size, true),
                repeats,
            });
        }
        if self.router.top() != Some(SourceLayer::Macro) {
            self.router.push(SourceLayer::Macro);
            self.router.notify_stream_changed();
        }
    }

    // 每个帧退出（M99、EOF、出错拆栈）都同时回退 NGC 流控
    // 与 O 字调用层级
    fn pop_frame(inner: &mut MacroInner, ops: &Arc<dyn ControllerOps>) {
        if let Some(frame) = inner.frames.pop() {
            frame.reader.close();
            ops.ngc_flowctrl_unwind();
            ops.ngc_call_pop();
        }
    }

    fn unwind_all(&self) {
        let had_frames = {
            let mut inner = self.inner.lock();
            let had = !inner.frames.is_empty();
            while !inner.frames.is_empty() {
                Self::pop_frame(&mut inner, &self.ops);
            }
            had
        };
        if had_frames {
            self.detach();
        }
    }

    fn detach(&self) {
        if self.router.pop(SourceLayer::Macro) {
            self.router.notify_stream_changed();
        }
    }

    /// 内建宏：读设置、读写 NGC 参数、读刀偏
    fn builtin(&self, id: u32, args: &MacroArgs) -> Status {
        match id {
            // Q = 设置编号，读出的值写入 R 指定的参数
            1 => {
                let (Some(q), Some(r)) = (args.q, args.r) else {
                    return Status::GcodeValueWordMissing;
                };
                match self.ops.setting_value(q as u32) {
                    Some(value) if self.ops.set_ngc_param(r as u32, value) => Status::Ok,
                    _ => Status::InvalidStatement,
                }
            }
            // Q = 源参数编号，值复制到 R 指定的参数
            2 => {
                let (Some(q), Some(r)) = (args.q, args.r) else {
                    return Status::GcodeValueWordMissing;
                };
                match self.ops.ngc_param(q as u32) {
                    Some(value) if self.ops.set_ngc_param(r as u32, value) => Status::Ok,
                    _ => Status::InvalidStatement,
                }
            }
            // R 的值写入 Q 指定的参数
            3 => {
                let (Some(q), Some(r)) = (args.q, args.r) else {
                    return Status::GcodeValueWordMissing;
                };
                if self.ops.set_ngc_param(q as u32, r) {
                    Status::Ok
                } else {
                    Status::InvalidStatement
                }
            }
            // Q = 轴号，当前刀在该轴上的刀偏写入 R 指定的参数
            4 => {
                let (Some(q), Some(r)) = (args.q, args.r) else {
                    return Status::GcodeValueWordMissing;
                };
                match self.ops.tool_offset(q as u8) {
                    Some(value) if self.ops.set_ngc_param(r as u32, value) => Status::Ok,
                    _ => Status::InvalidStatement,
                }
            }
            _ => Status::Unhandled,
        }
    }
}

impl MountObserver for MacroEngine {
    fn on_mount(&self, mount: &Mount) {
        let probe = |name: &str| -> bool {
            let path = if mount.path == "/" {
                format!("/{name}")
            } else {
                format!("{}/{name}", mount.path)
            };
            self.vfs.stat(&path).is_ok()
        };

        let mut inner = self.inner.lock();
        if inner.tc_volume.is_none() && probe("tc.macro") {
            inner.tc_volume = Some(mount.path.clone());
            log::info!("macro: tc.macro claimed on {}", mount.path);
        }
        if inner.ts_volume.is_none() && probe("ts.macro") {
            inner.ts_volume = Some(mount.path.clone());
        }
        if inner.ps_volume.is_none() && probe("ps.macro") {
            inner.ps_volume = Some(mount.path.clone());
        }
    }

    fn on_unmount(&self, mount: &Mount) {
        let mut inner = self.inner.lock();
        if inner.tc_volume.as_deref() == Some(mount.path.as_str()) {
            inner.tc_volume = None;
        }
        if inner.ts_volume.as_deref() == Some(mount.path.as_str()) {
            inner.ts_volume = None;
        }
        if inner.ps_volume.as_deref() == Some(mount.path.as_str()) {
            inner.ps_volume = None;
        }
    }
}
