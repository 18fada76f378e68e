//! 文件作业状态机
//!
//! 一次作业 = 把一个文件当作控制器的输入流执行一遍。作业
//! 把 File 层压到输入路由器上，从此解析器只见文件字节；
//! 原始连接的实时命令照常分发，普通击键被丢弃。
//!
//! 程序完成（M2/M30）时若重绕已武装，文件回到 0 字节并换
//! 上等待循环启动的哨兵层；否则拆除重定向恢复原始流。

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use api::{FeedbackMessage, FsSettings, MessageKind, MotionState, ProgramFlow, Status};
use sync::SpinLock;
use vfs::Vfs;

use crate::ops::ControllerOps;
use crate::reader::{FileReader, ReadOutcome};
use crate::source::{InputRouter, SourceLayer};

/// 显示名长度上限（字节）
const MAX_NAME: usize = 49;

/// 作业的宏观状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// 没有作业
    Idle,
    /// 文件是当前输入源
    Streaming,
    /// 重绕完成，等待循环启动
    AwaitCycleStart,
}

/// 实时报告与上层查询用的作业快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// 显示名（路径最后一段）
    pub name: String,
    /// 文件字节数
    pub size: u64,
    /// 当前读取偏移
    pub pos: u64,
    /// 当前行号
    pub line: u32,
}

struct JobInner {
    reader: Option<FileReader>,
    name: String,
    active: bool,
    awaiting_cycle_start: bool,
    /// $FR 武装的重绕标志
    rewind: bool,
    /// 作业由网络客户端发起
    web: bool,
    /// M98 预扫描遍正在进行
    sub_scan: bool,
}

/// 作业控制器
pub struct JobController {
    vfs: Arc<Vfs>,
    router: Arc<InputRouter>,
    ops: Arc<dyn ControllerOps>,
    inner: SpinLock<JobInner>,
}

impl JobController {
    /// 创建空闲的作业控制器
    pub fn new(vfs: Arc<Vfs>, router: Arc<InputRouter>, ops: Arc<dyn ControllerOps>) -> Arc<Self> {
        Arc::new(JobController {
            vfs,
            router,
            ops,
            inner: SpinLock::new(JobInner {
                reader: None,
                name: String::new(),
                active: false,
                awaiting_cycle_start: false,
                rewind: false,
                web: false,
                sub_scan: false,
            }),
        })
    }

    /// 当前作业状态
    pub fn state(&self) -> JobState {
        let inner = self.inner.lock();
        if !inner.active {
            JobState::Idle
        } else if inner.awaiting_cycle_start {
            JobState::AwaitCycleStart
        } else {
            JobState::Streaming
        }
    }

    /// 作业快照，空闲时返回 `None`
    pub fn info(&self) -> Option<JobInfo> {
        let inner = self.inner.lock();
        if !inner.active {
            return None;
        }
        let (pos, line) = inner
            .reader
            .as_ref()
            .map(|r| (r.pos(), r.line()))
            .unwrap_or((0, 0));
        Some(JobInfo {
            name: inner.name.clone(),
            size: inner.reader.as_ref().map(|r| r.size()).unwrap_or(0),
            pos,
            line,
        })
    }

    /// 武装重绕模式（$FR），重复武装等价于武装一次
    pub fn arm_rewind(&self) {
        self.inner.lock().rewind = true;
    }

    /// 撤销重绕武装（列目录等命令的副作用）
    pub fn disarm_rewind(&self) {
        self.inner.lock().rewind = false;
    }

    /// 开始流式执行 `path`
    ///
    /// 指向目录时切换当前目录并返回成功。`web_client` 标记
    /// 发起方是否为网络客户端，影响断连与重绕策略。
    pub fn stream_file(&self, path: &str, web_client: bool) -> Status {
        let state = self.ops.motion_state();
        if !state.permits_stream_start() {
            return Status::SystemGcLock;
        }

        let info = match self.vfs.stat(path) {
            Ok(info) => info,
            Err(e) => return e.to_status(),
        };
        if info.mode.contains(vfs::StMode::DIRECTORY) {
            return match self.vfs.chdir(path) {
                Ok(()) => Status::Ok,
                Err(e) => e.to_status(),
            };
        }

        let file = match self.vfs.open(path, "r") {
            Ok(file) => file,
            Err(_) => return Status::FileOpenFailed,
        };

        // 先确认命令本身：重定向挂上以后状态陷阱会把属于
        // 本命令的 "ok" 吞掉，发起方必须现在就拿到回执
        self.ops.set_last_error(Status::Ok);
        self.ops.report_status(Status::Ok);

        {
            let mut inner = self.inner.lock();
            inner.reader = Some(FileReader::new(file, info.size, false));
            inner.name = basename(path);
            inner.active = true;
            inner.awaiting_cycle_start = false;
            inner.web = web_client;
            inner.sub_scan = false;

            let settings = self.ops.fs_settings();
            if settings.contains(FsSettings::M98_PRESCAN) && state != MotionState::CheckMode {
                // 先以检查模式读一遍收集 M98 子程序标号
                self.ops.set_check_mode(true);
                inner.sub_scan = true;
            }
        }

        self.router.push(SourceLayer::File);
        self.router.notify_stream_changed();
        log::info!("job: streaming {path}");
        Status::Ok
    }

    /// 作业读取器：取下一个输入字节
    ///
    /// 运动状态不在放行集合时不产出数据，让主机侧停顿。
    pub fn read(&self) -> Option<u8> {
        let state = self.ops.motion_state();
        loop {
            let mut inner = self.inner.lock();
            if !inner.active || inner.awaiting_cycle_start {
                return None;
            }

            if inner.reader.is_none() {
                // 文件读尽但解析器没有给出程序结束：状态一旦
                // 回到空闲就视作 M30 完成
                drop(inner);
                if matches!(state, MotionState::Idle | MotionState::CheckMode) {
                    self.program_completed(ProgramFlow::CompletedM30, state == MotionState::CheckMode);
                    self.ops.feedback_message(FeedbackMessage::ProgramEnd);
                }
                return None;
            }

            if !state.permits_stream_read() {
                return None;
            }

            let outcome = match inner.reader.as_ref() {
                Some(reader) => reader.next(),
                None => return None,
            };
            match outcome {
                ReadOutcome::Byte(c) => return Some(c),
                ReadOutcome::NoData => return None,
                ReadOutcome::Eof => {
                    if inner.sub_scan {
                        // 预扫描遍结束：回卷后正常执行
                        inner.sub_scan = false;
                        if let Some(reader) = inner.reader.as_ref() {
                            reader.rewind();
                        }
                        self.ops.set_check_mode(false);
                        continue;
                    }
                    if let Some(reader) = inner.reader.take() {
                        reader.close();
                    }
                }
            }
        }
    }

    /// 解析器报告程序完成（M2/M30/M99）
    pub fn program_completed(&self, flow: ProgramFlow, _check_mode: bool) {
        if flow.is_completed() {
            // 预扫描遍里撞到程序结束：扫描完成，回卷转入
            // 正式执行
            let mut inner = self.inner.lock();
            if inner.sub_scan {
                inner.sub_scan = false;
                if let Some(reader) = inner.reader.as_ref() {
                    reader.rewind();
                }
                self.ops.set_check_mode(false);
                return;
            }
        }

        if flow == ProgramFlow::Return {
            // M99 回到文件开头继续，不装哨兵
            let inner = self.inner.lock();
            if let Some(reader) = inner.reader.as_ref() {
                reader.rewind();
            }
            return;
        }

        let settings = self.ops.fs_settings();
        let rewind = {
            let inner = self.inner.lock();
            let armed = match flow {
                ProgramFlow::CompletedM2 => inner.rewind,
                ProgramFlow::CompletedM30 => {
                    inner.rewind && settings.contains(FsSettings::REWIND_M30)
                }
                _ => false,
            };
            armed && !inner.web && inner.reader.is_some()
        };

        if rewind {
            let mut inner = self.inner.lock();
            if let Some(reader) = inner.reader.as_ref() {
                reader.rewind();
            }
            inner.awaiting_cycle_start = true;
            drop(inner);
            self.router
                .replace_top(SourceLayer::File, SourceLayer::AwaitCycleStart);
            self.ops.feedback_message(FeedbackMessage::CycleStartToRerun);
        } else {
            self.end_job(true);
        }
    }

    /// 循环启动观察者：哨兵就位时恢复文件读取
    pub fn on_cycle_start(&self) {
        let mut inner = self.inner.lock();
        if inner.awaiting_cycle_start {
            inner.awaiting_cycle_start = false;
            drop(inner);
            self.router
                .replace_top(SourceLayer::AwaitCycleStart, SourceLayer::File);
        }
    }

    /// 作业级状态陷阱
    ///
    /// 流式执行期间把非 OK 状态变成带行号的错误行并终止
    /// 作业；OK 状态被吞掉（流式执行不回 "ok"）。返回是否
    /// 拦截了该状态。
    pub fn trap_status(&self, status: Status) -> bool {
        let line = {
            let inner = self.inner.lock();
            if !inner.active || inner.awaiting_cycle_start {
                return false;
            }
            inner.reader.as_ref().map(|r| r.line()).unwrap_or(0)
        };
        if !status.is_ok() {
            self.ops.write(&format!(
                "error:{} in SD file at line {}{}",
                status.code(),
                line,
                api::ASCII_EOL
            ));
            self.end_job(true);
            // 经恢复后的链重新报告
            self.ops.report_status(status);
        }
        true
    }

    /// 拆除作业：关文件、弹层、恢复原始流
    pub fn end_job(&self, flush: bool) {
        let reader = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            inner.active = false;
            inner.awaiting_cycle_start = false;
            inner.rewind = false;
            inner.web = false;
            inner.sub_scan = false;
            inner.name.clear();
            inner.reader.take()
        };
        if let Some(reader) = reader {
            reader.close();
        }
        if !self.router.pop(SourceLayer::File) {
            self.router.pop(SourceLayer::AwaitCycleStart);
        }
        if flush {
            self.router.flush_serial();
        }
        self.router.notify_stream_changed();
    }

    /// 软复位：作业仍是输入源时报告并收尾
    pub fn on_reset(&self) {
        let (active, line, rewind) = {
            let inner = self.inner.lock();
            let line = inner.reader.as_ref().map(|r| r.line()).unwrap_or(0);
            (inner.active, line, inner.rewind)
        };
        if active {
            if line > 0 {
                self.ops.report_message(
                    &format!("Reset during streaming of file at line: {line}"),
                    MessageKind::Plain,
                );
            } else if rewind {
                self.ops.feedback_message(FeedbackMessage::None);
            }
            self.end_job(true);
        }
    }

    /// 连接切换：返回是否需要投递终止任务
    ///
    /// 由网络客户端发起的作业接受 WebUI 重连；其余情况下
    /// 换流意味着发起方消失，作业应终止。
    pub fn on_connection_change(&self, new_type: api::StreamType, webui_connected: bool) -> bool {
        let inner = self.inner.lock();
        if !inner.active || new_type == api::StreamType::File {
            return false;
        }
        !(inner.web && (new_type != api::StreamType::WebSocket || webui_connected))
    }

    /// 连接丢失后的终止任务体
    pub fn terminate(&self) {
        self.ops.motion_cancel();
        self.ops.exec_stop();
        self.end_job(false);
        self.ops
            .report_message("Job terminated due to connection change", MessageKind::Info);
    }

    /// 暂停文件输入（手动换刀等待确认）
    ///
    /// 压入挂起层后文件字节不再流向解析器，原始连接的
    /// 输入重新可见，直到 [`resume`](Self::resume)。
    pub fn suspend(&self) {
        if self.router.top() != Some(SourceLayer::Suspended) {
            self.router.push(SourceLayer::Suspended);
            self.router.flush_serial();
        }
    }

    /// 恢复被挂起的文件输入
    pub fn resume(&self) -> bool {
        let resumed = self.router.pop(SourceLayer::Suspended);
        if resumed {
            self.router.flush_serial();
        }
        resumed
    }

    /// 实时状态行的 `|SD:` 片段
    pub fn status_suffix(&self) -> Option<String> {
        match self.router.top() {
            Some(SourceLayer::AwaitCycleStart) => Some(String::from("|SD:Pending")),
            Some(SourceLayer::File) => {
                let inner = self.inner.lock();
                let reader = inner.reader.as_ref()?;
                let pct = if reader.size() == 0 {
                    100.0
                } else {
                    reader.pos() as f32 / reader.size() as f32 * 100.0
                };
                let mut pct = format!("{pct:.1}");
                // 未回到空闲前不报 100.0
                if self.ops.motion_state() != MotionState::Idle && pct == "100.0" {
                    pct = String::from("99.9");
                }
                Some(format!("|SD:{pct},{}", inner.name))
            }
            _ => None,
        }
    }
}

fn basename(path: &str) -> String {
    let name = vfs::path::basename(path);
    let mut end = name.len().min(MAX_NAME);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}
