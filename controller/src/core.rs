//! 核心装配与输入分发
//!
//! [`Core`] 是整个文件流子系统的持有者：挂载表、输入路由
//! 器、作业控制器、宏引擎、YModem 协议机都经 `Arc` 挂在它
//! 身上，没有文件级全局变量。状态报告走一条显式的陷阱链：
//! 宏陷阱在最上，作业陷阱其次，最底下是面向连接的
//! `ok`/`error:N` 输出。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use api::{
    FeedbackMessage, FsSettings, MessageKind, MotionState, Status, StreamType, ASCII_SOH,
    ASCII_STX, CMD_CYCLE_START, CMD_RESET, CMD_TOOL_ACK,
};
use fs::{FatFs, FlashFs};
use stream::{
    ControllerOps, InputRouter, JobController, JobInfo, MacroArgs, MacroEngine, SourceLayer,
    TrapResult, Ymodem,
};
use sync::SpinLock;
use vfs::{FsError, MountFlags, Vfs};

use crate::host::Host;
use crate::listing;

/// 推迟到前台轮询执行的工作
enum Task {
    /// 发起连接消失，终止作业
    TerminateJob,
    /// 卡检测脚电平变化
    CardDetect(bool),
}

/// 陷阱链与宿主之间共享的小状态
struct CoreState {
    last_error: SpinLock<Status>,
    settings: SpinLock<FsSettings>,
    /// 挂载状态变过，下一条实时报告要带出来
    mount_changed: AtomicBool,
}

/// 把 [`Host`] 与陷阱链拼成子系统的操作接口
pub(crate) struct HostOps {
    host: Arc<dyn Host>,
    state: Arc<CoreState>,
    chain: SpinLock<Option<Chain>>,
}

struct Chain {
    macros: Arc<MacroEngine>,
    job: Arc<JobController>,
}

impl HostOps {
    fn new(host: Arc<dyn Host>, state: Arc<CoreState>) -> Arc<Self> {
        Arc::new(HostOps {
            host,
            state,
            chain: SpinLock::new(None),
        })
    }

    fn attach(&self, macros: Arc<MacroEngine>, job: Arc<JobController>) {
        *self.chain.lock() = Some(Chain { macros, job });
    }

    /// 链底的状态输出
    fn base_report(&self, status: Status) {
        if status == Status::Ok {
            self.host.write("ok\r\n");
        } else {
            self.host.write(&format!("error:{}\r\n", status.code()));
        }
    }

    /// 从宏陷阱以下开始报告（宏文件读尽时用）
    fn report_below_macro(&self, status: Status) {
        let job = {
            let chain = self.chain.lock();
            chain.as_ref().map(|c| c.job.clone())
        };
        if let Some(job) = job {
            if job.trap_status(status) {
                return;
            }
        }
        self.base_report(status);
    }
}

impl ControllerOps for HostOps {
    fn motion_state(&self) -> MotionState {
        self.host.motion_state()
    }

    fn set_check_mode(&self, on: bool) {
        self.host.set_check_mode(on);
    }

    fn report_status(&self, status: Status) {
        let chain = {
            let chain = self.chain.lock();
            chain.as_ref().map(|c| (c.macros.clone(), c.job.clone()))
        };
        if let Some((macros, job)) = chain {
            match macros.trap_status(status) {
                TrapResult::Swallowed => return,
                TrapResult::Abort | TrapResult::NotMine => {}
            }
            if job.trap_status(status) {
                return;
            }
        }
        self.base_report(status);
    }

    fn feedback_message(&self, msg: FeedbackMessage) {
        let text = match msg {
            FeedbackMessage::None => "[MSG:]\r\n",
            FeedbackMessage::ProgramEnd => "[MSG:Pgm End]\r\n",
            FeedbackMessage::CycleStartToRerun => "[MSG:Press cycle start to rerun job]\r\n",
        };
        self.host.write(text);
    }

    fn report_message(&self, text: &str, kind: MessageKind) {
        let line = match kind {
            MessageKind::Plain => format!("[MSG:{text}]\r\n"),
            MessageKind::Info => format!("[MSG:Info: {text}]\r\n"),
            MessageKind::Warning => format!("[MSG:Warning: {text}]\r\n"),
        };
        self.host.write(&line);
    }

    fn write(&self, text: &str) {
        self.host.write(text);
    }

    fn write_char(&self, c: u8) {
        self.host.write_char(c);
    }

    fn enqueue_realtime(&self, c: u8) -> bool {
        self.host.enqueue_realtime(c)
    }

    fn elapsed_ms(&self) -> u64 {
        self.host.elapsed_ms()
    }

    fn motion_cancel(&self) {
        self.host.motion_cancel();
    }

    fn exec_stop(&self) {
        self.host.exec_stop();
    }

    fn fs_settings(&self) -> FsSettings {
        *self.state.settings.lock()
    }

    fn last_error(&self) -> Status {
        *self.state.last_error.lock()
    }

    fn set_last_error(&self, status: Status) {
        *self.state.last_error.lock() = status;
    }

    fn setting_value(&self, id: u32) -> Option<f32> {
        self.host.setting_value(id)
    }

    fn ngc_param(&self, id: u32) -> Option<f32> {
        self.host.ngc_param(id)
    }

    fn set_ngc_param(&self, id: u32, value: f32) -> bool {
        self.host.set_ngc_param(id, value)
    }

    fn tool_offset(&self, axis: u8) -> Option<f32> {
        self.host.tool_offset(axis)
    }

    fn ngc_flowctrl_unwind(&self) {
        self.host.ngc_flowctrl_unwind();
    }

    fn ngc_call_pop(&self) {
        self.host.ngc_call_pop();
    }
}

/// 文件流子系统的根
pub struct Core {
    host: Arc<dyn Host>,
    state: Arc<CoreState>,
    ops: Arc<HostOps>,
    vfs: Arc<Vfs>,
    router: Arc<InputRouter>,
    job: Arc<JobController>,
    macros: Arc<MacroEngine>,
    ymodem: Arc<Ymodem>,
    sd: Arc<FatFs>,
    flash: Option<Arc<FlashFs>>,
    tasks: SpinLock<Vec<Task>>,
}

impl Core {
    /// 装配子系统，不做任何挂载
    ///
    /// `sd` 是 FAT 卡后端（挂 `/`），`flash` 是可选的片上
    /// 存储（挂 `/littlefs`）。挂载动作在 [`start`](Self::start)
    /// 或后续的 `$FM` 里发生。
    pub fn new(host: Arc<dyn Host>, sd: Arc<FatFs>, flash: Option<Arc<FlashFs>>) -> Arc<Self> {
        let state = Arc::new(CoreState {
            last_error: SpinLock::new(Status::Ok),
            settings: SpinLock::new(FsSettings::default()),
            mount_changed: AtomicBool::new(false),
        });
        let ops = HostOps::new(host.clone(), state.clone());
        let vfs = Arc::new(Vfs::new());
        let router = Arc::new(InputRouter::new());

        let ops_dyn: Arc<dyn ControllerOps> = ops.clone();
        let job = JobController::new(vfs.clone(), router.clone(), ops_dyn.clone());
        let macros = MacroEngine::new(vfs.clone(), router.clone(), ops_dyn.clone());
        let ymodem = Ymodem::new(vfs.clone(), router.clone(), ops_dyn);

        ops.attach(macros.clone(), job.clone());
        vfs.register_observer(macros.clone());

        Arc::new(Core {
            host,
            state,
            ops,
            vfs,
            router,
            job,
            macros,
            ymodem,
            sd,
            flash,
            tasks: SpinLock::new(Vec::new()),
        })
    }

    /// 上电收尾：挂 flash 卷，按设置自动挂卡
    pub fn start(&self) {
        if let Some(flash) = &self.flash {
            let flags = if self.fs_settings().contains(FsSettings::LFS_HIDDEN) {
                MountFlags::HIDDEN
            } else {
                MountFlags::empty()
            };
            if let Err(e) = self.vfs.mount("/littlefs", flash.clone(), flags) {
                log::warn!("flash mount failed: {e}");
            }
        }

        if self.fs_settings().contains(FsSettings::SD_MOUNT_ON_BOOT) && self.mount_sd().is_err() {
            self.ops
                .report_message("SD card automount failed", MessageKind::Info);
        }
    }

    /// 宿主当前的运动状态
    pub fn motion_state(&self) -> MotionState {
        self.host.motion_state()
    }

    /// 当前文件系统设置
    pub fn fs_settings(&self) -> FsSettings {
        *self.state.settings.lock()
    }

    /// 更新文件系统设置
    pub fn set_fs_settings(&self, settings: FsSettings) {
        *self.state.settings.lock() = settings;
    }

    /// 挂载 FAT 卡到根
    ///
    /// 已经挂着时等价于无操作。
    pub fn mount_sd(&self) -> Result<(), FsError> {
        if self.sd.detectable() && !self.sd.card_inserted() {
            return Err(FsError::NotFound);
        }
        if !self.sd.mounted() {
            self.sd.mount_volume()?;
        }
        match self.vfs.mount("/", self.sd.clone(), MountFlags::empty()) {
            Ok(()) => {
                self.state.mount_changed.store(true, Ordering::Relaxed);
                Ok(())
            }
            // 根卷已在挂载表里
            Err(FsError::Busy) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// 卸载 FAT 卡
    pub fn unmount_sd(&self) -> Result<(), FsError> {
        self.vfs.unmount("/")?;
        self.state.mount_changed.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// 实时报告用的挂载状态码：bit0 = 已挂载，bit1 = 有检测引脚
    pub fn mount_status(&self) -> u8 {
        self.sd.mount_status()
    }

    /// 连接收到一个字节
    ///
    /// YModem 活动时整个输入都属于协议机；无重定向的栈上
    /// SOH/STX 开启新传输；实时命令就地分发；其余字节按栈
    /// 顶决定去向——文件/宏作为输入源时丢弃（防止两路输入
    /// 混流），挂起或无重定向时进串行环。
    pub fn input_byte(&self, c: u8) {
        if self.ymodem.active() {
            self.ymodem.put_char(c);
            return;
        }
        if (c == ASCII_SOH || c == ASCII_STX)
            && self.router.top().is_none()
            && self.ymodem.try_start(c)
        {
            return;
        }
        if api::is_realtime_cmd(c) {
            self.realtime(c);
            return;
        }
        match self.router.top() {
            Some(SourceLayer::File | SourceLayer::Macro | SourceLayer::AwaitCycleStart) => {}
            Some(SourceLayer::Ymodem) => self.ymodem.put_char(c),
            Some(SourceLayer::Suspended) | None => {
                self.router.push_serial(c);
            }
        }
    }

    fn realtime(&self, c: u8) {
        match c {
            CMD_RESET => self.reset(),
            CMD_CYCLE_START => {
                self.job.on_cycle_start();
                self.host.enqueue_realtime(c);
            }
            CMD_TOOL_ACK => {
                if self.router.top() == Some(SourceLayer::Suspended) {
                    self.job.resume();
                } else {
                    self.host.enqueue_realtime(c);
                }
            }
            _ => {
                self.host.enqueue_realtime(c);
            }
        }
    }

    /// 解析器取下一个输入字节
    pub fn read_input(&self) -> Option<u8> {
        match self.router.top() {
            Some(SourceLayer::File) => self.job.read(),
            Some(SourceLayer::Macro) => match self.macros.read() {
                stream::MacroRead::Byte(c) => Some(c),
                stream::MacroRead::NoData => None,
                stream::MacroRead::Finished(status) => {
                    self.ops.report_below_macro(status);
                    None
                }
            },
            Some(_) => None,
            None => self.router.read_serial(),
        }
    }

    /// 前台轮询：推进 YModem，执行推迟的任务
    pub fn poll(&self) {
        self.ymodem.poll();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match task {
                Task::TerminateJob => self.job.terminate(),
                Task::CardDetect(inserted) => {
                    if inserted {
                        if self.mount_sd().is_err() {
                            self.ops
                                .report_message("SD card automount failed", MessageKind::Info);
                        }
                    } else if self.unmount_sd().is_err() {
                        log::warn!("card removed but unmount failed");
                    }
                }
            }
        }
    }

    /// 卡检测脚中断入口，实际动作推迟到 [`poll`](Self::poll)
    pub fn on_card_detect(&self, inserted: bool) {
        self.tasks.lock().push(Task::CardDetect(inserted));
    }

    /// 当前连接被另一路流取代
    ///
    /// 网络作业接受 WebUI 重连；其余情况终止作业（动作
    /// 推迟到前台）。
    pub fn on_connection_change(&self, new_type: StreamType, webui_connected: bool) {
        if self.job.on_connection_change(new_type, webui_connected) {
            self.tasks.lock().push(Task::TerminateJob);
        }
        self.router.set_base_type(new_type);
    }

    /// 软复位：拆除一切重定向
    pub fn reset(&self) {
        self.ymodem.on_reset();
        self.macros.on_reset();
        self.job.on_reset();
        self.host.enqueue_realtime(CMD_RESET);
    }

    /// 解析器报告的状态沿陷阱链发布
    pub fn report_status(&self, status: Status) {
        self.ops.report_status(status);
    }

    /// 程序完成（M2/M30/M99）通知
    pub fn program_completed(&self, flow: api::ProgramFlow, check_mode: bool) {
        self.job.program_completed(flow, check_mode);
    }

    /// 实时状态行里本子系统贡献的片段
    ///
    /// 流式执行时是进度，重绕等待时是 `|SD:Pending`；
    /// `full` 报告或挂载状态变化后附挂载状态码。
    pub fn report_suffix(&self, full: bool) -> String {
        let mut out = self.job.status_suffix().unwrap_or_default();
        if full || self.state.mount_changed.swap(false, Ordering::Relaxed) {
            out.push_str(&format!("|SD:{}", self.mount_status()));
        }
        out
    }

    /// 开始流式执行文件，见 [`JobController::stream_file`]
    pub fn stream_file(&self, path: &str, web_client: bool) -> Status {
        self.job.stream_file(path, web_client)
    }

    /// 执行编号宏
    pub fn execute_macro(&self, id: u32, args: &MacroArgs, repeats: u32) -> Status {
        self.macros.execute(id, args, repeats)
    }

    /// M99 宏返回
    pub fn macro_return(&self) {
        self.macros.macro_return();
    }

    /// 换刀钩子，未认领 tc.macro 时返回 `Unhandled`
    pub fn tool_change(&self, current_tool: u32, next_tool: u32) -> Status {
        self.macros.tool_change(current_tool, next_tool)
    }

    /// 列出已挂载卷上的文件
    ///
    /// `filtered` 只列 G-code 类扩展名。层级扫描，深度上限
    /// 见 [`listing`]。
    pub fn list_files(&self, filtered: bool) -> Status {
        if !self.sd.mounted() {
            return Status::FsNotMounted;
        }
        match listing::scan(&self.vfs, self.ops.as_ref(), filtered, listing::SCAN_DEPTH) {
            Ok(()) => Status::Ok,
            Err(_) => Status::FsFailedOpenDir,
        }
    }

    /// 文件作业是否占着输入流
    pub fn fs_busy(&self) -> bool {
        matches!(
            self.router.top(),
            Some(SourceLayer::File | SourceLayer::AwaitCycleStart | SourceLayer::Suspended)
        )
    }

    /// 进行中作业的快照
    pub fn job_info(&self) -> Option<JobInfo> {
        self.job.info()
    }

    /// 挂载表入口
    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    /// 输入路由器
    pub fn router(&self) -> &Arc<InputRouter> {
        &self.router
    }

    /// 作业控制器
    pub fn job(&self) -> &Arc<JobController> {
        &self.job
    }

    /// 宏引擎
    pub fn macros(&self) -> &Arc<MacroEngine> {
        &self.macros
    }

    /// YModem 协议机
    pub fn ymodem(&self) -> &Arc<Ymodem> {
        &self.ymodem
    }

    pub(crate) fn ops(&self) -> &Arc<HostOps> {
        &self.ops
    }

    pub(crate) fn sd(&self) -> &Arc<FatFs> {
        &self.sd
    }
}
