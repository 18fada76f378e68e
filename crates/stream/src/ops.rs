//! 宿主控制器接口
//!
//! 流核心对运动引擎、报告层与 NGC 参数区的全部依赖收敛在
//! [`ControllerOps`] 上。固件侧实现真驱动，宿主机测试用
//! 录制桩。

use api::{FeedbackMessage, FsSettings, MessageKind, MotionState, Status};

/// 流核心面向宿主控制器的回调集合
pub trait ControllerOps: Send + Sync {
    /// 运动引擎当前状态
    fn motion_state(&self) -> MotionState;

    /// 开关检查模式（运动输出禁止，解析器照常）
    fn set_check_mode(&self, on: bool);

    /// 把状态码按 `error:N`/`ok` 规则报告给当前输出流
    ///
    /// 这是陷阱链的链底，只有未被作业/宏陷阱拦截的状态
    /// 才会到达这里。
    fn report_status(&self, status: Status);

    /// 输出预定义反馈消息（`[MSG:...]`）
    fn feedback_message(&self, msg: FeedbackMessage);

    /// 输出自由文本消息
    fn report_message(&self, text: &str, kind: MessageKind);

    /// 写文本到当前输出流
    fn write(&self, text: &str);

    /// 写单字节到当前输出流（YModem 应答用）
    fn write_char(&self, c: u8);

    /// 分发一个实时命令字节，返回是否被处理
    fn enqueue_realtime(&self, c: u8) -> bool;

    /// 自开机起经过的毫秒数
    fn elapsed_ms(&self) -> u64;

    /// 请求运动取消（位置保持有效的停车）
    fn motion_cancel(&self);

    /// 置停止执行标志
    fn exec_stop(&self);

    /// 文件系统设置位
    fn fs_settings(&self) -> FsSettings;

    /// 解析器最近一次的行状态
    fn last_error(&self) -> Status;

    /// 记录解析器行状态
    fn set_last_error(&self, status: Status);

    /// 读取设置值（内建宏用）
    fn setting_value(&self, id: u32) -> Option<f32>;

    /// 读取 NGC 参数
    fn ngc_param(&self, id: u32) -> Option<f32>;

    /// 写入 NGC 参数，返回是否成功
    fn set_ngc_param(&self, id: u32, value: f32) -> bool;

    /// 读取当前刀具在某轴上的偏置
    fn tool_offset(&self, axis: u8) -> Option<f32>;

    /// 退掉与当前宏文件关联的 NGC 流控制栈项
    fn ngc_flowctrl_unwind(&self);

    /// 弹出 NGC 调用帧
    fn ngc_call_pop(&self);
}
