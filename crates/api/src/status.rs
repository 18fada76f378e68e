//! 控制器状态码
//!
//! 各状态码对应协议层 `error:N` 报文中的编号。本 crate 只列出
//! 流重定向核心用到的子集；解析器自身的完整错误表在解析器一侧。

/// 控制器状态码
///
/// 通过 [`Status::code()`] 获取对外报告的数字编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// 成功
    Ok = 0,
    /// 行首不是命令字母
    ExpectedCommandLetter = 1,
    /// 数字格式错误
    BadNumberFormat = 2,
    /// 系统命令无法识别或不支持
    InvalidStatement = 3,
    /// 当前状态下 G-code 被锁定（要求 Idle 或 CheckMode）
    SystemGcLock = 9,
    /// 不支持的 G-code 指令
    GcodeUnsupportedCommand = 20,
    /// 缺少必需的 G-code 字
    GcodeValueWordMissing = 31,
    /// 期望一个 G-code 字
    ExpectedGcodeWord = 36,
    /// 没有处理者认领该命令/宏
    Unhandled = 58,
    /// 宏调用栈溢出
    FlowControlStackOverflow = 59,
    /// 卷挂载失败
    SdMountError = 60,
    /// 后端 I/O 错误（读取或删除失败）
    FileReadError = 61,
    /// 目录列举失败
    FsFailedOpenDir = 62,
    /// 目录不存在
    FsDirNotFound = 63,
    /// 挂载路径上没有卷
    FsNotMounted = 64,
    /// 卷以只读方式挂载
    FsReadOnly = 65,
    /// 后端拒绝打开文件
    FileOpenFailed = 66,
    /// 格式化失败
    FsFormatFailed = 67,
    /// 换刀宏前置条件不满足
    ToolChangeFailed = 68,
}

impl Status {
    /// 对外报告的数字编号
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 是否为成功状态
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// 预定义的反馈消息（对应 `[MSG:...]` 报文）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMessage {
    /// 清除上一条消息
    None,
    /// 程序结束
    ProgramEnd,
    /// 按下循环启动以重新运行
    CycleStartToRerun,
}

/// 自由文本消息的级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// 原样输出
    Plain,
    /// 提示
    Info,
    /// 警告
    Warning,
}
