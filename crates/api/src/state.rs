//! 运动状态、输入流类型与程序流
//!
//! 这些枚举描述外部协作者（运动引擎、连接层、解析器）暴露给
//! 流重定向核心的粗粒度状态。

/// 运动引擎的粗粒度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// 空闲
    Idle,
    /// 报警
    Alarm,
    /// 检查模式（解析器启用，运动输出禁用）
    CheckMode,
    /// 回零中
    Homing,
    /// 运动循环执行中
    Cycle,
    /// 进给保持
    Hold,
    /// 点动
    Jog,
    /// 换刀中
    ToolChange,
    /// 休眠
    Sleep,
}

impl MotionState {
    /// 文件读取器是否允许在该状态下分发字节
    pub fn permits_stream_read(self) -> bool {
        matches!(
            self,
            MotionState::Idle
                | MotionState::Cycle
                | MotionState::Hold
                | MotionState::CheckMode
                | MotionState::ToolChange
        )
    }

    /// 流式命令（$F= 等）是否允许在该状态下启动
    pub fn permits_stream_start(self) -> bool {
        matches!(self, MotionState::Idle | MotionState::CheckMode)
    }
}

/// 输入流的类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// 本地串口
    Serial,
    /// Telnet 连接
    Telnet,
    /// WebSocket 连接（WebUI）
    WebSocket,
    /// 蓝牙连接
    Bluetooth,
    /// 文件重定向
    File,
    /// 空流
    Null,
}

/// 解析器报告的程序流事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFlow {
    /// 正常执行中
    Running,
    /// 暂停（M0/M1）
    Paused,
    /// 子程序返回（M99）
    Return,
    /// M2 结束
    CompletedM2,
    /// M30 结束
    CompletedM30,
}

impl ProgramFlow {
    /// 是否为 M2/M30 程序结束
    pub fn is_completed(self) -> bool {
        matches!(self, ProgramFlow::CompletedM2 | ProgramFlow::CompletedM30)
    }
}
