//! 输入流重定向与文件作业核心
//!
//! 控制器的解析器从单一的 `read_input()` 口取字节；本 crate
//! 决定那个口背后站着谁：
//!
//! - [`InputRouter`] - 显式的输入源层栈，栈顶即当前源
//! - [`FileReader`] - 文件字节流包装，维护位置/行号/行尾游程
//! - [`JobController`] - 文件作业状态机（流式执行、重绕、挂起）
//! - [`MacroEngine`] - G65 宏栈与内建宏、换刀宏挂钩
//! - [`Ymodem`] - 接收端 YModem 协议机
//!
//! 与宿主控制器的耦合收敛在 [`ControllerOps`] 一个 trait 上，
//! 组件之间经 `Arc` 显式持有，不借道全局变量。

#![no_std]

extern crate alloc;

mod job;
mod macros;
pub mod ops;
mod reader;
mod ring;
mod source;
mod ymodem;

pub use job::{JobController, JobInfo, JobState};
pub use macros::{MacroArgs, MacroEngine, MacroRead, TrapResult, MACRO_STACK_DEPTH};
pub use ops::ControllerOps;
pub use reader::{FileReader, ReadOutcome};
pub use ring::Ring;
pub use source::{InputRouter, SourceLayer, StreamObserver};
pub use ymodem::Ymodem;
