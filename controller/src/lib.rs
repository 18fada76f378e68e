//! 控制器核心装配
//!
//! 把文件系统栈（VFS、FAT 卡、片上 flash）、输入路由器、
//! 作业控制器、宏引擎与 YModem 接收端装配成一个
//! [`Core`] 值。宿主固件实现 [`Host`] 提供运动状态与
//! 连接 I/O，其余一切经 `Core` 的显式方法驱动：
//!
//! - 连接收到的每个字节交给 [`Core::input_byte`]
//! - 解析器经 [`Core::read_input`] 取下一个输入字节
//! - 前台循环周期性调用 [`Core::poll`]
//! - `$F` 命令族交给 [`cli::execute`]

pub mod cli;
mod core;
mod host;
mod listing;

pub use self::core::Core;
pub use self::host::Host;
