//! 文件系统后端实现
//!
//! 包含两个挂到 [`vfs::Vfs`] 上的后端：
//!
//! - [`FatFs`] - SD 卡用的 FAT 后端，封装外部 `fatfs` 库，
//!   支持卡检测引脚与运行中挂载/卸载
//! - [`FlashFs`] - 片上 flash 用的日志结构存储，随文件携带
//!   `'t'`（时间戳）与 `'m'`（模式字）两个自定义属性
//!
//! `fatfs` 走 `std::io` 读写接口，因此本 crate 连同其使用方
//! 构建在 std 之上；扇区介质仍经 [`device::BlockDevice`]
//! 抽象注入，宿主机测试用 [`device::RamDisk`] 充当 SD 卡。

pub mod fat;
pub mod flash;

pub use fat::FatFs;
pub use flash::FlashFs;
