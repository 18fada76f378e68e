//! 硬件抽象接口
//!
//! 此 crate 提供文件流子系统依赖的硬件抽象，包括：
//!
//! - [`BlockDevice`] trait - 扇区介质接口（SD 卡 / SPI flash）
//! - [`RamDisk`] - 内存模拟的块设备，用于宿主机测试
//! - [`CardDetect`] trait - 可选的卡检测引脚
//! - [`Rtc`] trait - 实时时钟，为文件时间戳提供墙上时间
//!
//! 具体板级驱动在固件侧实现这些 trait，经 `Arc` 注入各
//! 文件系统后端，不经过任何全局注册表。

#![no_std]

extern crate alloc;

pub mod block;
pub mod detect;
pub mod rtc;

pub use block::{BlockDevice, RamDisk};
pub use detect::CardDetect;
pub use rtc::{DateTime, Rtc};
