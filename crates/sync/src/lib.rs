//! 同步原语
//!
//! 单核协作式控制器中，前台协议循环与中断服务层共享少量状态
//! （环形缓冲区、挂载表、任务队列）。此 crate 提供：
//!
//! - [`RawSpinLock`] / [`SpinLock`] - 关中断自旋锁
//! - [`IntrGuard`] - RAII 中断屏蔽保护器
//! - [`register_interrupt_ops`] - 由固件层注册的中断屏蔽钩子
//!
//! 未注册钩子时（宿主机测试），屏蔽操作为空操作。

#![no_std]

mod intr;
mod raw_spin_lock;
mod spin_lock;

pub use intr::{register_interrupt_ops, InterruptOps, IntrGuard};
pub use raw_spin_lock::{RawSpinLock, RawSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
