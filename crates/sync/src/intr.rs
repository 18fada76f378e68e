//! 中断屏蔽保护器
//!
//! 基于 RAII 实现中断屏蔽，在创建时屏蔽本地中断，销毁时恢复。
//! 屏蔽的具体实现由固件层通过 [`register_interrupt_ops`] 注册；
//! 宿主机测试不注册，此时保护器退化为空操作。

use core::sync::atomic::{AtomicUsize, Ordering};

/// 中断屏蔽操作
///
/// 固件层为目标 MCU 实现此 trait 并在启动时注册。
pub trait InterruptOps: Send + Sync {
    /// 屏蔽本地中断并返回之前的状态字
    fn disable(&self) -> usize;

    /// 恢复之前保存的中断状态
    fn restore(&self, flags: usize);
}

static INTR_OPS_DATA: AtomicUsize = AtomicUsize::new(0);
static INTR_OPS_VTABLE: AtomicUsize = AtomicUsize::new(0);

/// 注册中断屏蔽操作实现
///
/// # Safety
/// 必须在单线程环境下调用，且只能调用一次。
pub unsafe fn register_interrupt_ops(ops: &'static dyn InterruptOps) {
    let ptr = ops as *const dyn InterruptOps;
    // SAFETY: 将 fat pointer 拆分为 data 和 vtable 两部分存储
    let (data, vtable) =
        unsafe { core::mem::transmute::<*const dyn InterruptOps, (usize, usize)>(ptr) };
    INTR_OPS_DATA.store(data, Ordering::Release);
    INTR_OPS_VTABLE.store(vtable, Ordering::Release);
}

fn interrupt_ops() -> Option<&'static dyn InterruptOps> {
    let data = INTR_OPS_DATA.load(Ordering::Acquire);
    let vtable = INTR_OPS_VTABLE.load(Ordering::Acquire);
    if data == 0 {
        return None;
    }
    // SAFETY: 重组 fat pointer；指针由 register_interrupt_ops 设置
    Some(unsafe { &*core::mem::transmute::<(usize, usize), *const dyn InterruptOps>((data, vtable)) })
}

/// 中断屏蔽保护器
///
/// 创建时屏蔽本地中断并保存之前的状态，离开作用域时自动恢复。
/// 只保护“前台 vs 本地中断”的并发；锁的互斥由 [`crate::RawSpinLock`] 提供。
pub struct IntrGuard {
    flags: usize,
}

impl IntrGuard {
    /// 屏蔽中断并返回保护器
    pub fn new() -> Self {
        let flags = match interrupt_ops() {
            Some(ops) => ops.disable(),
            None => 0,
        };
        IntrGuard { flags }
    }
}

impl Default for IntrGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        if let Some(ops) = interrupt_ops() {
            ops.restore(self.flags);
        }
    }
}
