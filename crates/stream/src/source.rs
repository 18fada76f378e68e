//! 输入源层栈
//!
//! 重定向不再靠覆盖函数指针并手工保存旧值，而是维护一个
//! 显式的层栈：栈顶就是当前输入源，压栈/弹栈天然不会把
//! 恢复顺序搞乱。栈空时输入源是底层串口环。

use alloc::sync::Arc;
use alloc::vec::Vec;

use api::StreamType;
use sync::SpinLock;

use crate::ring::Ring;

/// 输入源层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayer {
    /// 文件作业读取器
    File,
    /// 宏读取器（总在 File 或串口之上）
    Macro,
    /// 重绕后等待循环启动的哨兵，不产出任何字节
    AwaitCycleStart,
    /// 换刀挂起：空读取器，只放行换刀确认字节
    Suspended,
    /// YModem 会话：所有输入进协议环
    Ymodem,
}

/// 输入流切换观察者
pub trait StreamObserver: Send + Sync {
    /// 有效流类型变化后回调
    fn on_stream_changed(&self, stream: StreamType);
}

struct RouterInner {
    stack: Vec<SourceLayer>,
    base_type: StreamType,
}

/// 输入路由器
///
/// 持有层栈与底层串口环。字节的取舍策略由控制器按栈顶
/// 决定，这里只负责栈与环本身。
pub struct InputRouter {
    inner: SpinLock<RouterInner>,
    serial: Ring,
    observers: SpinLock<Vec<Arc<dyn StreamObserver>>>,
}

impl Default for InputRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InputRouter {
    /// 创建空栈路由器，底层流类型为串口
    pub fn new() -> Self {
        InputRouter {
            inner: SpinLock::new(RouterInner {
                stack: Vec::new(),
                base_type: StreamType::Serial,
            }),
            serial: Ring::new(256),
            observers: SpinLock::new(Vec::new()),
        }
    }

    /// 注册流切换观察者
    pub fn register_observer(&self, observer: Arc<dyn StreamObserver>) {
        self.observers.lock().push(observer);
    }

    /// 当前栈顶层，栈空返回 `None`（即底层串口）
    pub fn top(&self) -> Option<SourceLayer> {
        self.inner.lock().stack.last().copied()
    }

    /// 压入一层
    pub fn push(&self, layer: SourceLayer) {
        self.inner.lock().stack.push(layer);
    }

    /// 弹出栈顶层，仅当栈顶确为 `layer` 时生效
    pub fn pop(&self, layer: SourceLayer) -> bool {
        let mut inner = self.inner.lock();
        if inner.stack.last() == Some(&layer) {
            inner.stack.pop();
            true
        } else {
            false
        }
    }

    /// 把栈顶从 `from` 原地换成 `to`
    ///
    /// 用于作业完成后 File → AwaitCycleStart 的切换，以及
    /// 循环启动时换回来。栈顶不是 `from` 时不动作。
    pub fn replace_top(&self, from: SourceLayer, to: SourceLayer) -> bool {
        let mut inner = self.inner.lock();
        match inner.stack.last_mut() {
            Some(top) if *top == from => {
                *top = to;
                true
            }
            _ => false,
        }
    }

    /// 栈中是否含某层
    pub fn contains(&self, layer: SourceLayer) -> bool {
        self.inner.lock().stack.contains(&layer)
    }

    /// 当前栈深度
    pub fn depth(&self) -> usize {
        self.inner.lock().stack.len()
    }

    /// 设置底层连接的流类型（连接切换时由控制器调用）
    pub fn set_base_type(&self, stream: StreamType) {
        self.inner.lock().base_type = stream;
    }

    /// 有效流类型：作业重定向期间为 File，否则为底层类型
    pub fn stream_type(&self) -> StreamType {
        let inner = self.inner.lock();
        if inner
            .stack
            .iter()
            .any(|l| matches!(l, SourceLayer::File | SourceLayer::AwaitCycleStart))
        {
            StreamType::File
        } else {
            inner.base_type
        }
    }

    /// 把有效流类型广播给所有观察者
    pub fn notify_stream_changed(&self) {
        let stream = self.stream_type();
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_stream_changed(stream);
        }
    }

    /// ISR 侧：串口字节入环
    pub fn push_serial(&self, c: u8) -> bool {
        self.serial.push(c)
    }

    /// 前台：从串口环取一个字节
    pub fn read_serial(&self) -> Option<u8> {
        self.serial.pop()
    }

    /// 清空串口输入环
    pub fn flush_serial(&self) {
        self.serial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_follows_stack() {
        let router = InputRouter::new();
        assert_eq!(router.top(), None);
        router.push(SourceLayer::File);
        router.push(SourceLayer::Macro);
        assert_eq!(router.top(), Some(SourceLayer::Macro));
        assert!(router.pop(SourceLayer::Macro));
        assert_eq!(router.top(), Some(SourceLayer::File));
    }

    #[test]
    fn test_pop_checks_expected_layer() {
        let router = InputRouter::new();
        router.push(SourceLayer::File);
        assert!(!router.pop(SourceLayer::Macro));
        assert_eq!(router.top(), Some(SourceLayer::File));
    }

    #[test]
    fn test_replace_top() {
        let router = InputRouter::new();
        router.push(SourceLayer::File);
        assert!(router.replace_top(SourceLayer::File, SourceLayer::AwaitCycleStart));
        assert_eq!(router.top(), Some(SourceLayer::AwaitCycleStart));
        assert!(!router.replace_top(SourceLayer::File, SourceLayer::AwaitCycleStart));
    }

    #[test]
    fn test_stream_type() {
        let router = InputRouter::new();
        assert_eq!(router.stream_type(), StreamType::Serial);
        router.push(SourceLayer::File);
        assert_eq!(router.stream_type(), StreamType::File);
        // 哨兵状态对外仍是文件流
        router.replace_top(SourceLayer::File, SourceLayer::AwaitCycleStart);
        assert_eq!(router.stream_type(), StreamType::File);
        router.pop(SourceLayer::AwaitCycleStart);
        assert_eq!(router.stream_type(), StreamType::Serial);
    }

    #[test]
    fn test_serial_ring() {
        let router = InputRouter::new();
        router.push_serial(b'G');
        router.push_serial(b'0');
        assert_eq!(router.read_serial(), Some(b'G'));
        router.flush_serial();
        assert_eq!(router.read_serial(), None);
    }
}
