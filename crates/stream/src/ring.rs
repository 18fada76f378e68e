//! 字节环形缓冲
//!
//! 单生产者单消费者。ISR 侧压入，前台弹出；满时丢弃并置
//! 溢出标志，不阻塞。

use alloc::vec;
use alloc::vec::Vec;

use sync::SpinLock;

struct RingInner {
    data: Vec<u8>,
    head: usize,
    tail: usize,
    overflow: bool,
}

/// 字节环形缓冲
pub struct Ring {
    inner: SpinLock<RingInner>,
}

impl Ring {
    /// 创建可容纳 `capacity - 1` 字节的环
    pub fn new(capacity: usize) -> Self {
        Ring {
            inner: SpinLock::new(RingInner {
                data: vec![0; capacity],
                head: 0,
                tail: 0,
                overflow: false,
            }),
        }
    }

    /// 压入一个字节，满时丢弃并置溢出标志
    pub fn push(&self, c: u8) -> bool {
        let mut inner = self.inner.lock();
        let next_head = (inner.head + 1) % inner.data.len();
        if next_head == inner.tail {
            inner.overflow = true;
            false
        } else {
            let head = inner.head;
            inner.data[head] = c;
            inner.head = next_head;
            true
        }
    }

    /// 弹出一个字节，空时返回 `None`
    pub fn pop(&self) -> Option<u8> {
        let mut inner = self.inner.lock();
        if inner.tail == inner.head {
            return None;
        }
        let c = inner.data[inner.tail];
        inner.tail = (inner.tail + 1) % inner.data.len();
        Some(c)
    }

    /// 清空环并复位溢出标志
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tail = inner.head;
        inner.overflow = false;
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.tail == inner.head
    }

    /// 自上次清空以来是否丢弃过字节
    pub fn overflowed(&self) -> bool {
        self.inner.lock().overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let ring = Ring::new(8);
        for c in b"abc" {
            assert!(ring.push(*c));
        }
        assert_eq!(ring.pop(), Some(b'a'));
        assert_eq!(ring.pop(), Some(b'b'));
        assert_eq!(ring.pop(), Some(b'c'));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_full_drops() {
        let ring = Ring::new(4); // holds 3
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));
        assert!(!ring.push(4));
        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(4));
    }

    #[test]
    fn test_clear() {
        let ring = Ring::new(8);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.pop(), None);
    }
}
