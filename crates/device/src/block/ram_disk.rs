//! 内存模拟块设备

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use sync::SpinLock;

use super::BlockDevice;

/// 内存模拟的块设备
///
/// 用于宿主机测试与开发，替代真实 SD 卡。
pub struct RamDisk {
    /// 存储数据
    data: SpinLock<Vec<u8>>,

    /// 块大小
    block_size: usize,
}

impl RamDisk {
    /// 创建指定大小的内存磁盘
    pub fn new(size: usize, block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new(vec![0u8; size]),
            block_size,
        })
    }

    /// 从字节数组创建
    pub fn from_bytes(data: Vec<u8>, block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new(data),
            block_size,
        })
    }

    /// 获取原始数据（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool {
        if buf.len() != self.block_size {
            return false;
        }

        let data = self.data.lock();
        let offset = block_id * self.block_size;

        if offset + self.block_size > data.len() {
            return false;
        }

        buf.copy_from_slice(&data[offset..offset + self.block_size]);
        true
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool {
        if buf.len() != self.block_size {
            return false;
        }

        let mut data = self.data.lock();
        let offset = block_id * self.block_size;

        if offset + self.block_size > data.len() {
            return false;
        }

        data[offset..offset + self.block_size].copy_from_slice(buf);
        true
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramdisk_read_write_roundtrip() {
        let rd = RamDisk::new(4096, 512);
        assert_eq!(rd.block_size(), 512);
        assert_eq!(rd.total_blocks(), 8);

        let mut wbuf = [0u8; 512];
        wbuf[0] = 0xAA;
        wbuf[511] = 0x55;
        assert!(rd.write_block(3, &wbuf));

        let mut rbuf = [0u8; 512];
        assert!(rd.read_block(3, &mut rbuf));
        assert_eq!(rbuf, wbuf);

        // Other blocks remain zero.
        let mut rbuf2 = [0u8; 512];
        assert!(rd.read_block(2, &mut rbuf2));
        assert_eq!(rbuf2, [0u8; 512]);
    }

    #[test]
    fn test_ramdisk_bounds_and_wrong_buf_size() {
        let rd = RamDisk::new(1024, 512);
        assert_eq!(rd.total_blocks(), 2);

        let mut bad_read = [0u8; 16];
        assert!(!rd.read_block(0, &mut bad_read));

        let bad_write = [0u8; 16];
        assert!(!rd.write_block(0, &bad_write));

        let mut ok_read = [0u8; 512];
        assert!(!rd.read_block(2, &mut ok_read)); // out of range

        let ok_write = [0u8; 512];
        assert!(!rd.write_block(2, &ok_write)); // out of range
    }
}
