//! 块设备模块

mod ram_disk;

pub use ram_disk::RamDisk;

/// 扇区介质接口
///
/// FAT 后端经此读写 SD 卡。读写以整块为单位，`buf` 长度
/// 必须等于块大小。
pub trait BlockDevice: Send + Sync {
    /// 读取一块
    /// # 参数：
    /// * `block_id` - 块号
    /// * `buf` - 接收缓冲区，长度须等于块大小
    /// # 返回值：
    /// 读取成功返回 true
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> bool;

    /// 写入一块
    /// # 参数：
    /// * `block_id` - 块号
    /// * `buf` - 数据缓冲区，长度须等于块大小
    /// # 返回值：
    /// 写入成功返回 true
    fn write_block(&self, block_id: usize, buf: &[u8]) -> bool;

    /// 刷新到介质
    fn flush(&self) -> bool {
        true
    }

    /// 块大小（字节）
    fn block_size(&self) -> usize;

    /// 总块数
    fn total_blocks(&self) -> usize;
}
