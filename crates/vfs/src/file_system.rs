//! 后端抽象接口
//!
//! 每个文件系统后端实现 [`FileSystem`]，打开的文件实现
//! [`File`]，目录遍历实现 [`DirStream`]。所有句柄方法取
//! `&self`，内部用自旋锁保护可变状态，以便经 `Arc` 在
//! 挂载表与作业控制器之间共享。

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use api::UnixTime;
use bitflags::bitflags;

use crate::error::FsError;

bitflags! {
    /// 随文件持久化的模式位
    ///
    /// FAT 后端映射到目录项属性位；flash 后端打包进
    /// `'m'` 自定义属性。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StMode: u32 {
        /// 只读
        const READ_ONLY = 1 << 0;
        /// 隐藏（目录列表默认跳过）
        const HIDDEN = 1 << 1;
        /// 系统文件
        const SYSTEM = 1 << 2;
        /// 目录
        const DIRECTORY = 1 << 3;
    }
}

bitflags! {
    /// 打开模式
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        /// 读
        const READ = 1 << 0;
        /// 写
        const WRITE = 1 << 1;
        /// 不存在则创建
        const CREATE = 1 << 2;
        /// 截断至零长
        const TRUNCATE = 1 << 3;
        /// 定位到末尾追加
        const APPEND = 1 << 4;
    }
}

impl OpenMode {
    /// 解析 C 风格模式串，未知字符忽略
    ///
    /// `"r"` = 只读；`"w"` = 创建 | 截断 | 写；
    /// `"a"` = 创建 | 追加 | 写。
    pub fn parse(mode: &str) -> Self {
        let mut flags = OpenMode::empty();
        for ch in mode.bytes() {
            match ch {
                b'r' => flags |= OpenMode::READ,
                b'w' => flags |= OpenMode::WRITE | OpenMode::CREATE | OpenMode::TRUNCATE,
                b'a' => flags |= OpenMode::WRITE | OpenMode::CREATE | OpenMode::APPEND,
                _ => {}
            }
        }
        flags
    }

    /// 是否请求了写访问
    pub fn is_write(self) -> bool {
        self.intersects(OpenMode::WRITE)
    }
}

/// `stat` 的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// 文件字节数，目录为 0
    pub size: u64,
    /// 持久化模式位
    pub mode: StMode,
    /// 修改时间，后端不记录时为 `None`
    pub mtime: Option<UnixTime>,
}

/// 目录遍历产出的条目
///
/// `.` 与 `..` 已由后端消化，不会出现在条目流中。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 条目名（不含路径）
    pub name: String,
    /// 文件字节数，目录为 0
    pub size: u64,
    /// 是否为目录
    pub is_dir: bool,
}

/// 卷容量信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    /// 卷总字节数
    pub total: u64,
    /// 已用字节数
    pub used: u64,
}

/// 已打开文件的句柄接口
pub trait File: Send + Sync {
    /// 从当前位置读入 `buf`，返回实际读到的字节数
    ///
    /// 返回 0 表示已到文件末尾。
    fn read(&self, buf: &mut [u8]) -> Result<usize, FsError>;

    /// 在当前位置写出 `buf`，返回实际写入的字节数
    fn write(&self, buf: &[u8]) -> Result<usize, FsError>;

    /// 定位到绝对字节偏移
    fn seek(&self, pos: u64) -> Result<(), FsError>;

    /// 当前字节偏移
    fn tell(&self) -> u64;

    /// 文件总字节数
    fn size(&self) -> u64;

    /// 是否已读到末尾
    fn eof(&self) -> bool {
        self.tell() >= self.size()
    }

    /// 关闭并落盘
    ///
    /// flash 后端在此写回 mtime/mode 属性。句柄被 drop 而
    /// 未显式 close 时后端负责兜底同步。
    fn close(&self) -> Result<(), FsError>;
}

/// 目录条目流
pub trait DirStream: Send {
    /// 取下一个条目，遍历完返回 `Ok(None)`
    fn next_entry(&mut self) -> Result<Option<DirEntry>, FsError>;
}

/// 文件系统后端接口
///
/// 路径参数均为以 `/` 开头、相对挂载点的路径。
pub trait FileSystem: Send + Sync {
    /// 后端名，用于日志与挂载表展示
    fn fs_name(&self) -> &'static str;

    /// 打开文件
    fn open(&self, path: &str, mode: OpenMode) -> Result<Arc<dyn File>, FsError>;

    /// 查询文件或目录元数据
    fn stat(&self, path: &str) -> Result<FileInfo, FsError>;

    /// 删除文件
    fn unlink(&self, path: &str) -> Result<(), FsError>;

    /// 重命名，两路径须位于同一卷
    fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    /// 创建目录
    fn mkdir(&self, path: &str) -> Result<(), FsError>;

    /// 切换后端当前目录
    fn chdir(&self, path: &str) -> Result<(), FsError>;

    /// 打开目录遍历
    fn opendir(&self, path: &str) -> Result<Box<dyn DirStream>, FsError>;

    /// 修改模式位，仅 `mask` 覆盖的位生效
    fn chmod(&self, path: &str, mode: StMode, mask: StMode) -> Result<(), FsError>;

    /// 设置修改时间
    fn utime(&self, path: &str, mtime: UnixTime) -> Result<(), FsError>;

    /// 查询卷容量
    fn getfree(&self) -> Result<FsUsage, FsError>;

    /// 格式化整卷
    fn format(&self) -> Result<(), FsError>;

    /// 把缓存数据刷入介质
    fn sync(&self) -> Result<(), FsError>;

    /// 卸载前的收尾
    fn umount(&self) -> Result<(), FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_parse() {
        assert_eq!(OpenMode::parse("r"), OpenMode::READ);
        assert_eq!(
            OpenMode::parse("w"),
            OpenMode::WRITE | OpenMode::CREATE | OpenMode::TRUNCATE
        );
        assert_eq!(
            OpenMode::parse("a"),
            OpenMode::WRITE | OpenMode::CREATE | OpenMode::APPEND
        );
        // unknown characters are ignored
        assert_eq!(OpenMode::parse("rb+"), OpenMode::READ);
        assert!(OpenMode::parse("w").is_write());
        assert!(!OpenMode::parse("r").is_write());
    }
}
