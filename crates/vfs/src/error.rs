//! 文件系统错误定义

use api::Status;

/// 文件系统操作错误
///
/// 各后端把自身的错误归一化为该枚举；CLI 边界再经
/// [`FsError::to_status`] 转成对主机上报的状态码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// 路径不存在
    NotFound,
    /// 路径未落在任何已挂载卷内
    NotMounted,
    /// 卷或文件为只读
    ReadOnly,
    /// 路径中间组件不是目录
    NotADirectory,
    /// 对目录执行了文件操作
    IsADirectory,
    /// 目标已存在
    AlreadyExists,
    /// 目录非空，无法删除
    DirNotEmpty,
    /// 卷空间不足
    NoSpace,
    /// 路径非法（空、过长或含内核保留字符）
    InvalidPath,
    /// 参数非法
    InvalidArgument,
    /// 文件未以所需模式打开
    BadHandle,
    /// 后端不支持该操作
    NotSupported,
    /// 挂载点已被占用
    Busy,
    /// 介质损坏或格式不可识别
    Corrupted,
    /// 底层介质 I/O 失败
    Io,
}

impl FsError {
    /// 转换为负的 errno 风格错误码
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NotFound => -2,
            FsError::Io => -5,
            FsError::BadHandle => -9,
            FsError::ReadOnly => -13,
            FsError::Busy => -16,
            FsError::AlreadyExists => -17,
            FsError::NotMounted => -19,
            FsError::NotADirectory => -20,
            FsError::IsADirectory => -21,
            FsError::InvalidPath | FsError::InvalidArgument => -22,
            FsError::NoSpace => -28,
            FsError::Corrupted => -30,
            FsError::NotSupported => -38,
            FsError::DirNotEmpty => -39,
        }
    }

    /// 转换为对主机上报的状态码
    pub fn to_status(self) -> Status {
        match self {
            FsError::NotMounted => Status::FsNotMounted,
            FsError::ReadOnly => Status::FsReadOnly,
            FsError::NotFound => Status::FsDirNotFound,
            FsError::NotADirectory => Status::FsFailedOpenDir,
            FsError::Io | FsError::Corrupted => Status::FileReadError,
            _ => Status::FileOpenFailed,
        }
    }
}

impl core::fmt::Display for FsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::NotMounted => "volume not mounted",
            FsError::ReadOnly => "read-only file or volume",
            FsError::NotADirectory => "not a directory",
            FsError::IsADirectory => "is a directory",
            FsError::AlreadyExists => "already exists",
            FsError::DirNotEmpty => "directory not empty",
            FsError::NoSpace => "no space left on volume",
            FsError::InvalidPath => "invalid path",
            FsError::InvalidArgument => "invalid argument",
            FsError::BadHandle => "bad file handle",
            FsError::NotSupported => "operation not supported",
            FsError::Busy => "mount point busy",
            FsError::Corrupted => "file system corrupted",
            FsError::Io => "media i/o error",
        };
        f.write_str(msg)
    }
}
