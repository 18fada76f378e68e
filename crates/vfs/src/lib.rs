//! 虚拟文件系统层
//!
//! 在多个异构后端（FAT 卡、片上 flash）之上提供统一的
//! 文件/目录/属性接口。上层通过挂载表把路径前缀路由到
//! 具体后端，并可注册挂载观察者在卷出现/消失时接线。
//!
//! 本 crate 只定义抽象与路由，不包含任何具体后端实现。

#![no_std]

extern crate alloc;

mod error;
mod file_system;
mod mount;
pub mod path;

pub use error::FsError;
pub use file_system::{
    DirEntry, DirStream, File, FileInfo, FileSystem, FsUsage, OpenMode, StMode,
};
pub use mount::{Mount, MountFlags, MountObserver, Vfs};
