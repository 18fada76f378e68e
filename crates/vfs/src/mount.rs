//! 挂载表与统一入口
//!
//! [`Vfs`] 持有挂载表，把绝对路径按最长前缀路由到后端；
//! 挂载/卸载时依次通知已注册的观察者，作业控制器与宏引擎
//! 借此在卷出现时接线、消失时拆线。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use alloc::boxed::Box;
use bitflags::bitflags;
use sync::SpinLock;

use crate::error::FsError;
use crate::file_system::{DirStream, File, FileInfo, FileSystem, FsUsage, OpenMode, StMode};
use crate::path;

bitflags! {
    /// 挂载选项
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MountFlags: u8 {
        /// 卷只读，拒绝一切写路径操作
        const READ_ONLY = 1 << 0;
        /// 卷隐藏，不出现在目录列表里
        const HIDDEN = 1 << 1;
    }
}

/// 一条挂载记录
#[derive(Clone)]
pub struct Mount {
    /// 挂载点绝对路径，根卷为 `/`
    pub path: String,
    /// 后端实例
    pub fs: Arc<dyn FileSystem>,
    /// 挂载选项
    pub flags: MountFlags,
}

impl core::fmt::Debug for Mount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mount")
            .field("path", &self.path)
            .field("fs", &self.fs.fs_name())
            .field("flags", &self.flags)
            .finish()
    }
}

/// 挂载事件观察者
///
/// 通过 [`Vfs::register_observer`] 显式注册，按注册顺序
/// 回调。回调发生在前台协作上下文，可以做文件操作。
pub trait MountObserver: Send + Sync {
    /// 卷挂载完成后回调
    fn on_mount(&self, mount: &Mount);
    /// 卷即将从挂载表移除前回调
    fn on_unmount(&self, mount: &Mount);
}

/// 虚拟文件系统入口
pub struct Vfs {
    mounts: SpinLock<Vec<Mount>>,
    observers: SpinLock<Vec<Arc<dyn MountObserver>>>,
    cwd: SpinLock<String>,
    /// 最近一次失败的 errno，供 CLI 事后查询
    last_errno: AtomicI32,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// 创建空挂载表
    pub fn new() -> Self {
        Vfs {
            mounts: SpinLock::new(Vec::new()),
            observers: SpinLock::new(Vec::new()),
            cwd: SpinLock::new(String::from("/")),
            last_errno: AtomicI32::new(0),
        }
    }

    /// 注册挂载观察者
    ///
    /// 若已有卷在挂载表中，立即对每个卷补发 `on_mount`，
    /// 使注册顺序与挂载顺序解耦。
    pub fn register_observer(&self, observer: Arc<dyn MountObserver>) {
        let mounts = self.mounts.lock().clone();
        for mount in &mounts {
            observer.on_mount(mount);
        }
        self.observers.lock().push(observer);
    }

    /// 把后端挂载到 `mount_path`
    ///
    /// 挂载点必须唯一，冲突返回 [`FsError::Busy`]。
    pub fn mount(
        &self,
        mount_path: &str,
        fs: Arc<dyn FileSystem>,
        flags: MountFlags,
    ) -> Result<(), FsError> {
        self.clear_errno();
        let mount_path = path::canonical("/", mount_path);
        let mount = {
            let mut mounts = self.mounts.lock();
            if mounts.iter().any(|m| m.path == mount_path) {
                return self.fail(FsError::Busy);
            }
            let mount = Mount {
                path: mount_path,
                fs,
                flags,
            };
            mounts.push(mount.clone());
            mount
        };
        log::info!("vfs: mounted {} at {}", mount.fs.fs_name(), mount.path);
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_mount(&mount);
        }
        Ok(())
    }

    /// 卸载 `mount_path` 上的卷
    ///
    /// 先回调观察者（让持有文件的层先收尾），再通知后端，
    /// 最后移出挂载表。此后落在该卷内的路径一律报未挂载。
    pub fn unmount(&self, mount_path: &str) -> Result<(), FsError> {
        self.clear_errno();
        let mount_path = path::canonical("/", mount_path);
        let mount = {
            let mounts = self.mounts.lock();
            match mounts.iter().find(|m| m.path == mount_path) {
                Some(m) => m.clone(),
                None => return self.fail(FsError::NotMounted),
            }
        };
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_unmount(&mount);
        }
        mount.fs.umount()?;
        self.mounts.lock().retain(|m| m.path != mount_path);
        log::info!("vfs: unmounted {}", mount_path);
        Ok(())
    }

    /// 当前挂载表快照
    pub fn mounts(&self) -> Vec<Mount> {
        self.mounts.lock().clone()
    }

    /// `mount_path` 上是否有卷
    pub fn is_mounted(&self, mount_path: &str) -> bool {
        let mount_path = path::canonical("/", mount_path);
        self.mounts.lock().iter().any(|m| m.path == mount_path)
    }

    /// 最近一次失败的 errno，成功的操作会清零
    pub fn last_errno(&self) -> i32 {
        self.last_errno.load(Ordering::Relaxed)
    }

    /// 当前目录
    pub fn getcwd(&self) -> String {
        self.cwd.lock().clone()
    }

    /// 打开文件，`mode` 为 C 风格模式串（`r`/`w`/`a`）
    pub fn open(&self, file_path: &str, mode: &str) -> Result<Arc<dyn File>, FsError> {
        self.clear_errno();
        let mode = OpenMode::parse(mode);
        let (mount, rel) = self.resolve(file_path)?;
        if mode.is_write() && mount.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        mount.fs.open(&rel, mode).or_else(|e| self.fail(e))
    }

    /// 查询文件或目录元数据
    pub fn stat(&self, file_path: &str) -> Result<FileInfo, FsError> {
        self.clear_errno();
        let (mount, rel) = self.resolve(file_path)?;
        mount.fs.stat(&rel).or_else(|e| self.fail(e))
    }

    /// 删除文件
    ///
    /// 持久化模式位带只读位的文件在触碰后端之前即被拒绝。
    pub fn unlink(&self, file_path: &str) -> Result<(), FsError> {
        self.clear_errno();
        let (mount, rel) = self.resolve(file_path)?;
        if mount.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        if let Ok(info) = mount.fs.stat(&rel)
            && info.mode.contains(StMode::READ_ONLY)
        {
            return self.fail(FsError::ReadOnly);
        }
        mount.fs.unlink(&rel).or_else(|e| self.fail(e))
    }

    /// 重命名，不支持跨卷
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.clear_errno();
        let (mount_from, rel_from) = self.resolve(from)?;
        let (mount_to, rel_to) = self.resolve(to)?;
        if mount_from.path != mount_to.path {
            return self.fail(FsError::NotSupported);
        }
        if mount_from.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        mount_from
            .fs
            .rename(&rel_from, &rel_to)
            .or_else(|e| self.fail(e))
    }

    /// 创建目录
    pub fn mkdir(&self, dir_path: &str) -> Result<(), FsError> {
        self.clear_errno();
        let (mount, rel) = self.resolve(dir_path)?;
        if mount.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        mount.fs.mkdir(&rel).or_else(|e| self.fail(e))
    }

    /// 切换当前目录
    pub fn chdir(&self, dir_path: &str) -> Result<(), FsError> {
        self.clear_errno();
        let abs = path::canonical(&self.cwd.lock(), dir_path);
        let (mount, rel) = self.resolve(&abs)?;
        mount.fs.chdir(&rel).or_else(|e| self.fail(e))?;
        *self.cwd.lock() = abs;
        Ok(())
    }

    /// 打开目录遍历
    pub fn opendir(&self, dir_path: &str) -> Result<Box<dyn DirStream>, FsError> {
        self.clear_errno();
        let (mount, rel) = self.resolve(dir_path)?;
        mount.fs.opendir(&rel).or_else(|e| self.fail(e))
    }

    /// 修改模式位，仅 `mask` 覆盖的位生效
    pub fn chmod(&self, file_path: &str, mode: StMode, mask: StMode) -> Result<(), FsError> {
        self.clear_errno();
        let (mount, rel) = self.resolve(file_path)?;
        if mount.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        mount.fs.chmod(&rel, mode, mask).or_else(|e| self.fail(e))
    }

    /// 设置修改时间
    pub fn utime(&self, file_path: &str, mtime: api::UnixTime) -> Result<(), FsError> {
        self.clear_errno();
        let (mount, rel) = self.resolve(file_path)?;
        if mount.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        mount.fs.utime(&rel, mtime).or_else(|e| self.fail(e))
    }

    /// 查询 `volume` 所在卷的容量
    pub fn getfree(&self, volume: &str) -> Result<FsUsage, FsError> {
        self.clear_errno();
        let (mount, _) = self.resolve(volume)?;
        mount.fs.getfree().or_else(|e| self.fail(e))
    }

    /// 格式化 `volume` 所在卷
    pub fn format(&self, volume: &str) -> Result<(), FsError> {
        self.clear_errno();
        let (mount, _) = self.resolve(volume)?;
        if mount.flags.contains(MountFlags::READ_ONLY) {
            return self.fail(FsError::ReadOnly);
        }
        mount.fs.format().or_else(|e| self.fail(e))
    }

    /// 把路径路由到挂载卷，返回挂载记录与卷内相对路径
    ///
    /// 相对路径基于当前目录解析；多个挂载点取最长前缀。
    pub fn resolve(&self, file_path: &str) -> Result<(Mount, String), FsError> {
        let abs = path::canonical(&self.cwd.lock(), file_path);
        let mounts = self.mounts.lock();
        let mut best: Option<(&Mount, &str)> = None;
        for mount in mounts.iter() {
            if let Some(rel) = path::strip_mount(&mount.path, &abs) {
                let better = match best {
                    Some((prev, _)) => mount.path.len() > prev.path.len(),
                    None => true,
                };
                if better {
                    best = Some((mount, rel));
                }
            }
        }
        match best {
            Some((mount, rel)) => Ok((mount.clone(), String::from(rel))),
            None => self.fail(FsError::NotMounted),
        }
    }

    fn clear_errno(&self) {
        self.last_errno.store(0, Ordering::Relaxed);
    }

    fn fail<T>(&self, err: FsError) -> Result<T, FsError> {
        self.last_errno.store(err.to_errno(), Ordering::Relaxed);
        Err(err)
    }
}
