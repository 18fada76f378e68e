//! FAT 文件系统后端
//!
//! 封装外部 `fatfs` 库，面向可插拔的 SD 卡。卷的挂载状态
//! 在运行中随插拔变化，所有操作在未挂载时返回
//! [`FsError::NotMounted`]。可选的卡检测引脚用于上电早期
//! 挂载判断与实时状态上报。
//!
//! FAT 目录项不携带扩展属性，`chmod`/`utime` 不受支持。

mod disk;

pub use disk::DiskIo;

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use device::{BlockDevice, CardDetect, DateTime};
use fatfs::{FormatVolumeOptions, FsOptions};
use sync::SpinLock;
use vfs::{DirEntry, DirStream, File, FileInfo, FileSystem, FsError, FsUsage, OpenMode, StMode};

/// 持有 fatfs 卷的包装
///
/// `fatfs::FileSystem` 的选项里带非 `Sync` 的 trait 对象，
/// 本身不是 `Send`；卷只经由 [`SpinLock`] 串行访问。
struct Volume(fatfs::FileSystem<DiskIo>);

// SAFETY: 对卷的一切访问都在持有 SpinLock 的临界区内
unsafe impl Send for Volume {}

impl core::ops::Deref for Volume {
    type Target = fatfs::FileSystem<DiskIo>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

type SharedVolume = Arc<SpinLock<Option<Volume>>>;

/// FAT 后端
pub struct FatFs {
    dev: Arc<dyn BlockDevice>,
    detect: Option<Arc<dyn CardDetect>>,
    volume: SharedVolume,
}

impl FatFs {
    /// 创建后端，初始为未挂载状态
    ///
    /// `detect` 为卡检测引脚，无引脚的板子传 `None`。
    pub fn new(dev: Arc<dyn BlockDevice>, detect: Option<Arc<dyn CardDetect>>) -> Arc<Self> {
        Arc::new(FatFs {
            dev,
            detect,
            volume: Arc::new(SpinLock::new(None)),
        })
    }

    /// 挂载介质上的卷，已挂载时幂等
    pub fn mount_volume(&self) -> Result<(), FsError> {
        let mut volume = self.volume.lock();
        if volume.is_some() {
            return Ok(());
        }
        let fs = fatfs::FileSystem::new(DiskIo::new(self.dev.clone()), FsOptions::new())
            .map_err(|e| {
                log::warn!("fatfs: mount failed: {e}");
                FsError::Corrupted
            })?;
        *volume = Some(Volume(fs));
        Ok(())
    }

    /// 卷当前是否已挂载
    pub fn mounted(&self) -> bool {
        self.volume.lock().is_some()
    }

    /// 是否带卡检测引脚
    pub fn detectable(&self) -> bool {
        self.detect.is_some()
    }

    /// 检测引脚当前是否报告有卡，无引脚时返回 false
    pub fn card_inserted(&self) -> bool {
        self.detect.as_ref().is_some_and(|d| d.card_inserted())
    }

    /// 实时状态行的挂载状态整数
    ///
    /// bit0 = 已挂载，bit1 = 有检测引脚。
    pub fn mount_status(&self) -> u8 {
        (u8::from(self.detectable()) << 1) | u8::from(self.mounted())
    }
}

/// 去掉挂载层相对路径的前导 `/`，得到 fatfs 的根相对路径
fn fat_path(rel: &str) -> &str {
    rel.trim_start_matches('/')
}

fn map_io(err: std::io::Error) -> FsError {
    match err.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound,
        std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
        std::io::ErrorKind::InvalidInput => FsError::InvalidArgument,
        _ => FsError::Io,
    }
}

fn attr_mode(attr: fatfs::FileAttributes, is_dir: bool) -> StMode {
    let mut mode = StMode::empty();
    if attr.contains(fatfs::FileAttributes::READ_ONLY) {
        mode |= StMode::READ_ONLY;
    }
    if attr.contains(fatfs::FileAttributes::HIDDEN) {
        mode |= StMode::HIDDEN;
    }
    if attr.contains(fatfs::FileAttributes::SYSTEM) {
        mode |= StMode::SYSTEM;
    }
    if is_dir {
        mode |= StMode::DIRECTORY;
    }
    mode
}

fn entry_mtime(dt: fatfs::DateTime) -> Option<api::UnixTime> {
    DateTime {
        year: i32::from(dt.date.year),
        month: u32::from(dt.date.month),
        day: u32::from(dt.date.day),
        hour: u32::from(dt.time.hour),
        minute: u32::from(dt.time.min),
        second: u32::from(dt.time.sec),
    }
    .epoch()
}

struct FatFileState {
    pos: u64,
    size: u64,
}

/// 已打开文件的句柄
///
/// fatfs 的文件对象借用卷，不能跨调用持有；句柄只记路径
/// 与读写位置，每次操作重新按路径打开。
struct FatFile {
    volume: SharedVolume,
    path: String,
    state: SpinLock<FatFileState>,
}

impl File for FatFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut state = self.state.lock();
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        let mut f = fs.root_dir().open_file(&self.path).map_err(map_io)?;
        f.seek(SeekFrom::Start(state.pos)).map_err(map_io)?;
        let n = f.read(buf).map_err(map_io)?;
        state.pos += n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, FsError> {
        let mut state = self.state.lock();
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        let mut f = fs.root_dir().open_file(&self.path).map_err(map_io)?;
        f.seek(SeekFrom::Start(state.pos)).map_err(map_io)?;
        f.write_all(buf).map_err(map_io)?;
        f.flush().map_err(map_io)?;
        state.pos += buf.len() as u64;
        state.size = state.size.max(state.pos);
        Ok(buf.len())
    }

    fn seek(&self, pos: u64) -> Result<(), FsError> {
        let mut state = self.state.lock();
        if pos > state.size {
            return Err(FsError::InvalidArgument);
        }
        state.pos = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.state.lock().pos
    }

    fn size(&self) -> u64 {
        self.state.lock().size
    }

    fn close(&self) -> Result<(), FsError> {
        // 写入是直通的，目录项在每次操作后已更新
        Ok(())
    }
}

struct VecDirStream {
    entries: std::vec::IntoIter<DirEntry>,
}

impl DirStream for VecDirStream {
    fn next_entry(&mut self) -> Result<Option<DirEntry>, FsError> {
        Ok(self.entries.next())
    }
}

impl FileSystem for FatFs {
    fn fs_name(&self) -> &'static str {
        "fatfs"
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Arc<dyn File>, FsError> {
        let rel = fat_path(path);
        if rel.is_empty() {
            return Err(FsError::IsADirectory);
        }
        let size = {
            let volume = self.volume.lock();
            let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
            let root = fs.root_dir();
            let mut f = if mode.contains(OpenMode::CREATE) {
                root.create_file(rel).map_err(map_io)?
            } else {
                root.open_file(rel).map_err(map_io)?
            };
            if mode.contains(OpenMode::TRUNCATE) {
                f.truncate().map_err(map_io)?;
            }
            f.seek(SeekFrom::End(0)).map_err(map_io)?
        };
        let pos = if mode.contains(OpenMode::APPEND) { size } else { 0 };
        Ok(Arc::new(FatFile {
            volume: self.volume.clone(),
            path: rel.to_string(),
            state: SpinLock::new(FatFileState { pos, size }),
        }))
    }

    fn stat(&self, path: &str) -> Result<FileInfo, FsError> {
        let rel = fat_path(path);
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        if rel.is_empty() {
            return Ok(FileInfo {
                size: 0,
                mode: StMode::DIRECTORY,
                mtime: None,
            });
        }
        let root = fs.root_dir();
        let (parent, name) = match rel.rfind('/') {
            Some(idx) => (&rel[..idx], &rel[idx + 1..]),
            None => ("", rel),
        };
        let dir = if parent.is_empty() {
            root
        } else {
            root.open_dir(parent).map_err(map_io)?
        };
        for entry in dir.iter() {
            let entry = entry.map_err(map_io)?;
            // FAT 名字匹配不区分大小写
            if entry.file_name().eq_ignore_ascii_case(name) {
                return Ok(FileInfo {
                    size: entry.len(),
                    mode: attr_mode(entry.attributes(), entry.is_dir()),
                    mtime: entry_mtime(entry.modified()),
                });
            }
        }
        Err(FsError::NotFound)
    }

    fn unlink(&self, path: &str) -> Result<(), FsError> {
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        fs.root_dir().remove(fat_path(path)).map_err(map_io)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        let root = fs.root_dir();
        root.rename(fat_path(from), &root, fat_path(to))
            .map_err(map_io)
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        fs.root_dir().create_dir(fat_path(path)).map_err(map_io)?;
        Ok(())
    }

    fn chdir(&self, path: &str) -> Result<(), FsError> {
        let info = self.stat(path)?;
        if info.mode.contains(StMode::DIRECTORY) {
            Ok(())
        } else {
            Err(FsError::NotADirectory)
        }
    }

    fn opendir(&self, path: &str) -> Result<Box<dyn DirStream>, FsError> {
        let rel = fat_path(path);
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        let root = fs.root_dir();
        let dir = if rel.is_empty() {
            root
        } else {
            root.open_dir(rel).map_err(map_io)?
        };
        let mut entries = Vec::new();
        for entry in dir.iter() {
            let entry = entry.map_err(map_io)?;
            let name = entry.file_name();
            // 子目录自带的 . 与 .. 不外露
            if name == "." || name == ".." {
                continue;
            }
            entries.push(DirEntry {
                name,
                size: entry.len(),
                is_dir: entry.is_dir(),
            });
        }
        Ok(Box::new(VecDirStream {
            entries: entries.into_iter(),
        }))
    }

    fn chmod(&self, _path: &str, _mode: StMode, _mask: StMode) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn utime(&self, _path: &str, _mtime: api::UnixTime) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn getfree(&self) -> Result<FsUsage, FsError> {
        let volume = self.volume.lock();
        let fs = volume.as_ref().ok_or(FsError::NotMounted)?;
        let stats = fs.stats().map_err(map_io)?;
        let cluster = u64::from(stats.cluster_size());
        let total = cluster * u64::from(stats.total_clusters());
        let free = cluster * u64::from(stats.free_clusters());
        Ok(FsUsage {
            total,
            used: total - free,
        })
    }

    fn format(&self) -> Result<(), FsError> {
        let mut volume = self.volume.lock();
        // 先放掉旧卷，格式化后无论成败都尝试重新挂载
        volume.take();
        let mut io = DiskIo::new(self.dev.clone());
        let result = fatfs::format_volume(&mut io, FormatVolumeOptions::new()).map_err(map_io);
        match fatfs::FileSystem::new(DiskIo::new(self.dev.clone()), FsOptions::new()) {
            Ok(fs) => *volume = Some(Volume(fs)),
            Err(e) => log::warn!("fatfs: remount after format failed: {e}"),
        }
        result
    }

    fn sync(&self) -> Result<(), FsError> {
        // 写入直通介质，无待刷数据
        Ok(())
    }

    fn umount(&self) -> Result<(), FsError> {
        match self.volume.lock().take() {
            Some(fs) => fs.0.unmount().map_err(map_io),
            None => Ok(()),
        }
    }
}
