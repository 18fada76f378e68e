//! 片上 flash 文件系统后端
//!
//! 面向日志结构的小容量 flash 卷（宏、探针结果等小文件）。
//! 文件系统本体不理解时间戳与权限，这些以自定义属性的形式
//! 随文件存储：
//!
//! - `'t'` - 8 字节小端 Unix 时间戳
//! - `'m'` - 4 字节小端打包模式字（只读/隐藏/目录位）
//!
//! 属性在 `stat`/`open` 时读出，在 `close`（文件被改写过）
//! 与 `mkdir`（仅时间戳）时写回。写模式打开时取 RTC 墙上
//! 时间，关闭时作为 mtime 落盘。

use std::collections::BTreeMap;
use std::sync::Arc;

use api::UnixTime;
use device::Rtc;
use sync::SpinLock;
use vfs::{DirEntry, DirStream, File, FileInfo, FileSystem, FsError, FsUsage, OpenMode, StMode};

/// 时间戳属性的类型标签
const ATTR_MTIME: u8 = b't';
/// 模式字属性的类型标签
const ATTR_MODE: u8 = b'm';

fn encode_mtime(mtime: UnixTime) -> Vec<u8> {
    mtime.to_le_bytes().to_vec()
}

fn decode_mtime(raw: &[u8]) -> Option<UnixTime> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(UnixTime::from_le_bytes(bytes))
}

fn encode_mode(mode: StMode) -> Vec<u8> {
    mode.bits().to_le_bytes().to_vec()
}

fn decode_mode(raw: &[u8]) -> StMode {
    let bytes: [u8; 4] = match raw.try_into() {
        Ok(b) => b,
        Err(_) => return StMode::empty(),
    };
    StMode::from_bits_truncate(u32::from_le_bytes(bytes))
}

struct FlashNode {
    is_dir: bool,
    data: Vec<u8>,
    /// 类型标签到原始字节的自定义属性表
    attrs: BTreeMap<u8, Vec<u8>>,
}

impl FlashNode {
    fn mode(&self) -> StMode {
        let mut mode = self
            .attrs
            .get(&ATTR_MODE)
            .map(|raw| decode_mode(raw))
            .unwrap_or_default();
        if self.is_dir {
            mode |= StMode::DIRECTORY;
        }
        mode
    }

    fn mtime(&self) -> Option<UnixTime> {
        self.attrs.get(&ATTR_MTIME).and_then(|raw| decode_mtime(raw))
    }
}

/// 按绝对路径索引的节点表，根目录 `/` 恒存在
struct FlashStore {
    nodes: BTreeMap<String, FlashNode>,
}

impl FlashStore {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::from("/"),
            FlashNode {
                is_dir: true,
                data: Vec::new(),
                attrs: BTreeMap::new(),
            },
        );
        FlashStore { nodes }
    }

    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &path[..idx],
        }
    }

    fn parent_exists(&self, path: &str) -> bool {
        self.nodes
            .get(Self::parent_of(path))
            .is_some_and(|n| n.is_dir)
    }

    fn children(&self, dir: &str) -> Vec<(String, u64, bool, StMode)> {
        let prefix = if dir == "/" {
            String::from("/")
        } else {
            format!("{dir}/")
        };
        self.nodes
            .iter()
            .filter(|(path, _)| {
                path.as_str() != "/"
                    && path.starts_with(&prefix)
                    && !path[prefix.len()..].contains('/')
            })
            .map(|(path, node)| {
                (
                    path[prefix.len()..].to_string(),
                    node.data.len() as u64,
                    node.is_dir,
                    node.mode(),
                )
            })
            .collect()
    }

    fn used_bytes(&self, block_size: u64) -> u64 {
        self.nodes
            .values()
            .map(|n| (n.data.len() as u64).div_ceil(block_size) * block_size)
            .sum()
    }
}

/// flash 后端
pub struct FlashFs {
    store: Arc<SpinLock<FlashStore>>,
    rtc: Option<Arc<dyn Rtc>>,
    block_size: u64,
    block_count: u64,
}

impl FlashFs {
    /// 创建空卷
    ///
    /// `block_size`/`block_count` 描述 flash 几何，用于容量
    /// 上报与空间检查。
    pub fn new(block_size: u64, block_count: u64, rtc: Option<Arc<dyn Rtc>>) -> Arc<Self> {
        Arc::new(FlashFs {
            store: Arc::new(SpinLock::new(FlashStore::new())),
            rtc,
            block_size,
            block_count,
        })
    }

    fn now(&self) -> Option<UnixTime> {
        self.rtc.as_ref().and_then(|rtc| rtc.now())
    }

    fn capacity(&self) -> u64 {
        self.block_size * self.block_count
    }
}

struct FlashFileState {
    pos: u64,
    modified: bool,
    closed: bool,
}

/// 已打开文件的句柄
struct FlashFile {
    store: Arc<SpinLock<FlashStore>>,
    path: String,
    state: SpinLock<FlashFileState>,
    /// 打开时捕获的墙上时间，关闭时作为 mtime 写回
    open_time: Option<UnixTime>,
    writable: bool,
    capacity: u64,
    block_size: u64,
}

impl File for FlashFile {
    fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut state = self.state.lock();
        let store = self.store.lock();
        let node = store.nodes.get(&self.path).ok_or(FsError::NotFound)?;
        let pos = state.pos as usize;
        let n = buf.len().min(node.data.len().saturating_sub(pos));
        buf[..n].copy_from_slice(&node.data[pos..pos + n]);
        state.pos += n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.writable {
            return Err(FsError::BadHandle);
        }
        let mut state = self.state.lock();
        let mut store = self.store.lock();
        let needed = {
            let node = store.nodes.get(&self.path).ok_or(FsError::NotFound)?;
            let end = state.pos as usize + buf.len();
            (end as u64).saturating_sub(node.data.len() as u64)
        };
        if needed > 0 && store.used_bytes(self.block_size) + needed > self.capacity {
            return Err(FsError::NoSpace);
        }
        let node = store.nodes.get_mut(&self.path).ok_or(FsError::NotFound)?;
        let pos = state.pos as usize;
        let end = pos + buf.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[pos..end].copy_from_slice(buf);
        state.pos = end as u64;
        state.modified = true;
        Ok(buf.len())
    }

    fn seek(&self, pos: u64) -> Result<(), FsError> {
        let mut state = self.state.lock();
        if pos > self.size() {
            return Err(FsError::InvalidArgument);
        }
        state.pos = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.state.lock().pos
    }

    fn size(&self) -> u64 {
        let store = self.store.lock();
        store
            .nodes
            .get(&self.path)
            .map(|n| n.data.len() as u64)
            .unwrap_or(0)
    }

    fn close(&self) -> Result<(), FsError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if state.modified
            && let Some(mtime) = self.open_time
        {
            let mut store = self.store.lock();
            if let Some(node) = store.nodes.get_mut(&self.path) {
                node.attrs.insert(ATTR_MTIME, encode_mtime(mtime));
            }
        }
        Ok(())
    }
}

impl Drop for FlashFile {
    fn drop(&mut self) {
        // 句柄被丢弃而未显式关闭时兜底落属性
        let _ = self.close();
    }
}

struct FlashDirStream {
    entries: std::vec::IntoIter<DirEntry>,
}

impl DirStream for FlashDirStream {
    fn next_entry(&mut self) -> Result<Option<DirEntry>, FsError> {
        Ok(self.entries.next())
    }
}

impl FileSystem for FlashFs {
    fn fs_name(&self) -> &'static str {
        "flashfs"
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Arc<dyn File>, FsError> {
        let mut store = self.store.lock();
        let existing = store.nodes.get(path);
        match existing {
            Some(node) if node.is_dir => return Err(FsError::IsADirectory),
            Some(node) => {
                if mode.is_write() && node.mode().contains(StMode::READ_ONLY) {
                    return Err(FsError::ReadOnly);
                }
            }
            None => {
                if !mode.contains(OpenMode::CREATE) {
                    return Err(FsError::NotFound);
                }
                if !store.parent_exists(path) {
                    return Err(FsError::NotFound);
                }
                store.nodes.insert(
                    path.to_string(),
                    FlashNode {
                        is_dir: false,
                        data: Vec::new(),
                        attrs: BTreeMap::new(),
                    },
                );
            }
        }
        if mode.contains(OpenMode::TRUNCATE)
            && let Some(node) = store.nodes.get_mut(path)
        {
            node.data.clear();
        }
        let size = store
            .nodes
            .get(path)
            .map(|n| n.data.len() as u64)
            .unwrap_or(0);
        let pos = if mode.contains(OpenMode::APPEND) { size } else { 0 };
        Ok(Arc::new(FlashFile {
            store: self.store.clone(),
            path: path.to_string(),
            state: SpinLock::new(FlashFileState {
                pos,
                modified: false,
                closed: false,
            }),
            open_time: if mode.is_write() { self.now() } else { None },
            writable: mode.is_write(),
            capacity: self.capacity(),
            block_size: self.block_size,
        }))
    }

    fn stat(&self, path: &str) -> Result<FileInfo, FsError> {
        let store = self.store.lock();
        let node = store.nodes.get(path).ok_or(FsError::NotFound)?;
        Ok(FileInfo {
            size: if node.is_dir { 0 } else { node.data.len() as u64 },
            mode: node.mode(),
            mtime: node.mtime(),
        })
    }

    fn unlink(&self, path: &str) -> Result<(), FsError> {
        let mut store = self.store.lock();
        let node = store.nodes.get(path).ok_or(FsError::NotFound)?;
        if node.is_dir && !store.children(path).is_empty() {
            return Err(FsError::DirNotEmpty);
        }
        store.nodes.remove(path);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let mut store = self.store.lock();
        if !store.nodes.contains_key(from) {
            return Err(FsError::NotFound);
        }
        if store.nodes.contains_key(to) {
            return Err(FsError::AlreadyExists);
        }
        if !store.parent_exists(to) {
            return Err(FsError::NotFound);
        }
        // 目录改名连同子树一起搬
        let moved: Vec<String> = store
            .nodes
            .keys()
            .filter(|p| p.as_str() == from || p.starts_with(&format!("{from}/")))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = store.nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                store.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let mut store = self.store.lock();
        if store.nodes.contains_key(path) {
            return Err(FsError::AlreadyExists);
        }
        if !store.parent_exists(path) {
            return Err(FsError::NotFound);
        }
        let mut attrs = BTreeMap::new();
        if let Some(now) = self.now() {
            attrs.insert(ATTR_MTIME, encode_mtime(now));
        }
        store.nodes.insert(
            path.to_string(),
            FlashNode {
                is_dir: true,
                data: Vec::new(),
                attrs,
            },
        );
        Ok(())
    }

    fn chdir(&self, path: &str) -> Result<(), FsError> {
        // 仅支持停在卷根，子目录导航不提供
        if path == "/" {
            Ok(())
        } else {
            Err(FsError::NotSupported)
        }
    }

    fn opendir(&self, path: &str) -> Result<Box<dyn DirStream>, FsError> {
        let store = self.store.lock();
        let node = store.nodes.get(path).ok_or(FsError::NotFound)?;
        if !node.is_dir {
            return Err(FsError::NotADirectory);
        }
        // 点目录项在此消化，不进入条目流
        let entries: Vec<DirEntry> = store
            .children(path)
            .into_iter()
            .map(|(name, size, is_dir, _)| DirEntry { name, size, is_dir })
            .collect();
        Ok(Box::new(FlashDirStream {
            entries: entries.into_iter(),
        }))
    }

    fn chmod(&self, path: &str, mode: StMode, mask: StMode) -> Result<(), FsError> {
        let mut store = self.store.lock();
        let node = store.nodes.get_mut(path).ok_or(FsError::NotFound)?;
        let current = node
            .attrs
            .get(&ATTR_MODE)
            .map(|raw| decode_mode(raw))
            .unwrap_or_default();
        let updated = (current - mask) | (mode & mask);
        node.attrs.insert(ATTR_MODE, encode_mode(updated));
        Ok(())
    }

    fn utime(&self, path: &str, mtime: UnixTime) -> Result<(), FsError> {
        let mut store = self.store.lock();
        let node = store.nodes.get_mut(path).ok_or(FsError::NotFound)?;
        node.attrs.insert(ATTR_MTIME, encode_mtime(mtime));
        Ok(())
    }

    fn getfree(&self) -> Result<FsUsage, FsError> {
        let store = self.store.lock();
        Ok(FsUsage {
            total: self.capacity(),
            used: store.used_bytes(self.block_size),
        })
    }

    fn format(&self) -> Result<(), FsError> {
        // 格式化后卷保持可用（等价于格式化紧接重挂载）
        *self.store.lock() = FlashStore::new();
        Ok(())
    }

    fn sync(&self) -> Result<(), FsError> {
        Ok(())
    }

    fn umount(&self) -> Result<(), FsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_packing() {
        assert_eq!(decode_mtime(&encode_mtime(1717245045)), Some(1717245045));
        assert_eq!(decode_mtime(&[1, 2, 3]), None);

        let mode = StMode::READ_ONLY | StMode::HIDDEN;
        assert_eq!(decode_mode(&encode_mode(mode)), mode);
        assert_eq!(decode_mode(&[0xFF]), StMode::empty());
    }

    #[test]
    fn test_parent_of() {
        assert_eq!(FlashStore::parent_of("/a"), "/");
        assert_eq!(FlashStore::parent_of("/a/b"), "/a");
        assert_eq!(FlashStore::parent_of("/a/b/c"), "/a/b");
    }
}
