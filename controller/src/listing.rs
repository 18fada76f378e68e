//! 目录列表
//!
//! 输出格式：`[FILE:<路径>|SIZE:<字节数>[|UNUSABLE]]`，每条
//! 一行。目录条目 `SIZE:-1`。层级扫描先列本目录的文件，再
//! 递归子目录；过滤模式只列 G-code 类扩展名。文件名超长或
//! 含实时命令字节的条目照列，但打上 `UNUSABLE` 标记——
//! 这样的名字没法通过命令行引用。

use api::{ASCII_EOL, CMD_CYCLE_START, CMD_FEED_HOLD, CMD_STATUS_REPORT};
use stream::ControllerOps;
use vfs::{DirEntry, FsError, MountFlags, Vfs};

/// 递归深度上限
pub(crate) const SCAN_DEPTH: u8 = 10;
/// 路径长度上限（字节），超过即不再深入
const MAX_PATHLEN: usize = 128;

/// 过滤模式放行的扩展名
const FILETYPES: [&str; 9] = [
    "nc", "ncc", "ngc", "cnc", "gcode", "txt", "text", "tap", "macro",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameStatus {
    /// 过滤模式下被扩展名筛掉
    Filtered,
    Valid,
    /// 列出但无法经命令行引用
    Invalid,
}

fn filename_valid(name: &str) -> NameStatus {
    let has_realtime = name
        .bytes()
        .any(|b| b == CMD_STATUS_REPORT || b == CMD_CYCLE_START || b == CMD_FEED_HOLD);
    if name.len() > 40 || has_realtime {
        NameStatus::Invalid
    } else {
        NameStatus::Valid
    }
}

fn allowed(name: &str, is_file: bool) -> NameStatus {
    if !is_file {
        return filename_valid(name);
    }
    let ext = match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.len() <= 7 => ext.to_ascii_lowercase(),
        _ => return NameStatus::Filtered,
    };
    if FILETYPES.contains(&ext.as_str()) {
        filename_valid(name)
    } else {
        NameStatus::Filtered
    }
}

/// 扫描整棵已挂载的目录树并写出条目
pub(crate) fn scan(
    vfs: &Vfs,
    ops: &dyn ControllerOps,
    filtered: bool,
    depth: u8,
) -> Result<(), FsError> {
    let mut path = String::new();
    scan_dir(vfs, ops, &mut path, depth, filtered)
}

fn read_entries(vfs: &Vfs, path: &str) -> Result<Vec<DirEntry>, FsError> {
    let mut dir = vfs.opendir(if path.is_empty() { "/" } else { path })?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry()? {
        entries.push(entry);
    }
    Ok(entries)
}

fn scan_dir(
    vfs: &Vfs,
    ops: &dyn ControllerOps,
    path: &mut String,
    depth: u8,
    filtered: bool,
) -> Result<(), FsError> {
    let entries = read_entries(vfs, path)?;

    // 第一遍：文件
    for entry in entries.iter().filter(|e| !e.is_dir) {
        let status = if filtered {
            allowed(&entry.name, true)
        } else {
            filename_valid(&entry.name)
        };
        if status != NameStatus::Filtered {
            write_entry(ops, path, &entry.name, entry.size as i64, status);
        }
    }

    // 第二遍：目录，递归前先列出目录本身
    for entry in entries.iter().filter(|e| e.is_dir) {
        let status = filename_valid(&entry.name);
        write_entry(ops, path, &entry.name, -1, status);

        if depth > 1 {
            let saved = path.len();
            if saved + entry.name.len() + 1 > MAX_PATHLEN - 1 {
                break;
            }
            path.push('/');
            path.push_str(&entry.name);
            scan_dir(vfs, ops, path, depth - 1, filtered)?;
            path.truncate(saved);
        }
    }

    // 挂在本目录下的其它卷作为目录条目出现，隐藏卷除外
    let parent = if path.is_empty() {
        String::from("/")
    } else {
        path.clone()
    };
    for mount in vfs.mounts() {
        if mount.path == "/" || mount.flags.contains(MountFlags::HIDDEN) {
            continue;
        }
        let Some(name) = submount_name(&parent, &mount.path) else {
            continue;
        };
        write_entry(ops, path, name, -1, filename_valid(name));
        if depth > 1 {
            let saved = path.len();
            path.push('/');
            path.push_str(name);
            scan_dir(vfs, ops, path, depth - 1, filtered)?;
            path.truncate(saved);
        }
    }

    Ok(())
}

/// `mount_path` 直接挂在 `parent` 下时返回其目录名
fn submount_name<'a>(parent: &str, mount_path: &'a str) -> Option<&'a str> {
    let rel = if parent == "/" {
        mount_path.strip_prefix('/')?
    } else {
        mount_path.strip_prefix(parent)?.strip_prefix('/')?
    };
    if rel.is_empty() || rel.contains('/') {
        None
    } else {
        Some(rel)
    }
}

fn write_entry(ops: &dyn ControllerOps, path: &str, name: &str, size: i64, status: NameStatus) {
    let tag = if status == NameStatus::Invalid {
        "|UNUSABLE"
    } else {
        ""
    };
    ops.write(&format!("[FILE:{path}/{name}|SIZE:{size}{tag}]{ASCII_EOL}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        assert_eq!(allowed("part.nc", true), NameStatus::Valid);
        assert_eq!(allowed("PART.NGC", true), NameStatus::Valid);
        assert_eq!(allowed("readme.md", true), NameStatus::Filtered);
        // no extension at all
        assert_eq!(allowed("Makefile", true), NameStatus::Filtered);
        // over-long extension is never matched
        assert_eq!(allowed("a.verylongext", true), NameStatus::Filtered);
        // directories bypass the extension filter
        assert_eq!(allowed("subdir", false), NameStatus::Valid);
    }

    #[test]
    fn test_submount_name() {
        assert_eq!(submount_name("/", "/littlefs"), Some("littlefs"));
        assert_eq!(submount_name("/", "/a/b"), None);
        assert_eq!(submount_name("/a", "/a/b"), Some("b"));
        assert_eq!(submount_name("/a", "/ab"), None);
    }

    #[test]
    fn test_unusable_names() {
        assert_eq!(filename_valid("ok.nc"), NameStatus::Valid);
        assert_eq!(filename_valid("has?mark.nc"), NameStatus::Invalid);
        assert_eq!(filename_valid("hold!file.nc"), NameStatus::Invalid);
        let long = "x".repeat(41);
        assert_eq!(filename_valid(&long), NameStatus::Invalid);
        let edge = "x".repeat(40);
        assert_eq!(filename_valid(&edge), NameStatus::Valid);
    }
}
