//! 路径归一化工具

use alloc::string::String;
use alloc::vec::Vec;

/// 把 `path` 基于当前目录 `cwd` 归一化为绝对路径
///
/// 消解 `.`、`..` 与重复的 `/`。结果总以 `/` 开头，除根
/// 之外不带尾部 `/`。越过根的 `..` 被静默吞掉。
pub fn canonical(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let base = if path.starts_with('/') { "" } else { cwd };
    for seg in base.split('/').chain(path.split('/')) {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(seg),
        }
    }
    if parts.is_empty() {
        return String::from("/");
    }
    let mut out = String::new();
    for seg in &parts {
        out.push('/');
        out.push_str(seg);
    }
    out
}

/// 取路径最后一个组件
pub fn basename(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(idx) => &path[idx + 1..path.trim_end_matches('/').len()],
        None => path,
    }
}

/// 判断 `path` 是否落在挂载点 `mount` 之下，是则返回
/// 相对挂载点的剩余路径（以 `/` 开头，挂载点自身为 `/`）
///
/// 匹配以完整路径组件为界：`/lfs2/a` 不属于挂载点 `/lfs`。
pub fn strip_mount<'a>(mount: &str, path: &'a str) -> Option<&'a str> {
    let mount = mount.trim_end_matches('/');
    if mount.is_empty() {
        // 根卷兜底匹配一切
        return Some(if path.is_empty() { "/" } else { path });
    }
    let rest = path.strip_prefix(mount)?;
    match rest.as_bytes().first() {
        None => Some("/"),
        Some(b'/') => Some(rest),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_absolute() {
        assert_eq!(canonical("/", "/a/b"), "/a/b");
        assert_eq!(canonical("/x", "/a//b/"), "/a/b");
        assert_eq!(canonical("/", "/a/./b/../c"), "/a/c");
        assert_eq!(canonical("/", "/.."), "/");
    }

    #[test]
    fn test_canonical_relative() {
        assert_eq!(canonical("/", "job.nc"), "/job.nc");
        assert_eq!(canonical("/sub", "job.nc"), "/sub/job.nc");
        assert_eq!(canonical("/sub", "../job.nc"), "/job.nc");
        assert_eq!(canonical("/sub", ""), "/sub");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/a/b/file.nc"), "file.nc");
        assert_eq!(basename("file.nc"), "file.nc");
        assert_eq!(basename("/a/dir/"), "dir");
    }

    #[test]
    fn test_strip_mount() {
        assert_eq!(strip_mount("/", "/a/b"), Some("/a/b"));
        assert_eq!(strip_mount("/lfs", "/lfs/a"), Some("/a"));
        assert_eq!(strip_mount("/lfs", "/lfs"), Some("/"));
        assert_eq!(strip_mount("/lfs", "/lfs2/a"), None);
        assert_eq!(strip_mount("/lfs", "/sd/a"), None);
    }
}
