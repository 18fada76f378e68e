//! 文件系统相关的设置位
//!
//! 设置的注册与持久化在控制器一侧；核心只消费这些位。

bitflags::bitflags! {
    /// 文件系统选项（对应控制器的 fs_options 设置字）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsSettings: u16 {
        /// 启动时自动挂载 SD 卷
        const SD_MOUNT_ON_BOOT = 1 << 0;
        /// 将闪存卷标记为隐藏
        const LFS_HIDDEN       = 1 << 1;
        /// 运行前以检查模式预扫描 M98 子程序标号
        const M98_PRESCAN      = 1 << 2;
        /// M30 结束也触发重绕（M2 始终触发）
        const REWIND_M30       = 1 << 3;
        /// 下一把刀为 T0 时也运行 tc.macro
        const TC_MACRO_ON_T0   = 1 << 4;
    }
}

impl Default for FsSettings {
    fn default() -> Self {
        FsSettings::REWIND_M30
    }
}
