//! 卡检测引脚

/// 可选的 SD 卡检测引脚
///
/// 上电时读引脚决定是否在共享总线启用前提早挂载；插拔
/// 沿触发的挂载/卸载由控制器的延迟任务队列处理，本 trait
/// 只负责电平查询。
pub trait CardDetect: Send + Sync {
    /// 当前是否检测到卡
    fn card_inserted(&self) -> bool;
}
