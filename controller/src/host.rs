//! 宿主固件接口
//!
//! [`Core`](crate::Core) 不直接碰运动系统与物理连接，
//! 一切经此 trait。大部分方法带空缺省实现，最小宿主只需
//! 提供状态查询、输出与时钟。

use api::MotionState;

/// 宿主固件提供的服务
pub trait Host: Send + Sync {
    /// 当前运动状态
    fn motion_state(&self) -> MotionState;

    /// 向当前连接写文本
    fn write(&self, text: &str);

    /// 向当前连接写单个字节
    fn write_char(&self, c: u8);

    /// 启动以来的毫秒数
    fn elapsed_ms(&self) -> u64;

    /// 进入/退出检查模式（只解析不运动）
    fn set_check_mode(&self, _on: bool) {}

    /// 把实时命令交给运动系统执行
    ///
    /// 返回 `false` 表示宿主不认识该命令。
    fn enqueue_realtime(&self, _c: u8) -> bool {
        false
    }

    /// 取消进行中的运动，位置保持有效
    fn motion_cancel(&self) {}

    /// 停止执行，清空规划队列
    fn exec_stop(&self) {}

    /// 读编号设置的值
    fn setting_value(&self, _id: u32) -> Option<f32> {
        None
    }

    /// 读 NGC 参数
    fn ngc_param(&self, _id: u32) -> Option<f32> {
        None
    }

    /// 写 NGC 参数，编号非法时返回 `false`
    fn set_ngc_param(&self, _id: u32, _value: f32) -> bool {
        false
    }

    /// 当前刀在指定轴上的补偿值
    fn tool_offset(&self, _axis: u8) -> Option<f32> {
        None
    }

    /// 宏结束时回卷解析器的流程控制栈
    fn ngc_flowctrl_unwind(&self) {}

    /// 宏结束时弹出解析器的调用帧
    fn ngc_call_pop(&self) {}
}
