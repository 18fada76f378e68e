//! 实时命令字节与传输控制字符
//!
//! 实时命令绕过行缓冲解析器，在输入陷阱中被直接分发。

/// 软复位
pub const CMD_RESET: u8 = 0x18;
/// 状态报告请求
pub const CMD_STATUS_REPORT: u8 = b'?';
/// 循环启动/恢复
pub const CMD_CYCLE_START: u8 = b'~';
/// 进给保持
pub const CMD_FEED_HOLD: u8 = b'!';
/// 换刀完成确认
pub const CMD_TOOL_ACK: u8 = 0xA3;

/// YModem 包头（128 字节载荷）
pub const ASCII_SOH: u8 = 0x01;
/// YModem 包头（1024 字节载荷）
pub const ASCII_STX: u8 = 0x02;
/// 传输结束
pub const ASCII_EOT: u8 = 0x04;
/// 肯定应答
pub const ASCII_ACK: u8 = 0x06;
/// 换行
pub const ASCII_LF: u8 = b'\n';
/// 否定应答
pub const ASCII_NAK: u8 = 0x15;
/// 取消（与 [`CMD_RESET`] 同值；YModem 会话期间所有字节都进入接收环）
pub const ASCII_CAN: u8 = 0x18;

/// 报文行结束符
pub const ASCII_EOL: &str = "\r\n";

/// 判断字节是否为实时命令
pub fn is_realtime_cmd(c: u8) -> bool {
    matches!(
        c,
        CMD_RESET | CMD_STATUS_REPORT | CMD_CYCLE_START | CMD_FEED_HOLD | CMD_TOOL_ACK
    )
}
