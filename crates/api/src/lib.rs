//! 控制器各层共用的定义和声明
//!
//! 包含状态码、实时命令字节、运动/流状态枚举和设置位，确保
//! 文件系统层、流重定向层与控制器粘合层的一致性。

#![no_std]
#![allow(dead_code)]

pub mod crc;
pub mod realtime;
pub mod settings;
pub mod state;
pub mod status;

pub use crc::crc16_ccitt;
pub use realtime::{
    ASCII_ACK, ASCII_CAN, ASCII_EOL, ASCII_EOT, ASCII_LF, ASCII_NAK, ASCII_SOH, ASCII_STX,
    CMD_CYCLE_START, CMD_FEED_HOLD, CMD_RESET, CMD_STATUS_REPORT, CMD_TOOL_ACK, is_realtime_cmd,
};
pub use settings::FsSettings;
pub use state::{MotionState, ProgramFlow, StreamType};
pub use status::{FeedbackMessage, MessageKind, Status};

/// POSIX 风格的秒级时间戳（time_t）
pub type UnixTime = i64;
