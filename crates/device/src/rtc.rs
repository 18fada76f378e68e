//! 实时时钟接口
//!
//! 为文件时间戳提供墙上时间。时钟未上电或未设置时返回
//! `None`，后端据此省略时间戳属性。

use api::UnixTime;
use chrono::{DateTime as ChronoDateTime, Datelike, TimeZone, Timelike, Utc};

/// 实时时钟接口
pub trait Rtc: Send + Sync {
    /// 读取当前 Unix 时间戳（秒），时钟不可用时返回 `None`
    fn now(&self) -> Option<UnixTime>;
}

/// 拆开的日期时间（UTC），用于 FAT 目录项的字段式时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    /// 年
    pub year: i32,
    /// 月
    pub month: u32,
    /// 日
    pub day: u32,
    /// 时
    pub hour: u32,
    /// 分
    pub minute: u32,
    /// 秒
    pub second: u32,
}

impl DateTime {
    /// 从 Unix 时间戳（秒）转换，非法时间戳回落到 1970-01-01
    pub fn from_epoch(epoch: UnixTime) -> Self {
        let utc: ChronoDateTime<Utc> = match Utc.timestamp_opt(epoch, 0) {
            chrono::LocalResult::Single(t) => t,
            _ => {
                return Self {
                    year: 1970,
                    month: 1,
                    day: 1,
                    hour: 0,
                    minute: 0,
                    second: 0,
                };
            }
        };

        Self {
            year: utc.year(),
            month: utc.month(),
            day: utc.day(),
            hour: utc.hour(),
            minute: utc.minute(),
            second: utc.second(),
        }
    }

    /// 转换回 Unix 时间戳（秒），字段非法时返回 `None`
    pub fn epoch(&self) -> Option<UnixTime> {
        match Utc.with_ymd_and_hms(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ) {
            chrono::LocalResult::Single(t) => Some(t.timestamp()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_roundtrip() {
        // 2024-06-01 12:30:45 UTC
        let dt = DateTime::from_epoch(1717245045);
        assert_eq!(dt.year, 2024);
        assert_eq!(dt.month, 6);
        assert_eq!(dt.day, 1);
        assert_eq!(dt.hour, 12);
        assert_eq!(dt.minute, 30);
        assert_eq!(dt.second, 45);
        assert_eq!(dt.epoch(), Some(1717245045));
    }

    #[test]
    fn test_invalid_fields() {
        let dt = DateTime {
            year: 2024,
            month: 13,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(dt.epoch(), None);
    }
}
