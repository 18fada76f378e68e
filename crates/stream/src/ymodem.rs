//! YModem 接收端
//!
//! 只做接收，不发起始 'C'：发送端直接发 SOH/STX 即开始
//! 传输。协议机嵌在控制器的前台轮询里，实时命令入口把
//! 字节灌进环形缓冲，[`Ymodem::poll`] 在前台取出推进状态。
//!
//! 批量（YModem batch）语义：一个文件收完、收到 EOT 后回
//! ACK 加 'C' 邀请下一个文件头；空文件名的头包表示批次
//! 结束。校验失败不立即 NAK，而是吸干输入等 1 秒超时再
//! NAK，让发送端整包重发。

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use api::{ASCII_ACK, ASCII_CAN, ASCII_EOT, ASCII_NAK, ASCII_SOH, ASCII_STX};
use sync::SpinLock;
use vfs::Vfs;

use crate::ops::ControllerOps;
use crate::ring::Ring;
use crate::source::{InputRouter, SourceLayer};

/// 包间超时（毫秒）
const PACKET_TIMEOUT_MS: u64 = 1000;
/// 连续错误上限，超过即放弃传输
const MAX_ERRORS: u32 = 10;

/// 状态机当前等待的东西
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// 包头字节（SOH/STX/EOT/CAN）
    AwaitSoh,
    /// 包序号
    PacketNum,
    /// 包序号反码
    PacketNumInv,
    /// 载荷
    Payload,
    /// CRC 高字节
    CrcHi,
    /// CRC 低字节
    CrcLo,
    /// 第二个 CAN
    AwaitCancel,
    /// 吸收坏包剩余字节，等超时重同步
    Purge,
}

/// 处理完一个字节后要发给对端的回应
enum Reply {
    None,
    /// 包收妥
    Ack,
    /// 文件头收妥，邀请数据
    AckFile,
    /// 空文件名，批次结束
    NoFile,
    /// 放弃传输
    Can,
    /// 进入吸收模式
    Purge,
}

struct YInner {
    active: bool,
    phase: Phase,
    packet_len: usize,
    /// 本包声明的序号
    seq: u8,
    /// 期望的下一个序号
    expected: u8,
    /// 本包是上一包的重发，写入要跳过
    repeated: bool,
    payload: Vec<u8>,
    crc_hi: u8,
    filename: String,
    filelength: u64,
    received: u64,
    completed: bool,
    errors: u32,
    next_timeout: u64,
    /// 已收到一个 EOT，下一个头包属于批次里的新文件
    eot_pending: bool,
    handle: Option<Arc<dyn vfs::File>>,
}

impl YInner {
    const fn idle() -> Self {
        YInner {
            active: false,
            phase: Phase::AwaitSoh,
            packet_len: 0,
            seq: 0,
            expected: 0,
            repeated: false,
            payload: Vec::new(),
            crc_hi: 0,
            filename: String::new(),
            filelength: 0,
            received: 0,
            completed: false,
            errors: 0,
            next_timeout: 0,
            eot_pending: false,
            handle: None,
        }
    }
}

/// YModem 协议机
pub struct Ymodem {
    vfs: Arc<Vfs>,
    router: Arc<InputRouter>,
    ops: Arc<dyn ControllerOps>,
    ring: Ring,
    inner: SpinLock<YInner>,
}

impl Ymodem {
    /// 创建空闲的协议机
    pub fn new(vfs: Arc<Vfs>, router: Arc<InputRouter>, ops: Arc<dyn ControllerOps>) -> Arc<Self> {
        Arc::new(Ymodem {
            vfs,
            router,
            ops,
            ring: Ring::new(2048),
            inner: SpinLock::new(YInner::idle()),
        })
    }

    /// 是否有传输在进行
    pub fn active(&self) -> bool {
        self.inner.lock().active
    }

    /// 实时入口看到 SOH/STX 时调用：开始一次传输
    ///
    /// 返回 `true` 表示字节已被协议机吃掉。
    pub fn try_start(&self, c: u8) -> bool {
        if c != ASCII_SOH && c != ASCII_STX {
            return false;
        }
        {
            let mut inner = self.inner.lock();
            *inner = YInner::idle();
            inner.active = true;
            inner.next_timeout = self.ops.elapsed_ms() + PACKET_TIMEOUT_MS;
        }
        self.ring.clear();
        self.ring.push(c);
        self.router.push(SourceLayer::Ymodem);
        self.router.notify_stream_changed();
        log::info!("ymodem: transfer started");
        true
    }

    /// 传输期间的字节入口
    pub fn put_char(&self, c: u8) {
        self.ring.push(c);
    }

    /// 前台轮询：处理超时并消化缓冲里的字节
    pub fn poll(&self) {
        let mut inner = self.inner.lock();
        if !inner.active {
            return;
        }

        let now = self.ops.elapsed_ms();
        if now >= inner.next_timeout {
            inner.next_timeout = now + PACKET_TIMEOUT_MS;
            inner.errors += 1;
            if inner.errors > MAX_ERRORS {
                drop(inner);
                self.end();
                return;
            }
            inner.phase = Phase::AwaitSoh;
            self.ops.write_char(ASCII_NAK);
        }

        while let Some(c) = self.ring.pop() {
            inner.next_timeout = self.ops.elapsed_ms() + PACKET_TIMEOUT_MS;

            match self.process(&mut inner, c) {
                Reply::None => {}
                Reply::Ack => {
                    inner.errors = 0;
                    self.ops.write_char(ASCII_ACK);
                }
                Reply::AckFile => {
                    inner.errors = 0;
                    self.ops.write_char(ASCII_ACK);
                    self.ops.write_char(b'C');
                }
                Reply::NoFile => {
                    self.ops.write_char(ASCII_ACK);
                    drop(inner);
                    self.end();
                    return;
                }
                Reply::Can => {
                    self.ops.write_char(ASCII_CAN);
                    self.ops.write_char(ASCII_CAN);
                    drop(inner);
                    self.end();
                    return;
                }
                Reply::Purge => {
                    inner.errors += 1;
                    inner.phase = Phase::Purge;
                    self.ring.clear();
                }
            }

            if !inner.active {
                // 对端 CAN CAN 取消：关文件、让出输入流
                drop(inner);
                self.end();
                return;
            }
        }
    }

    /// 软复位：通知对端取消并收尾
    pub fn on_reset(&self) {
        let active = self.inner.lock().active;
        if active {
            self.ops.write_char(ASCII_CAN);
            self.ops.write_char(ASCII_CAN);
            self.end();
        }
    }

    fn end(&self) {
        let handle = {
            let mut inner = self.inner.lock();
            let handle = inner.handle.take();
            *inner = YInner::idle();
            handle
        };
        if let Some(handle) = handle {
            let _ = handle.close();
        }
        self.ring.clear();
        if self.router.pop(SourceLayer::Ymodem) {
            self.router.notify_stream_changed();
        }
    }

    fn process(&self, inner: &mut YInner, c: u8) -> Reply {
        match inner.phase {
            Phase::AwaitSoh => match c {
                ASCII_SOH | ASCII_STX => {
                    inner.packet_len = if c == ASCII_SOH { 128 } else { 1024 };
                    inner.payload.clear();
                    inner.repeated = false;
                    inner.phase = Phase::PacketNum;
                    Reply::None
                }
                ASCII_EOT => {
                    if inner.eot_pending {
                        // 批次结束
                        inner.active = false;
                        Reply::NoFile
                    } else {
                        // 文件收完，邀请批次里的下一个头包
                        if let Some(handle) = inner.handle.take() {
                            let _ = handle.close();
                        }
                        inner.eot_pending = true;
                        inner.filename.clear();
                        inner.filelength = 0;
                        inner.received = 0;
                        inner.completed = false;
                        inner.expected = 0;
                        Reply::AckFile
                    }
                }
                ASCII_CAN => {
                    inner.phase = Phase::AwaitCancel;
                    Reply::None
                }
                _ => Reply::Purge,
            },
            Phase::PacketNum => {
                inner.seq = c;
                inner.phase = Phase::PacketNumInv;
                Reply::None
            }
            Phase::PacketNumInv => {
                if c ^ 0xFF != inner.seq {
                    return Reply::Purge;
                }
                if inner.seq == inner.expected {
                    inner.phase = Phase::Payload;
                    Reply::None
                } else if inner.seq == inner.expected.wrapping_sub(1) {
                    // 对端没收到我们的 ACK，整包重发
                    inner.repeated = true;
                    inner.phase = Phase::Payload;
                    Reply::None
                } else {
                    Reply::Purge
                }
            }
            Phase::Payload => {
                inner.payload.push(c);
                if inner.payload.len() == inner.packet_len {
                    inner.phase = Phase::CrcHi;
                }
                Reply::None
            }
            Phase::CrcHi => {
                inner.crc_hi = c;
                inner.phase = Phase::CrcLo;
                Reply::None
            }
            Phase::CrcLo => {
                inner.phase = Phase::AwaitSoh;
                let crc = (inner.crc_hi as u16) << 8 | c as u16;
                if api::crc16_ccitt(&inner.payload) != crc {
                    return Reply::Purge;
                }
                if inner.seq == 0 && inner.filename.is_empty() {
                    self.accept_header(inner)
                } else {
                    self.accept_data(inner)
                }
            }
            Phase::AwaitCancel => {
                if c == ASCII_CAN {
                    inner.active = false;
                    log::info!("ymodem: cancelled by sender");
                }
                // 孤立的 CAN 忽略，回去等包头
                inner.phase = Phase::AwaitSoh;
                Reply::None
            }
            Phase::Purge => Reply::None,
        }
    }

    /// 头包：载荷 = 文件名 NUL 文件长度（ASCII 十进制）
    fn accept_header(&self, inner: &mut YInner) -> Reply {
        let name_end = inner
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(inner.payload.len());
        if name_end == 0 {
            // 空文件名：批次结束
            inner.active = false;
            return Reply::NoFile;
        }

        let name = String::from_utf8_lossy(&inner.payload[..name_end]).into_owned();
        let digits: Vec<u8> = inner
            .payload
            .get(name_end + 1..)
            .unwrap_or(&[])
            .iter()
            .copied()
            .take_while(u8::is_ascii_digit)
            .collect();
        inner.filelength = String::from_utf8_lossy(&digits).parse().unwrap_or(0);

        let path = if name.starts_with('/') {
            name.clone()
        } else {
            format!("/{name}")
        };
        match self.vfs.open(&path, "w") {
            Ok(handle) => {
                log::info!("ymodem: receiving {name} ({} bytes)", inner.filelength);
                inner.filename = name;
                inner.handle = Some(handle);
                inner.expected = 1;
                inner.eot_pending = false;
                Reply::AckFile
            }
            Err(_) => {
                inner.active = false;
                Reply::Can
            }
        }
    }

    /// 数据包：写入文件，末包按声明的文件长度截断
    fn accept_data(&self, inner: &mut YInner) -> Reply {
        if inner.repeated {
            return Reply::Ack;
        }
        let Some(handle) = inner.handle.clone() else {
            inner.active = false;
            return Reply::Can;
        };

        inner.expected = inner.expected.wrapping_add(1);
        inner.received += inner.packet_len as u64;

        let mut write_len = inner.packet_len;
        if inner.filelength > 0 && inner.received > inner.filelength {
            inner.completed = true;
            let excess = (inner.received - inner.filelength) as usize;
            write_len = inner.packet_len.saturating_sub(excess);
        }

        match handle.write(&inner.payload[..write_len]) {
            Ok(n) if n == write_len => Reply::Ack,
            _ => {
                inner.active = false;
                Reply::Can
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Protocol-level tests live in the controller integration suite,
    // where a mock host records the reply bytes. Here we only cover
    // the pure packet framing helpers.
    use api::crc16_ccitt;

    #[test]
    fn test_crc_matches_known_vector() {
        // "123456789" under CRC16/XMODEM
        assert_eq!(crc16_ccitt(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_seq_complement() {
        let seq: u8 = 0x01;
        let inv: u8 = 0xFE;
        assert_eq!(inv ^ 0xFF, seq);
    }
}
