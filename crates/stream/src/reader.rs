//! 文件字节流包装
//!
//! 把后端文件句柄包装成解析器视角的字节源，集中维护读取
//! 位置、1 基行号与行尾游程计数。文件最后一行缺少行终止符
//! 时，在 EOF 处恰好合成一个换行，保证解析器总是见到完整
//! 的行。
//!
//! 宏模式（`collapse_eol`）额外把一个游程内的后续终止符
//! 吞掉，使 `\r\n` 只向解析器投递一次换行。

use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;
use vfs::File;

/// 每次从后端预读的字节数
const CHUNK: usize = 64;

/// 一次读取的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 投递一个字节
    Byte(u8),
    /// 暂无数据（宏模式吞掉的终止符）
    NoData,
    /// 文件已读尽（合成换行已投递完）
    Eof,
}

struct ReaderState {
    pos: u64,
    line: u32,
    eol_run: u8,
    buf: Vec<u8>,
    buf_pos: usize,
    done: bool,
}

/// 带行计量的文件读取器
pub struct FileReader {
    file: Arc<dyn File>,
    size: u64,
    collapse_eol: bool,
    state: SpinLock<ReaderState>,
}

impl FileReader {
    /// 包装已打开的文件
    ///
    /// `collapse_eol` 为宏模式：行终止符游程只投递首字节。
    pub fn new(file: Arc<dyn File>, size: u64, collapse_eol: bool) -> Self {
        FileReader {
            file,
            size,
            collapse_eol,
            state: SpinLock::new(ReaderState {
                pos: 0,
                line: 0,
                eol_run: 0,
                buf: Vec::new(),
                buf_pos: 0,
                done: false,
            }),
        }
    }

    /// 取下一个字节
    pub fn next(&self) -> ReadOutcome {
        let mut state = self.state.lock();
        if state.done {
            return ReadOutcome::Eof;
        }

        let c = match self.fetch(&mut state) {
            Some(c) => c,
            None => {
                state.done = true;
                if state.eol_run == 0 {
                    // 最后一行没有终止符，补一个换行
                    state.eol_run = 1;
                    state.line += 1;
                    return ReadOutcome::Byte(b'\n');
                }
                return ReadOutcome::Eof;
            }
        };

        state.pos += 1;
        if c == b'\r' || c == b'\n' {
            let run_start = state.eol_run == 0;
            if run_start {
                state.line += 1;
            }
            state.eol_run = state.eol_run.saturating_add(1);
            if self.collapse_eol && !run_start {
                return ReadOutcome::NoData;
            }
        } else {
            state.eol_run = 0;
        }
        ReadOutcome::Byte(c)
    }

    fn fetch(&self, state: &mut ReaderState) -> Option<u8> {
        if state.buf_pos == state.buf.len() {
            let mut chunk = [0u8; CHUNK];
            // 后端读错误与 EOF 同样终结字节流
            let n = self.file.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                return None;
            }
            state.buf.clear();
            state.buf.extend_from_slice(&chunk[..n]);
            state.buf_pos = 0;
        }
        let c = state.buf[state.buf_pos];
        state.buf_pos += 1;
        Some(c)
    }

    /// 回到文件开头并清空计量
    pub fn rewind(&self) {
        let mut state = self.state.lock();
        let _ = self.file.seek(0);
        state.pos = 0;
        state.line = 0;
        state.eol_run = 0;
        state.buf.clear();
        state.buf_pos = 0;
        state.done = false;
    }

    /// 关闭底层文件
    pub fn close(&self) {
        let _ = self.file.close();
    }

    /// 已投递的字节偏移
    pub fn pos(&self) -> u64 {
        self.state.lock().pos
    }

    /// 当前 1 基行号（最近一个完整行的编号）
    pub fn line(&self) -> u32 {
        self.state.lock().line
    }

    /// 文件总字节数
    pub fn size(&self) -> u64 {
        self.size
    }
}
