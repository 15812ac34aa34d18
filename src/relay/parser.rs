//! 网关流式响应的逐行解析。
//!
//! 传输层分块与行边界无关，[`SseDecoder`] 在内部缓存未完成的行，
//! 只有遇到换行才把整行按 UTF-8 解码并解析，多字节字符被切断时不会出现乱码。

use serde_json::Value;
use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_TOKEN: &str = "[DONE]";

/// 一行有效载荷的解析结果。
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Chunk(Value),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// `pending` 的前 `scanned` 个字节已确认不含换行。
    scanned: usize,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已经见到 `[DONE]`。之后的输入全部忽略。
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 喂入一段字节，返回其中完整行产生的帧。
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.pending.extend_from_slice(bytes);

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.pending[from..].iter().position(|&b| b == b'\n') {
            let end = from + offset;
            if push_line(&self.pending[start..end], &mut frames) {
                self.finished = true;
                self.pending.clear();
                self.scanned = 0;
                return frames;
            }
            start = end + 1;
            from = start;
        }
        self.pending.drain(..start);
        self.scanned = self.pending.len();
        frames
    }

    /// 流结束时处理最后一行没有换行符的残留数据。
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.finished || self.pending.is_empty() {
            return frames;
        }
        let line = std::mem::take(&mut self.pending);
        self.scanned = 0;
        self.finished = push_line(&line, &mut frames);
        frames
    }
}

/// 返回 `true` 表示遇到了终止标记。
fn push_line(raw: &[u8], frames: &mut Vec<SseFrame>) -> bool {
    let line = String::from_utf8_lossy(raw);
    let Some(payload) = line.trim_end_matches('\r').strip_prefix(DATA_PREFIX) else {
        return false;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return false;
    }
    if payload == DONE_TOKEN {
        frames.push(SseFrame::Done);
        return true;
    }
    match serde_json::from_str(payload) {
        Ok(chunk) => frames.push(SseFrame::Chunk(chunk)),
        Err(err) => debug!("丢弃无法解析的流式分块: {err}"),
    }
    false
}
