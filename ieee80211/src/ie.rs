//! 信息元素遍历
//!
//! 每个元素先确认 `[id, len]` 两字节与 `len` 字节载荷都在缓冲内，再读取。
//! 遇到越界元素时迭代器产出一次 `Err` 后结束。

/// 单个信息元素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ie<'a> {
    pub id: u8,
    pub data: &'a [u8],
    /// 元素（id 字节）在 IE 区内的偏移
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IeError {
    /// `offset` 处的元素头或声明长度超出剩余字节
    Truncated { offset: usize },
}

/// IE 区迭代器
#[derive(Debug, Clone)]
pub struct IeIter<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> IeIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    /// 遍历全部元素，返回元素个数；任一元素越界即失败。
    pub fn validate(buf: &'a [u8]) -> Result<usize, IeError> {
        let mut n = 0;
        for ie in IeIter::new(buf) {
            ie?;
            n += 1;
        }
        Ok(n)
    }
}

impl<'a> Iterator for IeIter<'a> {
    type Item = Result<Ie<'a>, IeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        let offset = self.pos;
        let remaining = self.buf.len() - offset;
        if remaining < 2 {
            self.failed = true;
            return Some(Err(IeError::Truncated { offset }));
        }
        let id = self.buf[offset];
        let len = self.buf[offset + 1] as usize;
        if len > remaining - 2 {
            self.failed = true;
            return Some(Err(IeError::Truncated { offset }));
        }
        let data = &self.buf[offset + 2..offset + 2 + len];
        self.pos = offset + 2 + len;
        Some(Ok(Ie { id, data, offset }))
    }
}

/// 查找第一个 `id` 元素（cfg80211_find_ie）。在找到之前遇到越界元素时返回错误。
pub fn find_ie(ies: &[u8], id: u8) -> Result<Option<Ie<'_>>, IeError> {
    for ie in IeIter::new(ies) {
        let ie = ie?;
        if ie.id == id {
            return Ok(Some(ie));
        }
    }
    Ok(None)
}
