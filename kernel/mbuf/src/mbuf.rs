//! Mbuf：包缓冲
//!
//! 布局：`[ headroom | data (len) | tailroom ]`。RX 环上的缓冲与命令/数据帧都用它承载。

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

/// 单包缓冲。
///
/// - `put(n)`：在尾部追加 n 字节（tailroom 减少）
/// - `pull(n)`：从头部消费 n 字节（data 前移，len 减少）
/// - `push(n)`：在 data 前预留 n 字节（headroom 减少，len 增加）
/// - `dup()`：深拷贝，新缓冲与原缓冲不共享存储
#[derive(Clone)]
pub struct Mbuf {
    /// 整块存储： [0..head] = headroom, [head..head+len] = data, [head+len..] = tailroom
    storage: Vec<u8>,
    head: usize,
    len: usize,
}

impl Mbuf {
    /// 分配指定总容量的缓冲；初始 data 长度 0。
    pub fn alloc(capacity: usize) -> Self {
        Self::alloc_with_headroom(capacity, 0)
    }

    /// 分配容量并在前端预留 headroom 字节。
    pub fn alloc_with_headroom(capacity: usize, headroom: usize) -> Self {
        let head = headroom.min(capacity);
        let mut storage = Vec::with_capacity(capacity);
        storage.resize(capacity, 0);
        Mbuf {
            storage,
            head,
            len: 0,
        }
    }

    /// 用一段已有数据构造缓冲（len = data.len()，无 headroom/tailroom）。
    pub fn from_slice(data: &[u8]) -> Self {
        Mbuf {
            storage: data.to_vec(),
            head: 0,
            len: data.len(),
        }
    }

    /// 深拷贝当前 data 区（headroom 一并保留）。RX 环缓冲必须尽快归还，需要长期持有的帧先 dup。
    pub fn dup(&self) -> Self {
        let mut storage = Vec::with_capacity(self.head + self.len);
        storage.extend_from_slice(&self.storage[..self.head + self.len]);
        Mbuf {
            storage,
            head: self.head,
            len: self.len,
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.storage[self.head..self.head + self.len]
    }

    /// 从 data 起始处 `off` 开始、长度 `n` 的切片；越界返回 None。
    #[inline]
    pub fn slice(&self, off: usize, n: usize) -> Option<&[u8]> {
        let end = off.checked_add(n)?;
        self.data().get(off..end)
    }

    /// 设置当前有效 data 长度（DMA 写入后调用）。
    #[inline]
    pub fn set_len(&mut self, len: usize) {
        let max = self.storage.len().saturating_sub(self.head);
        self.len = len.min(max);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn headroom(&self) -> usize {
        self.head
    }

    #[inline]
    pub fn tailroom(&self) -> usize {
        self.storage.len().saturating_sub(self.head + self.len)
    }

    /// 在尾部追加 n 字节，返回可写切片；空间不足则返回 None。
    #[inline]
    pub fn put(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.tailroom() < n {
            return None;
        }
        let start = self.head + self.len;
        self.len += n;
        Some(&mut self.storage[start..start + n])
    }

    /// 在尾部追加一段数据，空间不足时扩容。
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let end = self.head + self.len;
        self.storage.truncate(end);
        self.storage.extend_from_slice(data);
        self.len += data.len();
    }

    /// 从 data 头部消费 n 字节。
    #[inline]
    pub fn pull(&mut self, n: usize) {
        let consume = n.min(self.len);
        self.head += consume;
        self.len -= consume;
    }

    /// 在 data 前让出 n 字节 headroom。
    #[inline]
    pub fn push(&mut self, n: usize) -> bool {
        if self.head < n {
            return false;
        }
        self.head -= n;
        self.len += n;
        true
    }

    /// 确保 data 前至少有 n 字节 headroom。
    pub fn reserve(&mut self, n: usize) {
        if n <= self.head {
            return;
        }
        let need = n - self.head;
        let mut new_storage = Vec::with_capacity(self.storage.len() + need);
        new_storage.resize(need, 0);
        new_storage.extend_from_slice(&self.storage[..]);
        self.storage = new_storage;
        self.head += need;
    }

    /// 将 data 区从偏移 `off` 起、长度 `n` 复制到 `dst`；若范围越界则复制有效部分。
    #[inline]
    pub fn copy_bits(&self, dst: &mut [u8], off: usize, n: usize) -> usize {
        let data = self.data();
        let start = off.min(data.len());
        let count = (data.len() - start).min(n).min(dst.len());
        dst[..count].copy_from_slice(&data[start..start + count]);
        count
    }
}

impl Deref for Mbuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl DerefMut for Mbuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        let (head, len) = (self.head, self.len);
        &mut self.storage[head..head + len]
    }
}

impl core::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mbuf")
            .field("len", &self.len)
            .field("headroom", &self.head)
            .field("tailroom", &self.tailroom())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbuf_put_pull() {
        let mut m = Mbuf::alloc_with_headroom(64, 4);
        assert_eq!(m.headroom(), 4);
        assert_eq!(m.len(), 0);
        let p = m.put(8).unwrap();
        p.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(m.len(), 8);
        assert_eq!(m.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        m.pull(2);
        assert_eq!(m.data(), &[3, 4, 5, 6, 7, 8]);
        assert!(m.push(2));
        assert_eq!(m.len(), 8);
    }

    #[test]
    fn dup_does_not_share_storage() {
        let orig = Mbuf::from_slice(&[0xaa; 16]);
        let mut copy = orig.dup();
        copy[0] = 0x55;
        assert_eq!(orig[0], 0xaa);
        assert_eq!(copy.len(), 16);
    }

    #[test]
    fn slice_rejects_out_of_range() {
        let m = Mbuf::from_slice(&[1, 2, 3, 4]);
        assert_eq!(m.slice(1, 2), Some(&[2u8, 3][..]));
        assert_eq!(m.slice(3, 2), None);
        assert_eq!(m.slice(usize::MAX, 2), None);
    }

    #[test]
    fn extend_grows_past_capacity() {
        let mut m = Mbuf::alloc(2);
        m.extend_from_slice(&[9, 8, 7]);
        assert_eq!(m.data(), &[9, 8, 7]);
    }
}
