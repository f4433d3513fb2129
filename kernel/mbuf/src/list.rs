//! MbufList：持有者独占的 FIFO 链表
//!
//! 不加锁；跨上下文共享时放进 [`MbufQueue`](crate::MbufQueue)。

use alloc::collections::VecDeque;

use crate::Mbuf;

/// Mbuf 的 FIFO 链表。
#[derive(Debug, Default)]
pub struct MbufList {
    list: VecDeque<Mbuf>,
}

impl MbufList {
    pub const fn new() -> Self {
        Self {
            list: VecDeque::new(),
        }
    }

    /// 队尾入队。
    pub fn enqueue(&mut self, m: Mbuf) {
        self.list.push_back(m);
    }

    /// 队首插回（发送失败的包重新排到最前）。
    pub fn prepend(&mut self, m: Mbuf) {
        self.list.push_front(m);
    }

    /// 把 `other` 整条接到队尾，`other` 变空。
    pub fn enlist(&mut self, other: &mut MbufList) {
        self.list.append(&mut other.list);
    }

    /// 队首出队。
    pub fn dequeue(&mut self) -> Option<Mbuf> {
        self.list.pop_front()
    }

    /// 取走整条链表，自身变空。
    pub fn dechain(&mut self) -> MbufList {
        MbufList {
            list: core::mem::take(&mut self.list),
        }
    }

    /// 丢弃全部缓冲，返回丢弃个数。
    pub fn purge(&mut self) -> usize {
        let n = self.list.len();
        self.list.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn first(&self) -> Option<&Mbuf> {
        self.list.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mbuf> {
        self.list.iter()
    }
}

impl Iterator for MbufList {
    type Item = Mbuf;

    fn next(&mut self) -> Option<Mbuf> {
        self.dequeue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb(tag: u8) -> Mbuf {
        Mbuf::from_slice(&[tag])
    }

    #[test]
    fn fifo_order() {
        let mut ml = MbufList::new();
        ml.enqueue(mb(1));
        ml.enqueue(mb(2));
        ml.prepend(mb(0));
        assert_eq!(ml.len(), 3);
        assert_eq!(ml.dequeue().unwrap()[0], 0);
        assert_eq!(ml.dequeue().unwrap()[0], 1);
        assert_eq!(ml.dequeue().unwrap()[0], 2);
        assert!(ml.dequeue().is_none());
    }

    #[test]
    fn enlist_and_dechain() {
        let mut a = MbufList::new();
        let mut b = MbufList::new();
        a.enqueue(mb(1));
        b.enqueue(mb(2));
        b.enqueue(mb(3));
        a.enlist(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.len(), 3);

        let chain = a.dechain();
        assert!(a.is_empty());
        let tags: alloc::vec::Vec<u8> = chain.map(|m| m[0]).collect();
        assert_eq!(tags, [1, 2, 3]);
    }

    #[test]
    fn purge_counts() {
        let mut ml = MbufList::new();
        ml.enqueue(mb(1));
        ml.enqueue(mb(2));
        assert_eq!(ml.purge(), 2);
        assert!(ml.is_empty());
    }
}
