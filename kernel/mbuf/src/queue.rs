//! MbufQueue：加锁的有界队列
//!
//! 每个操作都在队列自身的锁内完成。入队超过 `maxlen` 时丢弃新包并累加 `drops`，
//! 不阻塞也不增长。锁不可重入，队列操作内部不会回调外部代码。

use spin::Mutex;

use crate::{Mbuf, MbufList};

/// 默认队列上限（对应 BSD `IFQ_MAXLEN`）。
pub const IFQ_MAXLEN: usize = 256;

struct Inner {
    list: MbufList,
    maxlen: usize,
    drops: u64,
}

/// 有界 Mbuf 队列。
pub struct MbufQueue {
    inner: Mutex<Inner>,
}

impl MbufQueue {
    pub const fn new(maxlen: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                list: MbufList::new(),
                maxlen,
                drops: 0,
            }),
        }
    }

    /// 入队；队满时丢弃 `m` 并返回 false。
    pub fn enqueue(&self, m: Mbuf) -> bool {
        let mut q = self.inner.lock();
        if q.list.len() < q.maxlen {
            q.list.enqueue(m);
            true
        } else {
            q.drops += 1;
            log::trace!(target: "iwlwifi::mbuf", "mq_enqueue: full ({}), drop", q.maxlen);
            drop(m);
            false
        }
    }

    /// 整条链表入队；剩余空间装不下整条时全部丢弃并按包数计入 drops。返回丢弃个数。
    pub fn enlist(&self, ml: &mut MbufList) -> usize {
        let mut q = self.inner.lock();
        if q.list.len() + ml.len() <= q.maxlen {
            q.list.enlist(ml);
            0
        } else {
            let dropped = ml.purge();
            q.drops += dropped as u64;
            dropped
        }
    }

    /// 发送失败的包插回队首；队满时丢弃。
    pub fn requeue(&self, m: Mbuf) -> bool {
        let mut q = self.inner.lock();
        if q.list.len() < q.maxlen {
            q.list.prepend(m);
            true
        } else {
            q.drops += 1;
            false
        }
    }

    pub fn dequeue(&self) -> Option<Mbuf> {
        self.inner.lock().list.dequeue()
    }

    /// 取走全部缓冲放入 `ml`（追加到 `ml` 尾部）。
    pub fn delist(&self, ml: &mut MbufList) {
        let mut q = self.inner.lock();
        ml.enlist(&mut q.list);
    }

    /// 取走全部缓冲。
    pub fn dechain(&self) -> MbufList {
        self.inner.lock().list.dechain()
    }

    /// 丢弃全部缓冲，返回丢弃个数（不计入 drops）。
    pub fn purge(&self) -> usize {
        let ml = self.dechain();
        let n = ml.len();
        drop(ml);
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().list.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let q = self.inner.lock();
        q.list.len() >= q.maxlen
    }

    pub fn drops(&self) -> u64 {
        self.inner.lock().drops
    }

    pub fn maxlen(&self) -> usize {
        self.inner.lock().maxlen
    }

    /// 调整上限；已在队列中的包保留。
    pub fn set_maxlen(&self, maxlen: usize) {
        self.inner.lock().maxlen = maxlen;
    }
}

impl Default for MbufQueue {
    fn default() -> Self {
        Self::new(IFQ_MAXLEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mb(tag: u8) -> Mbuf {
        Mbuf::from_slice(&[tag])
    }

    #[test]
    fn enqueue_beyond_maxlen_drops_and_counts() {
        let mq = MbufQueue::new(2);
        assert!(mq.enqueue(mb(1)));
        assert!(mq.enqueue(mb(2)));
        assert!(mq.is_full());
        assert!(!mq.enqueue(mb(3)));
        assert!(!mq.enqueue(mb(4)));
        assert_eq!(mq.len(), 2);
        assert_eq!(mq.drops(), 2);
        assert_eq!(mq.dequeue().unwrap()[0], 1);
        assert!(mq.enqueue(mb(5)));
        assert_eq!(mq.drops(), 2);
    }

    #[test]
    fn enlist_all_or_nothing() {
        let mq = MbufQueue::new(3);
        let mut ml = MbufList::new();
        ml.enqueue(mb(1));
        ml.enqueue(mb(2));
        assert_eq!(mq.enlist(&mut ml), 0);
        assert!(ml.is_empty());

        ml.enqueue(mb(3));
        ml.enqueue(mb(4));
        assert_eq!(mq.enlist(&mut ml), 2);
        assert!(ml.is_empty());
        assert_eq!(mq.len(), 2);
        assert_eq!(mq.drops(), 2);
    }

    #[test]
    fn delist_preserves_order() {
        let mq = MbufQueue::new(8);
        mq.enqueue(mb(1));
        mq.enqueue(mb(2));
        let mut ml = MbufList::new();
        ml.enqueue(mb(0));
        mq.delist(&mut ml);
        assert!(mq.is_empty());
        let tags: alloc::vec::Vec<u8> = ml.map(|m| m[0]).collect();
        assert_eq!(tags, [0, 1, 2]);
    }

    #[test]
    fn requeue_goes_first() {
        let mq = MbufQueue::new(4);
        mq.enqueue(mb(2));
        assert!(mq.requeue(mb(1)));
        assert_eq!(mq.dequeue().unwrap()[0], 1);
    }

    #[test]
    fn set_maxlen_and_purge() {
        let mq = MbufQueue::new(1);
        mq.enqueue(mb(1));
        assert!(!mq.enqueue(mb(2)));
        mq.set_maxlen(4);
        assert!(mq.enqueue(mb(2)));
        assert_eq!(mq.purge(), 2);
        assert!(mq.is_empty());
        assert_eq!(mq.drops(), 1);
    }
}
