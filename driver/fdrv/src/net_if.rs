//! 与主机网络接口的数据面交接
//!
//! RX：op mode 收下的数据帧先进有界队列，由 [`RxDeliver::if_input`] 成批交给 [`NetIf`]。
//! TX：上层帧先进 [`NetTx`] 的发送队列，[`NetTx::start`] 把它们送进传输层 TX 环，
//! 环满时剩余帧留在队列里等下一次 start。

use iwl_trans::{CmdError, Transport};
use mbuf::{Mbuf, MbufList, MbufQueue};
use spin::Mutex;

/// 主机网络接口（对应 if_input / netif_rx）
pub trait NetIf: Send + Sync {
    /// 交付一个 802.11 数据帧，所有权转移给接口
    fn input(&self, m: Mbuf);
}

/// 接口统计（对应 struct net_device_stats）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetIfStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

/// RX 交付；锁保证同一时刻只有一个上下文在向接口送包
pub struct RxDeliver {
    lock: Mutex<NetIfStats>,
}

impl RxDeliver {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(NetIfStats {
                rx_packets: 0,
                rx_bytes: 0,
                tx_packets: 0,
                tx_bytes: 0,
                tx_errors: 0,
                tx_dropped: 0,
            }),
        }
    }

    /// 把 `ml` 中的帧全部交给 `ifp`，返回交付个数
    pub fn if_input(&self, ifp: &dyn NetIf, ml: &mut MbufList) -> usize {
        let mut stats = self.lock.lock();
        let mut n = 0;
        while let Some(m) = ml.dequeue() {
            stats.rx_packets += 1;
            stats.rx_bytes += m.len() as u64;
            ifp.input(m);
            n += 1;
        }
        n
    }

    pub fn stats(&self) -> NetIfStats {
        self.lock.lock().clone()
    }
}

impl Default for RxDeliver {
    fn default() -> Self {
        Self::new()
    }
}

/// 上层发送队列
pub struct NetTx {
    sendq: MbufQueue,
    stats: Mutex<NetIfStats>,
}

impl NetTx {
    pub fn new(limit: usize) -> Self {
        Self {
            sendq: MbufQueue::new(limit),
            stats: Mutex::new(NetIfStats::default()),
        }
    }

    /// 入发送队列；队满时丢弃并返回 false
    pub fn enqueue(&self, m: Mbuf) -> bool {
        let ok = self.sendq.enqueue(m);
        if !ok {
            self.stats.lock().tx_dropped += 1;
        }
        ok
    }

    pub fn pending(&self) -> usize {
        self.sendq.len()
    }

    /// 尽量把队列中的帧送进 TX 环，返回送出的个数
    pub fn start(&self, trans: &Transport) -> usize {
        let mut sent = 0;
        while !trans.tx_stopped() {
            let Some(m) = self.sendq.dequeue() else {
                break;
            };
            let len = m.len() as u64;
            match trans.tx(m) {
                Ok(()) => {
                    let mut stats = self.stats.lock();
                    stats.tx_packets += 1;
                    stats.tx_bytes += len;
                    sent += 1;
                }
                Err((m, CmdError::QueueFull)) => {
                    self.sendq.requeue(m);
                    break;
                }
                Err((m, e)) => {
                    log::debug!(target: "iwlwifi::fdrv", "tx refused ({:?}), {} frames held", e, self.sendq.len() + 1);
                    self.stats.lock().tx_errors += 1;
                    self.sendq.requeue(m);
                    break;
                }
            }
        }
        sent
    }

    /// 丢弃全部待发送帧
    pub fn purge(&self) -> usize {
        let n = self.sendq.purge();
        self.stats.lock().tx_dropped += n as u64;
        n
    }

    pub fn stats(&self) -> NetIfStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use iwl_trans::sim::SimBench;
    use iwl_trans::TransConfig;

    #[derive(Default)]
    struct RecordingIf {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl NetIf for RecordingIf {
        fn input(&self, m: Mbuf) {
            self.frames.lock().push(m.data().to_vec());
        }
    }

    #[test]
    fn deliver_whole_list() {
        let ifp = RecordingIf::default();
        let rx = RxDeliver::new();
        let mut ml = MbufList::new();
        ml.enqueue(Mbuf::from_slice(&[1; 10]));
        ml.enqueue(Mbuf::from_slice(&[2; 20]));
        assert_eq!(rx.if_input(&ifp, &mut ml), 2);
        assert!(ml.is_empty());
        assert_eq!(ifp.frames.lock()[1], [2; 20]);
        let stats = rx.stats();
        assert_eq!((stats.rx_packets, stats.rx_bytes), (2, 30));
    }

    #[test]
    fn start_drains_into_tx_ring() {
        let bench = SimBench::new_running();
        let tx = NetTx::new(8);
        tx.enqueue(Mbuf::from_slice(&[0xaa; 32]));
        tx.enqueue(Mbuf::from_slice(&[0xbb; 32]));
        assert_eq!(tx.start(&bench.trans), 2);
        assert_eq!(tx.pending(), 0);
        bench.pump_all();
        assert_eq!(bench.nic.tx_frames().len(), 2);
        assert_eq!(tx.stats().tx_bytes, 64);
    }

    #[test]
    fn full_ring_keeps_frames_queued() {
        let config = TransConfig {
            tx_queue_size: 8,
            ..Default::default()
        };
        let bench = SimBench::with_device(0x24FD, config);
        bench.bring_up();
        bench.nic.silence_tx(true);
        let tx = NetTx::new(16);
        for i in 0..6 {
            tx.enqueue(Mbuf::from_slice(&[i; 8]));
        }
        // 在途 4 个时环停止
        assert_eq!(tx.start(&bench.trans), 4);
        assert_eq!(tx.pending(), 2);
        assert!(bench.trans.tx_stopped());
    }

    #[test]
    fn refused_frames_stay_queued() {
        let bench = SimBench::new();
        let tx = NetTx::new(2);
        tx.enqueue(Mbuf::from_slice(&[1; 8]));
        tx.enqueue(Mbuf::from_slice(&[2; 8]));
        assert!(!tx.enqueue(Mbuf::from_slice(&[3; 8])));
        assert_eq!(tx.start(&bench.trans), 0);
        assert_eq!(tx.pending(), 2);
        let stats = tx.stats();
        assert_eq!((stats.tx_errors, stats.tx_dropped), (1, 1));
        assert_eq!(tx.purge(), 2);
    }
}
