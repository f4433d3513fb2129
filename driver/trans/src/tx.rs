//! 数据 TX 环
//!
//! 帧写入 [`DATA_TXQ_ID`] 环后暂存在槽里，直到固件回 TX_CMD 应答（携带 ssn）才释放。
//! 在途帧接近环容量时通知 op mode 停止上层发送，回收到低水位后再放行。

use alloc::vec::Vec;

use mbuf::Mbuf;
use spin::Mutex;

use crate::cmd::{self, opcode, CmdFlags};
use crate::error::CmdError;
use crate::trans::{NicState, Transport};

/// 数据帧使用的 TX 队列号
pub const DATA_TXQ_ID: u8 = 10;
/// 距离满环剩余这么多槽时停队列
const TXQ_STOP_MARGIN: u16 = 4;

struct Ring {
    slots: Vec<Option<Mbuf>>,
    write: u16,
    read: u16,
    used: u16,
    stopped: bool,
}

/// 数据 TX 环状态
pub struct TxQueue {
    size: u16,
    ring: Mutex<Ring>,
}

impl TxQueue {
    pub fn new(size: u16) -> Self {
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || None);
        Self {
            size,
            ring: Mutex::new(Ring {
                slots,
                write: 0,
                read: 0,
                used: 0,
                stopped: false,
            }),
        }
    }

    pub fn capacity(&self) -> u16 {
        self.size
    }

    pub fn used(&self) -> u16 {
        self.ring.lock().used
    }

    pub fn is_stopped(&self) -> bool {
        self.ring.lock().stopped
    }

    fn high_mark(&self) -> u16 {
        self.size.saturating_sub(TXQ_STOP_MARGIN).max(1)
    }

    fn low_mark(&self) -> u16 {
        self.size / 2
    }

    /// 占槽并返回 (index, 是否刚触发停队列)
    fn push(&self, m: Mbuf) -> Result<(u16, bool), Mbuf> {
        let mut ring = self.ring.lock();
        if ring.used >= self.size {
            return Err(m);
        }
        let index = ring.write;
        ring.slots[index as usize] = Some(m);
        ring.write = (index + 1) & (self.size - 1);
        ring.used += 1;
        let stop = !ring.stopped && ring.used >= self.high_mark();
        if stop {
            ring.stopped = true;
        }
        Ok((index, stop))
    }

    fn frame(&self, index: u16) -> Option<Vec<u8>> {
        self.ring.lock().slots[index as usize]
            .as_ref()
            .map(|m| m.data().to_vec())
    }

    /// 释放 [read, ssn) 之间的帧；返回 (释放数, 是否重新放行)
    ///
    /// 满环时 `ssn` 回到 `read`，表示整环都已发送。
    fn reclaim(&self, ssn: u16) -> (usize, bool) {
        let mut ring = self.ring.lock();
        let mask = self.size - 1;
        let mut count = (ssn & mask).wrapping_sub(ring.read) & mask;
        if count == 0 && ring.used == self.size {
            count = self.size;
        }
        let count = count.min(ring.used);
        for _ in 0..count {
            let read = ring.read;
            ring.slots[read as usize] = None;
            ring.read = (read + 1) & mask;
        }
        ring.used -= count;
        let freed = count as usize;
        let wake = ring.stopped && ring.used <= self.low_mark();
        if wake {
            ring.stopped = false;
        }
        (freed, wake)
    }

    /// 丢弃全部在途帧
    pub fn purge(&self) -> usize {
        let mut ring = self.ring.lock();
        let dropped = ring.used as usize;
        for slot in ring.slots.iter_mut() {
            *slot = None;
        }
        ring.read = ring.write;
        ring.used = 0;
        ring.stopped = false;
        dropped
    }

    pub fn reset(&self) {
        self.purge();
        let mut ring = self.ring.lock();
        ring.write = 0;
        ring.read = 0;
    }
}

impl Transport {
    /// 发送一个数据帧（含 802.11 头）。失败时原样交还缓冲区。
    pub fn tx(&self, m: Mbuf) -> Result<(), (Mbuf, CmdError)> {
        match self.state() {
            NicState::Running => {}
            s if s.is_stopping() => return Err((m, CmdError::ShuttingDown)),
            NicState::KillPending => return Err((m, CmdError::HwRfKilled)),
            _ => return Err((m, CmdError::NotRunning)),
        }
        if self.recovery_pending() {
            return Err((m, CmdError::RecoveryPending));
        }
        let len = m.len();
        let (index, stop) = self.txq.push(m).map_err(|m| (m, CmdError::QueueFull))?;
        let seq = cmd::queue_to_seq(DATA_TXQ_ID) | cmd::index_to_seq(index);
        if let Some(payload) = self.txq.frame(index) {
            let frame = cmd::build_frame(opcode::TX_CMD, CmdFlags::ASYNC, seq, &payload);
            self.io().write_tx_slot(DATA_TXQ_ID, index, &frame);
        }
        log::trace!(target: "iwlwifi::trans", "tx: txq {} idx {} len {}", DATA_TXQ_ID, index, len);
        if stop {
            log::debug!(target: "iwlwifi::trans", "txq {} full, stopping", DATA_TXQ_ID);
            if let Some(op) = self.op_mode() {
                op.queue_full(DATA_TXQ_ID);
            }
        }
        Ok(())
    }

    /// TX_CMD 应答：`status u32, ssn u16`，释放 ssn 之前的帧
    pub(crate) fn tx_reclaim(&self, data: &[u8]) {
        if data.len() < 6 {
            log::warn!(target: "iwlwifi::trans", "short TX response ({} bytes)", data.len());
            return;
        }
        let status = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let ssn = u16::from_le_bytes([data[4], data[5]]);
        let (freed, wake) = self.txq.reclaim(ssn);
        log::trace!(target: "iwlwifi::trans", "tx reclaim: status 0x{:x} ssn {} freed {}", status, ssn, freed);
        if wake {
            log::debug!(target: "iwlwifi::trans", "txq {} has room, waking", DATA_TXQ_ID);
            if let Some(op) = self.op_mode() {
                op.queue_not_full(DATA_TXQ_ID);
            }
        }
    }

    pub fn tx_pending(&self) -> u16 {
        self.txq.used()
    }

    pub fn tx_stopped(&self) -> bool {
        self.txq.is_stopped()
    }
}
