//! 命令队列
//!
//! 主机命令帧：`[opcode u16][flags u16][sequence u16][len u16][payload]`，全部小端。
//! sequence = `(queue << 8) | index`，固件应答原样带回，RX 路径据此 O(1) 定位槽位。
//! 固件主动上报的通知带 `SEQ_RX_FRAME` 位。
//!
//! 槽位状态：Free → Pending → Done/Aborted → Free。同步命令同一时刻最多一条；
//! 超时的槽位标记为 Stale，迟到的应答到达时静默回收。

use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::error::CmdError;

/// 命令帧头长度
pub const CMD_HDR_LEN: usize = 8;
/// 固件主动上报（非应答）标志
pub const SEQ_RX_FRAME: u16 = 0x8000;
/// 命令队列在 sequence 中的编号
pub const CMD_QUEUE_ID: u8 = 0;

#[inline]
pub const fn queue_to_seq(queue: u8) -> u16 {
    ((queue & 0x1f) as u16) << 8
}

#[inline]
pub const fn index_to_seq(index: u16) -> u16 {
    index & 0xff
}

#[inline]
pub const fn seq_to_queue(seq: u16) -> u8 {
    ((seq >> 8) & 0x1f) as u8
}

#[inline]
pub const fn seq_to_index(seq: u16) -> u16 {
    seq & 0xff
}

/// 传输层自身使用的命令/通知 ID（组号在高 8 位）
pub mod opcode {
    pub const UCODE_ALIVE_NTFY: u16 = 0x01;
    pub const REPLY_ERROR: u16 = 0x02;
    pub const ECHO_CMD: u16 = 0x03;
    pub const TX_CMD: u16 = 0x1c;
    /// SYSTEM_GROUP(0x2) / ERROR_RECOVERY_CMD(0x7)
    pub const ERROR_RECOVERY_CMD: u16 = 0x0207;
    /// 固件下载块，仅在 FirmwareLoading 阶段使用
    pub const FW_CHUNK_CMD: u16 = 0xff01;
}

bitflags! {
    /// 命令标志，同时作为帧头 flags 字段下发
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CmdFlags: u16 {
        /// 放上命令环即返回
        const ASYNC = 1 << 0;
        /// 固件需要回完整应答载荷
        const WANT_RESP = 1 << 1;
        /// RF-kill 期间也允许发送
        const SEND_IN_RFKILL = 1 << 3;
    }
}

/// 命令帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdHeader {
    pub opcode: u16,
    pub flags: u16,
    pub sequence: u16,
    pub len: u16,
}

impl CmdHeader {
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.opcode.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.to_le_bytes());
        buf[4..6].copy_from_slice(&self.sequence.to_le_bytes());
        buf[6..8].copy_from_slice(&self.len.to_le_bytes());
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < CMD_HDR_LEN {
            return None;
        }
        let rd = |o: usize| u16::from_le_bytes([buf[o], buf[o + 1]]);
        Some(Self {
            opcode: rd(0),
            flags: rd(2),
            sequence: rd(4),
            len: rd(6),
        })
    }
}

/// 序列化命令帧：头 + 载荷
pub fn build_frame(opcode: u16, flags: CmdFlags, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = alloc::vec![0u8; CMD_HDR_LEN + payload.len()];
    CmdHeader {
        opcode,
        flags: flags.bits(),
        sequence,
        len: payload.len() as u16,
    }
    .write_to(&mut frame);
    frame[CMD_HDR_LEN..].copy_from_slice(payload);
    frame
}

/// 一条主机命令；载荷在提交完成前由调用方持有
#[derive(Debug, Clone, Copy)]
pub struct HostCmd<'a> {
    pub opcode: u16,
    pub flags: CmdFlags,
    pub data: &'a [u8],
}

impl<'a> HostCmd<'a> {
    pub fn sync(opcode: u16, data: &'a [u8]) -> Self {
        Self {
            opcode,
            flags: CmdFlags::empty(),
            data,
        }
    }

    pub fn async_(opcode: u16, data: &'a [u8]) -> Self {
        Self {
            opcode,
            flags: CmdFlags::ASYNC,
            data,
        }
    }

    pub fn is_sync(&self) -> bool {
        !self.flags.contains(CmdFlags::ASYNC)
    }
}

/// 同步命令的应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdResponse {
    pub opcode: u16,
    pub sequence: u16,
    pub data: Vec<u8>,
}

impl CmdResponse {
    /// 多数应答以 `status u32` 开头
    pub fn status(&self) -> Option<u32> {
        let b = self.data.get(0..4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[derive(Debug)]
enum Slot {
    Free,
    Pending { opcode: u16, sync: bool },
    Done(CmdResponse),
    Aborted(CmdError),
    Stale,
    FwChunk,
}

/// 等待方持有的槽位凭据；环复位后 generation 变化，旧凭据失效
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotToken {
    pub index: u16,
    generation: u32,
}

/// RX 路径匹配应答的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// 同步等待方已可取走应答
    Sync,
    /// 异步命令完成，槽位已回收
    Async,
    /// 超时后迟到的应答，槽位已回收
    Stale,
    /// 没有对应的在途命令
    Unknown,
}

struct Ring {
    slots: Vec<Slot>,
    write_ptr: u16,
    used: u16,
    sync_index: Option<u16>,
    generation: u32,
    /// abort_all 之后置位，直到下一次 reset
    closed: bool,
}

impl Ring {
    fn free(&mut self, index: u16) {
        self.slots[index as usize] = Slot::Free;
        self.used -= 1;
        if self.sync_index == Some(index) {
            self.sync_index = None;
        }
    }
}

/// 命令环槽位表
pub struct CmdQueue {
    queue_id: u8,
    size: u16,
    ring: Mutex<Ring>,
}

impl CmdQueue {
    /// `size` 必须是 2 的幂且不超过 256
    pub fn new(queue_id: u8, size: u16) -> Self {
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || Slot::Free);
        Self {
            queue_id,
            size,
            ring: Mutex::new(Ring {
                slots,
                write_ptr: 0,
                used: 0,
                sync_index: None,
                generation: 0,
                closed: false,
            }),
        }
    }

    pub fn queue_id(&self) -> u8 {
        self.queue_id
    }

    pub fn capacity(&self) -> u16 {
        self.size
    }

    /// 占用中的槽位数（含等待取走的应答与超时待回收的槽）
    pub fn in_flight(&self) -> u16 {
        self.ring.lock().used
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().used >= self.size
    }

    pub fn sync_active(&self) -> bool {
        self.ring.lock().sync_index.is_some()
    }

    pub fn sequence(&self, token: SlotToken) -> u16 {
        queue_to_seq(self.queue_id) | index_to_seq(token.index)
    }

    fn alloc(&self, ring: &mut Ring, slot: Slot) -> Result<SlotToken, CmdError> {
        if ring.closed {
            return Err(CmdError::ShuttingDown);
        }
        if ring.used >= self.size {
            return Err(CmdError::QueueFull);
        }
        let mask = self.size - 1;
        for k in 0..self.size {
            let index = (ring.write_ptr + k) & mask;
            if matches!(ring.slots[index as usize], Slot::Free) {
                ring.slots[index as usize] = slot;
                ring.write_ptr = (index + 1) & mask;
                ring.used += 1;
                return Ok(SlotToken {
                    index,
                    generation: ring.generation,
                });
            }
        }
        Err(CmdError::QueueFull)
    }

    /// 为一条命令占槽。同步命令在途时再提交同步命令返回 `SyncBusy`，环满返回 `QueueFull`，
    /// 环已关闭返回 `ShuttingDown`。
    pub fn reserve(&self, opcode: u16, sync: bool) -> Result<SlotToken, CmdError> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return Err(CmdError::ShuttingDown);
        }
        if sync && ring.sync_index.is_some() {
            return Err(CmdError::SyncBusy);
        }
        let token = self.alloc(&mut ring, Slot::Pending { opcode, sync })?;
        if sync {
            ring.sync_index = Some(token.index);
        }
        Ok(token)
    }

    /// 为一块固件占槽；写完成由 FH_TX 中断通知，不走应答匹配
    pub fn reserve_chunk(&self) -> Result<SlotToken, CmdError> {
        let mut ring = self.ring.lock();
        self.alloc(&mut ring, Slot::FwChunk)
    }

    /// 释放一个未产生应答的槽（固件块完成、提交失败）
    pub fn release(&self, token: SlotToken) {
        let mut ring = self.ring.lock();
        if ring.generation == token.generation
            && !matches!(ring.slots[token.index as usize], Slot::Free)
        {
            ring.free(token.index);
        }
    }

    /// RX 路径：按 sequence 中的 index 匹配应答
    pub fn complete(&self, sequence: u16, opcode: u16, data: &[u8]) -> Completion {
        let index = seq_to_index(sequence);
        if seq_to_queue(sequence) != self.queue_id || index >= self.size {
            return Completion::Unknown;
        }
        let mut ring = self.ring.lock();
        match ring.slots[index as usize] {
            Slot::Pending { sync: true, opcode: want } => {
                if want != opcode {
                    log::warn!(
                        target: "iwlwifi::trans::cmd",
                        "response opcode 0x{:04x} for slot {} waiting on 0x{:04x}",
                        opcode, index, want
                    );
                }
                ring.slots[index as usize] = Slot::Done(CmdResponse {
                    opcode,
                    sequence,
                    data: data.to_vec(),
                });
                Completion::Sync
            }
            Slot::Pending { sync: false, .. } => {
                ring.free(index);
                Completion::Async
            }
            Slot::Stale => {
                ring.free(index);
                Completion::Stale
            }
            _ => Completion::Unknown,
        }
    }

    /// 同步等待方轮询：应答到达返回 `Some(Ok)`，被中止返回 `Some(Err)`，仍在途返回 None。
    /// 槽位在返回 `Some` 时释放。
    pub fn poll(&self, token: SlotToken) -> Option<Result<CmdResponse, CmdError>> {
        let mut ring = self.ring.lock();
        if ring.generation != token.generation {
            return Some(Err(CmdError::ShuttingDown));
        }
        let slot = &mut ring.slots[token.index as usize];
        match *slot {
            Slot::Pending { .. } => None,
            Slot::Done(_) | Slot::Aborted(_) => {
                let res = match core::mem::replace(slot, Slot::Free) {
                    Slot::Done(resp) => Ok(resp),
                    Slot::Aborted(e) => Err(e),
                    _ => unreachable!(),
                };
                ring.used -= 1;
                if ring.sync_index == Some(token.index) {
                    ring.sync_index = None;
                }
                Some(res)
            }
            _ => Some(Err(CmdError::ShuttingDown)),
        }
    }

    /// 同步等待超时：仍在途则标记 Stale 并返回 None；应答恰好在超时边界到达则照常返回。
    pub fn abandon(&self, token: SlotToken) -> Option<Result<CmdResponse, CmdError>> {
        {
            let mut ring = self.ring.lock();
            if ring.generation == token.generation
                && matches!(ring.slots[token.index as usize], Slot::Pending { .. })
            {
                ring.slots[token.index as usize] = Slot::Stale;
                if ring.sync_index == Some(token.index) {
                    ring.sync_index = None;
                }
                return None;
            }
        }
        self.poll(token)
    }

    /// 中止在途的同步命令，等待方返回 `reason`
    pub fn abort_sync(&self, reason: CmdError) -> bool {
        let mut ring = self.ring.lock();
        let Some(index) = ring.sync_index else {
            return false;
        };
        if matches!(ring.slots[index as usize], Slot::Pending { sync: true, .. }) {
            ring.slots[index as usize] = Slot::Aborted(reason);
            true
        } else {
            false
        }
    }

    /// 停止设备时调用：同步等待方被中止，其余在途槽直接回收（设备不会再应答）。
    /// 之后环保持关闭，[`reset`](Self::reset) 之前不再占槽。
    pub fn abort_all(&self, reason: CmdError) {
        let mut ring = self.ring.lock();
        ring.closed = true;
        for index in 0..self.size {
            match ring.slots[index as usize] {
                Slot::Pending { sync: true, .. } => {
                    ring.slots[index as usize] = Slot::Aborted(reason);
                }
                Slot::Pending { sync: false, .. } | Slot::Stale | Slot::FwChunk => {
                    ring.free(index);
                }
                _ => {}
            }
        }
    }

    /// 环复位：全部槽位清空，旧凭据失效
    pub fn reset(&self) {
        let mut ring = self.ring.lock();
        for slot in ring.slots.iter_mut() {
            *slot = Slot::Free;
        }
        ring.write_ptr = 0;
        ring.used = 0;
        ring.sync_index = None;
        ring.generation = ring.generation.wrapping_add(1);
        ring.closed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let frame = build_frame(0x0207, CmdFlags::ASYNC, 0x0005, &[0xaa, 0xbb]);
        assert_eq!(frame, [0x07, 0x02, 0x01, 0x00, 0x05, 0x00, 0x02, 0x00, 0xaa, 0xbb]);
        let hdr = CmdHeader::parse(&frame).unwrap();
        assert_eq!(hdr.opcode, 0x0207);
        assert_eq!(hdr.len, 2);
    }

    #[test]
    fn sequence_fields() {
        let seq = queue_to_seq(3) | index_to_seq(17);
        assert_eq!(seq_to_queue(seq), 3);
        assert_eq!(seq_to_index(seq), 17);
        assert_eq!(seq & SEQ_RX_FRAME, 0);
    }

    #[test]
    fn full_ring_rejects_then_recovers() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 4);
        let tokens: Vec<SlotToken> = (0..4).map(|_| q.reserve(0x10, false).unwrap()).collect();
        assert_eq!(q.reserve(0x10, false), Err(CmdError::QueueFull));
        assert_eq!(q.reserve(0x10, true), Err(CmdError::QueueFull));

        let seq = q.sequence(tokens[2]);
        assert_eq!(q.complete(seq, 0x10, &[]), Completion::Async);
        assert_eq!(q.in_flight(), 3);
        let t = q.reserve(0x11, false).unwrap();
        assert_eq!(t.index, 2);
    }

    #[test]
    fn only_one_sync_in_flight() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 8);
        let t = q.reserve(0x20, true).unwrap();
        assert_eq!(q.reserve(0x21, true), Err(CmdError::SyncBusy));
        assert!(q.reserve(0x22, false).is_ok());

        assert_eq!(q.poll(t), None);
        assert_eq!(q.complete(q.sequence(t), 0x20, &[1, 0, 0, 0]), Completion::Sync);
        let resp = q.poll(t).unwrap().unwrap();
        assert_eq!(resp.status(), Some(1));
        assert!(!q.sync_active());
        assert!(q.reserve(0x23, true).is_ok());
    }

    #[test]
    fn late_response_after_timeout_is_discarded() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 8);
        let t = q.reserve(0x30, true).unwrap();
        assert_eq!(q.abandon(t), None);
        assert!(!q.sync_active());
        assert_eq!(q.in_flight(), 1);
        assert_eq!(q.complete(q.sequence(t), 0x30, &[]), Completion::Stale);
        assert_eq!(q.in_flight(), 0);
        assert_eq!(q.complete(q.sequence(t), 0x30, &[]), Completion::Unknown);
    }

    #[test]
    fn abort_wakes_sync_waiter_with_reason() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 8);
        let t = q.reserve(0x40, true).unwrap();
        q.reserve(0x41, false).unwrap();
        q.abort_all(CmdError::ShuttingDown);
        assert_eq!(q.in_flight(), 1);
        assert_eq!(q.poll(t), Some(Err(CmdError::ShuttingDown)));
        assert_eq!(q.in_flight(), 0);
    }

    #[test]
    fn aborted_ring_stays_closed_until_reset() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 8);
        q.abort_all(CmdError::ShuttingDown);
        assert_eq!(q.reserve(0x42, false), Err(CmdError::ShuttingDown));
        assert_eq!(q.reserve(0x43, true), Err(CmdError::ShuttingDown));
        assert_eq!(q.reserve_chunk(), Err(CmdError::ShuttingDown));
        assert_eq!(q.in_flight(), 0);
        assert!(!q.sync_active());

        q.reset();
        let t = q.reserve(0x44, true).unwrap();
        assert_eq!(q.poll(t), None);
    }

    #[test]
    fn reset_invalidates_tokens() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 8);
        let t = q.reserve(0x50, true).unwrap();
        q.reset();
        let t2 = q.reserve(0x51, true).unwrap();
        assert_eq!(t2.index, t.index);
        assert_eq!(q.poll(t), Some(Err(CmdError::ShuttingDown)));
        assert_eq!(q.poll(t2), None);
    }

    #[test]
    fn foreign_queue_or_index_is_unknown() {
        let q = CmdQueue::new(CMD_QUEUE_ID, 8);
        q.reserve(0x60, false).unwrap();
        assert_eq!(q.complete(queue_to_seq(4), 0x60, &[]), Completion::Unknown);
        assert_eq!(q.complete(200, 0x60, &[]), Completion::Unknown);
    }
}
