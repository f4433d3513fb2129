//! 中断分发
//!
//! 上半部 [`IrqFilter::filter`] 只屏蔽中断；下半部 [`Transport::irq_handler`] 读并应答
//! CSR_INT / CSR_FH_INT_STATUS，按位处理后重新打开中断。下半部严格串行：
//! 运行中再次被调度只置 pending 位，由正在运行的一轮收尾时重跑。

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use mbuf::Mbuf;

use crate::cmd::{opcode, Completion, CMD_QUEUE_ID};
use crate::io::IwlIo;
use crate::regs::*;
use crate::rx::{NicError, RxPacket, RX_PKT_HDR_LEN};
use crate::sync::WaitEvent;
use crate::trans::{NicState, TransStatus, Transport};
use crate::tx::DATA_TXQ_ID;

/// ALIVE 载荷中表示成功的状态字
pub const IWL_ALIVE_STATUS_OK: u16 = 0xCAFE;

/// 中断上半部句柄，可在硬中断上下文使用
#[derive(Clone)]
pub struct IrqFilter {
    io: Arc<dyn IwlIo>,
}

impl IrqFilter {
    /// 屏蔽全部中断，返回 true 表示需要调度下半部
    pub fn filter(&self) -> bool {
        self.io.write32(CSR_INT_MASK, 0);
        true
    }
}

impl Transport {
    pub fn irq_filter(&self) -> IrqFilter {
        IrqFilter { io: self.io_arc() }
    }

    /// 中断下半部入口
    pub fn irq_handler(&self) {
        self.irq_pending.store(true, Ordering::Release);
        loop {
            let Some(guard) = self.irq_lock.try_lock() else {
                // 正在运行的一轮会看到 pending 并重跑
                return;
            };
            while self.irq_pending.swap(false, Ordering::AcqRel) {
                self.handle_interrupts();
            }
            drop(guard);
            if !self.irq_pending.load(Ordering::Acquire) {
                return;
            }
        }
    }

    fn handle_interrupts(&self) {
        let inta = self.read32(CSR_INT);
        let fh = self.read32(CSR_FH_INT_STATUS);
        if inta == 0xffff_ffff || inta & 0xffff_fff0 == 0xa5a5_a5a0 {
            log::error!(target: "iwlwifi::trans::irq", "hardware gone (CSR_INT 0x{:08x})", inta);
            self.device().rx_sync_notify(self.platform());
            return;
        }
        if inta == 0 && fh == 0 {
            self.rearm_interrupts();
            self.device().rx_sync_notify(self.platform());
            return;
        }
        self.write32(CSR_INT, inta);
        self.write32(CSR_FH_INT_STATUS, fh);

        let mask = self.inta_mask.load(Ordering::Acquire);
        let ints = CsrInt::from_bits_truncate(inta & mask);
        log::trace!(target: "iwlwifi::trans::irq", "inta 0x{:08x} fh 0x{:08x} mask 0x{:08x}", inta, fh, mask);

        if ints.intersects(CsrInt::HW_ERR | CsrInt::SW_ERR) {
            let err = if ints.contains(CsrInt::HW_ERR) {
                NicError::HwError
            } else {
                NicError::SwError
            };
            log::error!(target: "iwlwifi::trans::irq", "{:?}, CSR_INT 0x{:08x}", err, inta);
            self.disable_interrupts();
            self.fw_error(err);
            self.cmd_queue.abort_sync(crate::error::CmdError::RecoveryPending);
            self.platform().notify(WaitEvent::CmdDone);
            self.device().rx_sync_notify(self.platform());
            return;
        }

        if ints.contains(CsrInt::CT_KILL) {
            log::error!(target: "iwlwifi::trans::irq", "critical temperature, radio disabled by firmware");
        }

        if ints.contains(CsrInt::RF_KILL) {
            self.irq_rfkill_handle();
        }

        if ints.contains(CsrInt::WAKEUP) {
            log::trace!(target: "iwlwifi::trans::irq", "wakeup");
        }

        if ints.contains(CsrInt::FH_TX) {
            self.set_status(TransStatus::UCODE_WRITE_COMPLETE);
            self.platform().notify(WaitEvent::UcodeWrite);
        }

        if ints.intersects(CsrInt::RX_ANY) {
            self.rx_handle();
        }

        self.rearm_interrupts();
        self.device().rx_sync_notify(self.platform());
    }

    /// 按当前状态恢复中断屏蔽字（上半部已清零）
    fn rearm_interrupts(&self) {
        let mask = self.inta_mask.load(Ordering::Acquire);
        if mask != 0 {
            self.write32(CSR_INT_MASK, mask);
        }
    }

    /// 取走硬件已关闭的 RB 逐个解析，最后归还给硬件
    fn rx_handle(&self) {
        if matches!(self.state(), NicState::Uninitialized | NicState::Stopped) {
            return;
        }
        let ring_mask = self.config().rx_queue_size - 1;
        let mut read = self.rx_read.lock();
        let closed = self.io().rx_closed_rb_num() & ring_mask;
        if *read == closed {
            return;
        }
        let mut handled = 0;
        while *read != closed {
            if let Some(rxb) = self.io().rx_take(*read) {
                self.rx_handle_rb(&rxb);
                handled += 1;
            } else {
                log::warn!(target: "iwlwifi::trans::irq", "rx: empty rb at {}", *read);
            }
            *read = (*read + 1) & ring_mask;
        }
        self.io().rx_restock(*read);
        log::trace!(target: "iwlwifi::trans::irq", "rx: {} rbs, read {}", handled, *read);
    }

    fn rx_handle_rb(&self, rxb: &Mbuf) {
        let buf = rxb.data();
        let mut offset = 0;
        while offset + RX_PKT_HDR_LEN <= buf.len() {
            let rest = &buf[offset..];
            if RxPacket::is_end_marker(rest) {
                break;
            }
            let Some(pkt) = RxPacket::parse(rest) else {
                log::warn!(target: "iwlwifi::trans::irq", "rx: malformed packet at offset {}", offset);
                break;
            };
            self.rx_dispatch(&pkt, rxb, offset);
            offset += pkt.stride();
        }
    }

    fn rx_dispatch(&self, pkt: &RxPacket<'_>, rxb: &Mbuf, offset: usize) {
        if pkt.opcode == opcode::UCODE_ALIVE_NTFY {
            self.rx_alive(pkt.data);
            return;
        }
        if !pkt.is_unsolicited() {
            match pkt.queue() {
                CMD_QUEUE_ID => {
                    match self.cmd_queue.complete(pkt.sequence, pkt.opcode, pkt.data) {
                        Completion::Sync => self.platform().notify(WaitEvent::CmdDone),
                        Completion::Async => {
                            if self.state() == NicState::StoppingGraceful {
                                self.platform().notify(WaitEvent::CmdDone);
                            }
                        }
                        Completion::Stale => {
                            log::debug!(target: "iwlwifi::trans::cmd", "late response 0x{:04x} seq 0x{:04x} dropped", pkt.opcode, pkt.sequence);
                        }
                        Completion::Unknown => {
                            log::warn!(target: "iwlwifi::trans::cmd", "response 0x{:04x} seq 0x{:04x} matches no command", pkt.opcode, pkt.sequence);
                        }
                    }
                    return;
                }
                DATA_TXQ_ID if pkt.opcode == opcode::TX_CMD => {
                    self.tx_reclaim(pkt.data);
                    return;
                }
                _ => {}
            }
        }
        if pkt.opcode == opcode::REPLY_ERROR {
            log::error!(target: "iwlwifi::trans::irq", "firmware REPLY_ERROR: {:02x?}", pkt.data);
            return;
        }
        match self.op_mode() {
            Some(op) => op.rx(self, pkt, rxb, offset),
            None => log::debug!(target: "iwlwifi::trans::irq", "rx 0x{:04x} without op mode", pkt.opcode),
        }
    }

    /// ALIVE：`status u16, flags u16, scd_base_addr u32`
    fn rx_alive(&self, data: &[u8]) {
        if data.len() < 8 {
            log::error!(target: "iwlwifi::trans::irq", "short ALIVE ({} bytes)", data.len());
            return;
        }
        let status = u16::from_le_bytes([data[0], data[1]]);
        let scd = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if status != IWL_ALIVE_STATUS_OK {
            log::error!(target: "iwlwifi::trans::irq", "ALIVE status 0x{:04x}", status);
            self.fw_error(NicError::BadAlive { status });
            self.platform().notify(WaitEvent::FwAlive);
            return;
        }
        self.fw_alive(scd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::{index_to_seq, queue_to_seq};
    use crate::sim::{self, SimBench};

    #[test]
    fn filter_only_masks() {
        let bench = SimBench::new_running();
        let filter = bench.trans.irq_filter();
        assert_ne!(bench.nic.reg(CSR_INT_MASK), 0);
        assert!(filter.filter());
        assert_eq!(bench.nic.reg(CSR_INT_MASK), 0);
        bench.trans.irq_handler();
        assert_eq!(bench.nic.reg(CSR_INT_MASK), CsrInt::INI_SET_MASK.bits());
    }

    #[test]
    fn handler_advances_rx_sync() {
        let bench = SimBench::new_running();
        let before = bench.trans.device().rx_sync_seq();
        bench.trans.irq_handler();
        assert_ne!(bench.trans.device().rx_sync_seq(), before);
    }

    #[test]
    fn late_response_is_discarded() {
        let bench = SimBench::new_running();
        let seq = queue_to_seq(CMD_QUEUE_ID) | index_to_seq(5);
        bench.nic.inject_rx(&RxPacket::encode(0x88, seq, &[0; 4]));
        bench.nic.raise(CsrInt::FH_RX);
        bench.trans.irq_handler();
        assert_eq!(bench.trans.state(), NicState::Running);
        assert_eq!(bench.trans.cmd_queue.in_flight(), 0);
    }

    #[test]
    fn hw_error_escalates_without_rearm() {
        let bench = SimBench::new_running();
        bench.nic.raise(CsrInt::HW_ERR);
        bench.trans.irq_handler();
        assert!(bench.trans.recovery_pending());
        assert_eq!(bench.nic.reg(CSR_INT_MASK), 0);
        assert_eq!(bench.op_mode.nic_errors(), 1);
    }

    #[test]
    fn unsolicited_packets_reach_op_mode() {
        let bench = SimBench::new_running();
        bench.nic.inject_rx(&RxPacket::encode(0xc0, crate::cmd::SEQ_RX_FRAME, &[1, 2]));
        bench.nic.inject_rx(&RxPacket::encode(0xc1, crate::cmd::SEQ_RX_FRAME, &[3]));
        bench.nic.raise(CsrInt::FH_RX);
        bench.trans.irq_handler();
        assert_eq!(bench.op_mode.rx_opcodes(), alloc::vec![0xc0, 0xc1]);
    }

    #[test]
    fn multiple_packets_in_one_rb() {
        let bench = SimBench::new_running();
        let mut rb = sim::pad_packet(RxPacket::encode(0xc0, crate::cmd::SEQ_RX_FRAME, &[7; 10]));
        rb.extend_from_slice(&RxPacket::encode(0xc1, crate::cmd::SEQ_RX_FRAME, &[8; 3]));
        bench.nic.inject_rb(&rb);
        bench.nic.raise(CsrInt::FH_RX);
        bench.trans.irq_handler();
        assert_eq!(bench.op_mode.rx_opcodes(), alloc::vec![0xc0, 0xc1]);
    }

    #[test]
    fn coalesced_pass_runs_once_more() {
        let bench = SimBench::new_running();
        let guard = bench.trans.irq_lock.lock();
        bench.trans.irq_handler();
        assert!(bench.trans.irq_pending.load(Ordering::Acquire));
        drop(guard);
        let before = bench.trans.device().rx_sync_seq();
        bench.trans.irq_handler();
        assert!(!bench.trans.irq_pending.load(Ordering::Acquire));
        assert_ne!(bench.trans.device().rx_sync_seq(), before);
    }
}
