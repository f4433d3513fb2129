//! RX 包格式与 op mode 接口
//!
//! 一个 RB 内可顺序放多个包：`[len_n_flags u32][opcode u16][sequence u16][data]`，
//! 每个包按 64 字节对齐。`len_n_flags` 低 14 位为包总长（含 8 字节头）。

use alloc::vec::Vec;

use mbuf::Mbuf;

use crate::cmd::{seq_to_index, seq_to_queue, SEQ_RX_FRAME};
use crate::trans::Transport;

pub const RX_PKT_HDR_LEN: usize = 8;
pub const FH_RSCSR_FRAME_SIZE_MSK: u32 = 0x0000_3fff;
/// RB 内剩余空间的填充标记
pub const FH_RSCSR_FRAME_INVALID: u32 = 0x5555_0000;
pub const FH_RSCSR_FRAME_ALIGN: usize = 0x40;

/// 从 RB 中解析出的一个包（借用 RB）
#[derive(Debug, Clone, Copy)]
pub struct RxPacket<'a> {
    pub len_n_flags: u32,
    pub opcode: u16,
    pub sequence: u16,
    pub data: &'a [u8],
}

impl<'a> RxPacket<'a> {
    /// 头不完整、长度小于头或超出缓冲时返回 None
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < RX_PKT_HDR_LEN {
            return None;
        }
        let len_n_flags = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = (len_n_flags & FH_RSCSR_FRAME_SIZE_MSK) as usize;
        if len < RX_PKT_HDR_LEN || len > buf.len() {
            return None;
        }
        Some(Self {
            len_n_flags,
            opcode: u16::from_le_bytes([buf[4], buf[5]]),
            sequence: u16::from_le_bytes([buf[6], buf[7]]),
            data: &buf[RX_PKT_HDR_LEN..len],
        })
    }

    /// RB 中该位置没有更多包
    pub fn is_end_marker(buf: &[u8]) -> bool {
        match buf.get(0..4) {
            Some(b) => {
                let w = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                w == 0 || w == FH_RSCSR_FRAME_INVALID
            }
            None => true,
        }
    }

    pub fn frame_len(&self) -> usize {
        (self.len_n_flags & FH_RSCSR_FRAME_SIZE_MSK) as usize
    }

    /// 到下一个包的步长
    pub fn stride(&self) -> usize {
        (self.frame_len() + FH_RSCSR_FRAME_ALIGN - 1) & !(FH_RSCSR_FRAME_ALIGN - 1)
    }

    /// 固件主动上报（非命令应答）
    pub fn is_unsolicited(&self) -> bool {
        self.sequence & SEQ_RX_FRAME != 0
    }

    pub fn queue(&self) -> u8 {
        seq_to_queue(self.sequence)
    }

    pub fn index(&self) -> u16 {
        seq_to_index(self.sequence)
    }

    /// 构造一个包（测试与模拟固件使用）
    pub fn encode(opcode: u16, sequence: u16, data: &[u8]) -> Vec<u8> {
        let len = (RX_PKT_HDR_LEN + data.len()) as u32;
        let mut out = Vec::with_capacity(len as usize);
        out.extend_from_slice(&(len & FH_RSCSR_FRAME_SIZE_MSK).to_le_bytes());
        out.extend_from_slice(&opcode.to_le_bytes());
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(data);
        out
    }
}

/// 需要上层做设备恢复的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicError {
    /// CSR_INT HW_ERR
    HwError,
    /// CSR_INT SW_ERR（固件断言）
    SwError,
    /// 同步命令无应答
    CmdTimeout { opcode: u16 },
    /// ALIVE 状态字非法
    BadAlive { status: u16 },
    /// 短时间内大量 RX 帧解析失败
    ParseErrorBurst,
}

/// op mode：消费 RX 通知并决定恢复策略（iwl_op_mode_ops）
///
/// 所有回调都在中断下半部上下文执行，不得阻塞等待命令应答。
pub trait OpMode: Send + Sync {
    /// 非命令应答的 RX 包。`offset` 为包头在 `rxb` 中的偏移。
    fn rx(&self, trans: &Transport, pkt: &RxPacket<'_>, rxb: &Mbuf, offset: usize);

    /// 固件或硬件出错，需完整重启
    fn nic_error(&self, trans: &Transport, err: NicError);

    /// RF-kill 状态变化；返回 true 表示 op mode 要求停止设备
    fn hw_rf_kill(&self, trans: &Transport, killed: bool) -> bool;

    fn queue_full(&self, _txq_id: u8) {}

    fn queue_not_full(&self, _txq_id: u8) {}
}
