//! 单元测试用的帧构造

use alloc::vec::Vec;

use iwl_trans::cmd::SEQ_RX_FRAME;
use iwl_trans::RxPacket;
use mbuf::Mbuf;

use crate::cmd_ids::{rx_res_status, REPLY_RX_MPDU_CMD};
use crate::phy::RxPhyInfo;

pub const BSSID_A: [u8; 6] = [0x00, 0x1b, 0x21, 0x0a, 0x0b, 0x0c];
pub const BSSID_B: [u8; 6] = [0x00, 0x1b, 0x21, 0x0d, 0x0e, 0x0f];
pub const CAPAB: u16 = 0x0431;
/// MPDU 通知里 802.11 帧之前的 `byte_count u16, reserved u16`
pub const WH_OFFSET: usize = 4;

/// beacon：固定字段后接 `ies`
pub fn beacon(bssid: &[u8; 6], ies: &[u8]) -> Vec<u8> {
    let mut f = Vec::new();
    f.extend_from_slice(&0x0080u16.to_le_bytes());
    f.extend_from_slice(&[0, 0]);
    f.extend_from_slice(&[0xff; 6]);
    f.extend_from_slice(bssid);
    f.extend_from_slice(bssid);
    f.extend_from_slice(&[0x10, 0x00]);
    f.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
    f.extend_from_slice(&100u16.to_le_bytes());
    f.extend_from_slice(&CAPAB.to_le_bytes());
    f.extend_from_slice(ies);
    f
}

/// 最小数据帧（FromDS）
pub fn data_frame(payload: &[u8]) -> Vec<u8> {
    let mut f = Vec::new();
    f.extend_from_slice(&0x0208u16.to_le_bytes());
    f.extend_from_slice(&[0; 22]);
    f.extend_from_slice(payload);
    f
}

pub fn mpdu_payload(frame: &[u8], status: u32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&(frame.len() as u16).to_le_bytes());
    p.extend_from_slice(&[0, 0]);
    p.extend_from_slice(frame);
    p.extend_from_slice(&status.to_le_bytes());
    p
}

pub fn good_status() -> u32 {
    rx_res_status::CRC_OK | rx_res_status::OVERRUN_OK
}

/// 只含一个 MPDU 通知的 RX 缓冲，包头在偏移 0
pub fn rx_mpdu(frame: &[u8]) -> Mbuf {
    Mbuf::from_slice(&RxPacket::encode(
        REPLY_RX_MPDU_CMD,
        SEQ_RX_FRAME,
        &mpdu_payload(frame, good_status()),
    ))
}

/// `energy` 填到 A 天线
pub fn phy(timestamp: u64, channel: u16, energy: u32) -> RxPhyInfo {
    let mut p = RxPhyInfo {
        timestamp,
        channel,
        ..Default::default()
    };
    p.non_cfg_phy[1] = energy & 0xff;
    p
}
