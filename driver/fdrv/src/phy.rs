//! RX PHY 信息（iwl_rx_phy_info）
//!
//! 固件在每个 MPDU 通知前单独上报一次，op mode 暂存到下一个 MPDU 使用。
//! 全部字段 little-endian，共 68 字节。

pub const RX_PHY_INFO_LEN: usize = 68;

/// non_cfg_phy[1] 中三根天线的能量值
const ENERGY_A_MSK: u32 = 0x0000_00ff;
const ENERGY_B_MSK: u32 = 0x0000_ff00;
const ENERGY_B_POS: u32 = 8;
const ENERGY_C_MSK: u32 = 0x00ff_0000;
const ENERGY_C_POS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxPhyInfo {
    pub non_cfg_phy_cnt: u8,
    pub cfg_phy_cnt: u8,
    pub stat_id: u8,
    pub system_timestamp: u32,
    /// 固件 TSF 时间戳，扫描记录按它排序
    pub timestamp: u64,
    pub beacon_time_stamp: u32,
    pub phy_flags: u16,
    pub channel: u16,
    pub non_cfg_phy: [u32; 8],
    pub rate_n_flags: u32,
    pub byte_count: u32,
    pub mac_active_msk: u16,
    pub frame_time: u16,
}

fn le16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn le32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

impl RxPhyInfo {
    /// 长度不足时返回 None
    pub fn parse(b: &[u8]) -> Option<Self> {
        if b.len() < RX_PHY_INFO_LEN {
            return None;
        }
        let mut non_cfg_phy = [0u32; 8];
        for (i, w) in non_cfg_phy.iter_mut().enumerate() {
            *w = le32(b, 24 + i * 4);
        }
        Some(Self {
            non_cfg_phy_cnt: b[0],
            cfg_phy_cnt: b[1],
            stat_id: b[2],
            system_timestamp: le32(b, 4),
            timestamp: u64::from(le32(b, 8)) | (u64::from(le32(b, 12)) << 32),
            beacon_time_stamp: le32(b, 16),
            phy_flags: le16(b, 20),
            channel: le16(b, 22),
            non_cfg_phy,
            rate_n_flags: le32(b, 56),
            byte_count: le32(b, 60),
            mac_active_msk: le16(b, 64),
            frame_time: le16(b, 66),
        })
    }

    pub fn to_bytes(&self) -> [u8; RX_PHY_INFO_LEN] {
        let mut b = [0u8; RX_PHY_INFO_LEN];
        b[0] = self.non_cfg_phy_cnt;
        b[1] = self.cfg_phy_cnt;
        b[2] = self.stat_id;
        b[4..8].copy_from_slice(&self.system_timestamp.to_le_bytes());
        b[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        b[16..20].copy_from_slice(&self.beacon_time_stamp.to_le_bytes());
        b[20..22].copy_from_slice(&self.phy_flags.to_le_bytes());
        b[22..24].copy_from_slice(&self.channel.to_le_bytes());
        for (i, w) in self.non_cfg_phy.iter().enumerate() {
            b[24 + i * 4..28 + i * 4].copy_from_slice(&w.to_le_bytes());
        }
        b[56..60].copy_from_slice(&self.rate_n_flags.to_le_bytes());
        b[60..64].copy_from_slice(&self.byte_count.to_le_bytes());
        b[64..66].copy_from_slice(&self.mac_active_msk.to_le_bytes());
        b[66..68].copy_from_slice(&self.frame_time.to_le_bytes());
        b
    }

    /// 三根天线中最强的信号（dBm）。能量为 0 表示该天线未接收。
    pub fn rssi(&self) -> i32 {
        let val = self.non_cfg_phy[1];
        let energy = |e: u32| -> i32 {
            if e == 0 {
                i8::MIN as i32
            } else {
                -(e as i32)
            }
        };
        let a = energy(val & ENERGY_A_MSK);
        let b = energy((val & ENERGY_B_MSK) >> ENERGY_B_POS);
        let c = energy((val & ENERGY_C_MSK) >> ENERGY_C_POS);
        a.max(b).max(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fields_at_their_offsets() {
        let mut phy = RxPhyInfo {
            timestamp: 0x1122_3344_5566_7788,
            channel: 36,
            byte_count: 120,
            ..Default::default()
        };
        phy.non_cfg_phy[1] = 0x0030_2a40;
        let raw = phy.to_bytes();
        assert_eq!(&raw[22..24], &[36, 0]);
        assert_eq!(RxPhyInfo::parse(&raw), Some(phy));
        assert!(RxPhyInfo::parse(&raw[..67]).is_none());
    }

    #[test]
    fn rssi_picks_strongest_chain() {
        let mut phy = RxPhyInfo::default();
        // A=64, B=42, C 未接收
        phy.non_cfg_phy[1] = 0x0000_2a40;
        assert_eq!(phy.rssi(), -42);
        phy.non_cfg_phy[1] = 0;
        assert_eq!(phy.rssi(), -128);
    }
}
