//! IEEE 802.11 类型与常量
//!
//! 对应 Linux include/linux/ieee80211.h 中扫描缓存与 RX 路径用到的部分。

use bitflags::bitflags;

/// 频段（对应 NL80211_BAND_*）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Band {
    #[default]
    TwoGhz = 0,
    FiveGhz = 1,
}

impl Band {
    /// 由信道号推断频段：1..=14 为 2.4 GHz，其余为 5 GHz。
    pub const fn from_channel(channel: u16) -> Self {
        if channel < 15 {
            Band::TwoGhz
        } else {
            Band::FiveGhz
        }
    }
}

bitflags! {
    /// 信道属性（频段 + 带宽），对应 APPLE80211_C_FLAG_* / IEEE80211_CHAN_*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u32 {
        const MHZ_10 = 1 << 1;
        const MHZ_20 = 1 << 2;
        const MHZ_40 = 1 << 3;
        const GHZ_2 = 1 << 4;
        const GHZ_5 = 1 << 5;
        const MHZ_80 = 1 << 10;
    }
}

/// 扫描记录里的信道描述：信道号 + 频段/带宽标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelDesc {
    pub channel: u16,
    pub flags: ChannelFlags,
}

impl ChannelDesc {
    /// 仅由信道号构造，带宽默认 20 MHz。
    pub fn new(channel: u16) -> Self {
        Self::with_width(channel, ChannelFlags::MHZ_20)
    }

    /// `width` 只取带宽位（MHZ_20/40/80），频段位由信道号推出。
    pub fn with_width(channel: u16, width: ChannelFlags) -> Self {
        let band = match Band::from_channel(channel) {
            Band::TwoGhz => ChannelFlags::GHZ_2,
            Band::FiveGhz => ChannelFlags::GHZ_5,
        };
        let width = width & (ChannelFlags::MHZ_20 | ChannelFlags::MHZ_40 | ChannelFlags::MHZ_80);
        Self {
            channel,
            flags: band | width,
        }
    }

    pub fn band(&self) -> Band {
        Band::from_channel(self.channel)
    }

    /// 信道号变化时重算频段，保留原带宽。
    pub fn set_channel(&mut self, channel: u16) {
        *self = Self::with_width(channel, self.flags);
    }

    /// 中心频率 MHz（ieee80211_channel_to_frequency）
    pub fn center_freq(&self) -> u32 {
        let ch = self.channel as u32;
        match self.band() {
            Band::TwoGhz if ch == 14 => 2484,
            Band::TwoGhz => 2407 + ch * 5,
            Band::FiveGhz => 5000 + ch * 5,
        }
    }
}

/// 802.11 信息元素 ID（WLAN_EID_*）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WlanEid {
    Ssid = 0,
    SupportedRates = 1,
    DsParams = 3,
    Tim = 5,
    Country = 7,
    HtCapability = 45,
    ExtSuppRates = 50,
    HtOperation = 61,
    VhtCapability = 191,
    VhtOperation = 192,
    Vendor = 221,
    Extension = 255,
}

impl WlanEid {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// SSID 最大长度（IEEE80211_MAX_SSID_LEN）
pub const MAX_SSID_LEN: usize = 32;

/// 速率字节中的 basic 标志位
pub const RATE_BASIC: u8 = 0x80;

/// 管理帧头固定长度（fc/dur/addr1..3/seq = 24）+ beacon 固定字段（timestamp 8 + interval 2 + capab 2）
pub const MGMT_HDR_LEN: usize = 24;
pub const BEACON_FIXED_LEN: usize = 12;
/// 从管理帧头起算的 IE 起始偏移
pub const BEACON_IE_OFFSET: usize = MGMT_HDR_LEN + BEACON_FIXED_LEN;

/// 管理帧头内字段偏移
pub mod mgmt {
    pub const ADDR1: usize = 4;
    pub const ADDR2: usize = 10;
    /// BSSID（beacon/probe resp 的 addr3）
    pub const ADDR3: usize = 16;
    pub const SEQ_CTRL: usize = 22;
    pub const BEACON_TIMESTAMP: usize = 24;
    pub const BEACON_INTERVAL: usize = 32;
    pub const BEACON_CAPAB: usize = 34;
}

/// 帧类型（frame_control 子域，对应 ieee80211_is_*）
pub mod fc {
    pub const FTYPE: u16 = 0x000C;
    pub const STYPE: u16 = 0x00F0;
    pub const TYPE_MGMT: u16 = 0x0000;
    pub const TYPE_CTL: u16 = 0x0004;
    pub const TYPE_DATA: u16 = 0x0008;
    pub const SUBTYPE_PROBE_RESP: u16 = 0x0050;
    pub const SUBTYPE_BEACON: u16 = 0x0080;
}

/// 从帧取 frame_control（前 2 字节，little-endian）
#[inline]
pub fn frame_control(buf: &[u8]) -> u16 {
    if buf.len() >= 2 {
        u16::from_le_bytes([buf[0], buf[1]])
    } else {
        0
    }
}

#[inline]
pub fn is_mgmt(fc: u16) -> bool {
    (fc & fc::FTYPE) == fc::TYPE_MGMT
}

#[inline]
pub fn is_data(fc: u16) -> bool {
    (fc & fc::FTYPE) == fc::TYPE_DATA
}

#[inline]
pub fn is_beacon(fc: u16) -> bool {
    is_mgmt(fc) && (fc & fc::STYPE) == fc::SUBTYPE_BEACON
}

#[inline]
pub fn is_probe_resp(fc: u16) -> bool {
    is_mgmt(fc) && (fc & fc::STYPE) == fc::SUBTYPE_PROBE_RESP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_from_channel() {
        assert_eq!(Band::from_channel(1), Band::TwoGhz);
        assert_eq!(Band::from_channel(14), Band::TwoGhz);
        assert_eq!(Band::from_channel(36), Band::FiveGhz);
    }

    #[test]
    fn set_channel_keeps_width() {
        let mut c = ChannelDesc::with_width(6, ChannelFlags::MHZ_40);
        assert_eq!(c.flags, ChannelFlags::GHZ_2 | ChannelFlags::MHZ_40);
        c.set_channel(149);
        assert_eq!(c.flags, ChannelFlags::GHZ_5 | ChannelFlags::MHZ_40);
        assert_eq!(c.center_freq(), 5745);
    }

    #[test]
    fn frame_kinds() {
        assert!(is_beacon(0x0080));
        assert!(is_probe_resp(0x0050));
        assert!(!is_beacon(0x0088));
        assert!(is_data(0x0088));
        assert_eq!(frame_control(&[0x80]), 0);
    }
}
