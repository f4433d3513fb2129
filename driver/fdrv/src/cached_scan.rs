//! 扫描记录
//!
//! 每条记录对应一个 beacon / probe response。记录持有 RX 缓冲的一份副本，
//! 帧头与 IE 区都以偏移引用该副本；SSID 不单独保存，每次从 IE 区取。
//!
//! RX 包内布局（`offset` 指向包头）：
//!
//! ```text
//! [len_n_flags u32][opcode u16][seq u16] | [byte_count u16][rsvd u16] ... [802.11 hdr 24][ts 8][int 2][capab 2][IEs]
//!                                        ^ 包数据                         ^ wh = 包数据 + wh_offset
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

use axerrno::AxError;
use ieee80211::ieee80211::{mgmt, BEACON_IE_OFFSET, MAX_SSID_LEN, RATE_BASIC};
use ieee80211::{ChannelDesc, ChannelFlags, IeError, IeIter, WlanEid};
use iwl_trans::rx::RX_PKT_HDR_LEN;
use mbuf::Mbuf;

use crate::phy::RxPhyInfo;

/// HT operation 第二字节中的 secondary channel offset 存在位
const HT_OP_SECONDARY_CHAN: u8 = 0x04;

/// 帧不能生成扫描记录的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// 帧头或声明的 IE 区超出缓冲
    Truncated,
    /// 固件给出的字节数不大于固定头长度
    NoInformationElements,
    /// IE 区不以 SSID 元素开头
    NonConformant { tag: u8 },
    /// IE 区内 `offset` 处的元素长度越界
    MalformedElement { offset: usize },
}

impl ParseError {
    pub const fn errno(self) -> i32 {
        const EINVAL: i32 = 22;
        const ENODATA: i32 = 61;
        const EBADMSG: i32 = 74;
        -(match self {
            ParseError::Truncated => EINVAL,
            ParseError::NoInformationElements => ENODATA,
            ParseError::NonConformant { .. } | ParseError::MalformedElement { .. } => EBADMSG,
        })
    }
}

impl From<ParseError> for AxError {
    fn from(_: ParseError) -> Self {
        AxError::InvalidData
    }
}

/// 一条扫描记录
pub struct CachedScan {
    buf: Mbuf,
    /// 802.11 帧头在 `buf` 中的偏移
    wh: usize,
    /// IE 区在 `buf` 中的偏移
    ie: usize,
    ie_len: usize,
    phy_info: RxPhyInfo,
    /// 主机单调时钟（ms）
    sys_timestamp: u64,
    channel: ChannelDesc,
    rssi: i32,
    noise: i32,
    rates: Vec<u8>,
    basic_rates: Vec<u8>,
    ext_rates: Vec<u8>,
    /// 单位 100 kbps
    hw_rates: Vec<u16>,
    ht_supported: bool,
    vht_supported: bool,
}

fn le16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn malformed(e: IeError) -> ParseError {
    match e {
        IeError::Truncated { offset } => ParseError::MalformedElement { offset },
    }
}

/// 按固件字节数定位 IE 区，返回 `(wh, ie, ie_len)`；要求 IE 区在缓冲内且以 SSID 开头
fn locate_ies(data: &[u8], offset: usize, wh_offset: usize) -> Result<(usize, usize, usize), ParseError> {
    let pkt_data = offset + RX_PKT_HDR_LEN;
    if pkt_data + 2 > data.len() {
        return Err(ParseError::Truncated);
    }
    let byte_count = le16(data, pkt_data) as usize;
    if byte_count <= BEACON_IE_OFFSET {
        return Err(ParseError::NoInformationElements);
    }
    let ie_len = byte_count - BEACON_IE_OFFSET;
    let wh = pkt_data + wh_offset;
    let ie = wh + BEACON_IE_OFFSET;
    if ie + ie_len > data.len() {
        log::debug!(target: "iwlwifi::fdrv::scan", "ie region {}+{} beyond buffer {}", ie, ie_len, data.len());
        return Err(ParseError::Truncated);
    }
    let lead = data[ie];
    if lead != WlanEid::Ssid.as_u8() {
        log::warn!(target: "iwlwifi::fdrv::scan", "non-conformant frame, leading tag 0x{:02x}", lead);
        return Err(ParseError::NonConformant { tag: lead });
    }
    Ok((wh, ie, ie_len))
}

/// 只做与 [`CachedScan::ingest`] 相同的检查，不复制缓冲
pub fn check_frame(rxb: &Mbuf, offset: usize, wh_offset: usize) -> Result<(), ParseError> {
    let data = rxb.data();
    let (_, ie, ie_len) = locate_ies(data, offset, wh_offset)?;
    IeIter::validate(&data[ie..ie + ie_len]).map_err(malformed)?;
    Ok(())
}

impl CachedScan {
    /// 从 RX 缓冲 `rxb` 中 `offset` 处的 MPDU 通知生成记录。`rxb` 本身不被保留。
    pub fn ingest(
        rxb: &Mbuf,
        offset: usize,
        wh_offset: usize,
        phy_info: &RxPhyInfo,
        rssi: i32,
        noise: i32,
        now_ms: u64,
    ) -> Result<Self, ParseError> {
        let buf = rxb.dup();
        let data = buf.data();

        let (wh, ie, ie_len) = locate_ies(data, offset, wh_offset)?;
        let ies = &data[ie..ie + ie_len];

        let mut rates = Vec::new();
        let mut basic_rates = Vec::new();
        let mut ext_rates = Vec::new();
        let mut hw_rates = Vec::new();
        let mut ht_op = None;
        let mut vht_op = None;
        for elem in IeIter::new(ies) {
            let elem = elem.map_err(malformed)?;
            match elem.id {
                id if id == WlanEid::SupportedRates.as_u8() => {
                    for &r in elem.data {
                        if r & RATE_BASIC != 0 {
                            basic_rates.push(r);
                        }
                        rates.push(r);
                        hw_rates.push(u16::from(r & !RATE_BASIC) * 5);
                    }
                }
                id if id == WlanEid::ExtSuppRates.as_u8() => ext_rates.extend_from_slice(elem.data),
                id if id == WlanEid::HtOperation.as_u8() => ht_op = Some(elem.data),
                id if id == WlanEid::VhtOperation.as_u8() => vht_op = Some(elem.data),
                _ => {}
            }
        }

        let width = match (vht_op, ht_op) {
            (Some(vht), _) if vht.first().copied().unwrap_or(0) != 0 => ChannelFlags::MHZ_80,
            (Some(_), _) => ChannelFlags::MHZ_40,
            (None, Some(ht)) if ht.get(1).copied().unwrap_or(0) & HT_OP_SECONDARY_CHAN != 0 => {
                ChannelFlags::MHZ_40
            }
            _ => ChannelFlags::MHZ_20,
        };
        let channel = ChannelDesc::with_width(phy_info.channel, width);
        let ht_supported = ht_op.is_some();
        let vht_supported = vht_op.is_some();

        Ok(Self {
            buf,
            wh,
            ie,
            ie_len,
            phy_info: *phy_info,
            sys_timestamp: now_ms,
            channel,
            rssi,
            noise,
            rates,
            basic_rates,
            ext_rates,
            hw_rates,
            ht_supported,
            vht_supported,
        })
    }

    /// 同一 BSS 再次出现：刷新 PHY 信息、信号与时间；信道变化时重算频段
    pub fn update(&mut self, phy_info: &RxPhyInfo, rssi: i32, noise: i32, now_ms: u64) {
        self.phy_info = *phy_info;
        self.rssi = rssi;
        self.noise = noise;
        if phy_info.channel != self.channel.channel {
            log::debug!(target: "iwlwifi::fdrv::scan", "bss moved from channel {} to {}", self.channel.channel, phy_info.channel);
            self.channel.set_channel(phy_info.channel);
        }
        self.sys_timestamp = now_ms;
    }

    fn header(&self) -> &[u8] {
        &self.buf.data()[self.wh..self.ie]
    }

    pub fn ie(&self) -> &[u8] {
        &self.buf.data()[self.ie..self.ie + self.ie_len]
    }

    pub fn ie_len(&self) -> usize {
        self.ie_len
    }

    /// SSID 原始字节，最长 32
    pub fn ssid(&self) -> &[u8] {
        let ie = self.ie();
        let len = self.ssid_len().min(ie.len().saturating_sub(2));
        &ie[2..2 + len]
    }

    pub fn ssid_len(&self) -> usize {
        let declared = self.ie().get(1).copied().unwrap_or(0) as usize;
        if declared > MAX_SSID_LEN {
            log::debug!(target: "iwlwifi::fdrv::scan", "ssid length {} clamped", declared);
        }
        declared.min(MAX_SSID_LEN)
    }

    pub fn bssid(&self) -> [u8; 6] {
        let h = self.header();
        let mut out = [0u8; 6];
        out.copy_from_slice(&h[mgmt::ADDR3..mgmt::ADDR3 + 6]);
        out
    }

    pub fn capabilities(&self) -> u16 {
        le16(self.header(), mgmt::BEACON_CAPAB)
    }

    /// TU
    pub fn beacon_interval(&self) -> u16 {
        le16(self.header(), mgmt::BEACON_INTERVAL)
    }

    /// 固件时间戳，排序依据
    pub fn timestamp(&self) -> u64 {
        self.phy_info.timestamp
    }

    pub fn sys_timestamp(&self) -> u64 {
        self.sys_timestamp
    }

    pub fn phy_info(&self) -> &RxPhyInfo {
        &self.phy_info
    }

    pub fn channel(&self) -> ChannelDesc {
        self.channel
    }

    pub fn rssi(&self) -> i32 {
        self.rssi
    }

    pub fn noise(&self) -> i32 {
        self.noise
    }

    /// Supported Rates 元素中的全部速率（含 basic 位）
    pub fn rates(&self) -> &[u8] {
        &self.rates
    }

    pub fn basic_rates(&self) -> &[u8] {
        &self.basic_rates
    }

    pub fn ext_rates(&self) -> &[u8] {
        &self.ext_rates
    }

    pub fn hw_rates(&self) -> &[u16] {
        &self.hw_rates
    }

    pub fn ht_supported(&self) -> bool {
        self.ht_supported
    }

    pub fn vht_supported(&self) -> bool {
        self.vht_supported
    }

    /// 导出不依赖缓冲的快照
    pub fn to_scan_result(&self, now_ms: u64) -> ScanResult {
        let to_mbps = |r: &u8| (r >> 1) & 0x3f;
        ScanResult {
            ssid: String::from_utf8_lossy(self.ssid()).into_owned(),
            bssid: self.bssid(),
            channel: self.channel,
            freq: self.channel.center_freq(),
            rssi: self.rssi,
            noise: self.noise,
            capabilities: self.capabilities(),
            beacon_interval: self.beacon_interval(),
            rates: self
                .rates
                .iter()
                .chain(self.ext_rates.iter())
                .map(to_mbps)
                .collect(),
            ht: self.ht_supported,
            vht: self.vht_supported,
            age_ms: now_ms.saturating_sub(self.sys_timestamp),
        }
    }
}

impl core::fmt::Debug for CachedScan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CachedScan")
            .field("bssid", &self.bssid())
            .field("channel", &self.channel)
            .field("timestamp", &self.timestamp())
            .field("rssi", &self.rssi)
            .field("ie_len", &self.ie_len)
            .finish()
    }
}

/// 新记录在前：时间戳大的排前，相等视为等价
pub fn order_cached_scans(a: &CachedScan, b: &CachedScan) -> Ordering {
    b.timestamp().cmp(&a.timestamp())
}

/// 扫描结果快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub channel: ChannelDesc,
    /// MHz
    pub freq: u32,
    pub rssi: i32,
    pub noise: i32,
    pub capabilities: u16,
    pub beacon_interval: u16,
    /// Mbps（半速率舍去）
    pub rates: Vec<u8>,
    pub ht: bool,
    pub vht: bool,
    pub age_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_frames::{self, BSSID_A};
    use ieee80211::Band;

    const TEST_IES: [u8; 16] = [
        0x00, 0x04, b'T', b'e', b's', b't', 0x01, 0x08, 82, 84, 87, 90, 96, 108, 110, 112,
    ];

    fn ingest(ies: &[u8], ts: u64, channel: u16) -> Result<CachedScan, ParseError> {
        let rxb = test_frames::rx_mpdu(&test_frames::beacon(&BSSID_A, ies));
        let phy = test_frames::phy(ts, channel, 40);
        CachedScan::ingest(&rxb, 0, test_frames::WH_OFFSET, &phy, -40, -95, 1000)
    }

    #[test]
    fn test_frame_yields_ssid_and_rates() {
        let scan = ingest(&TEST_IES, 10, 6).unwrap();
        assert_eq!(scan.ssid(), b"Test");
        assert_eq!(scan.ssid_len(), 4);
        assert_eq!(scan.rates().len(), 8);
        assert!(scan.basic_rates().is_empty());
        assert!(scan.ext_rates().is_empty());
        assert_eq!(scan.hw_rates()[0], 410);
        assert_eq!(scan.bssid(), BSSID_A);
        assert_eq!(scan.capabilities(), test_frames::CAPAB);
        assert_eq!(scan.beacon_interval(), 100);
        assert_eq!(scan.ie(), &TEST_IES);
        assert_eq!(scan.channel().band(), Band::TwoGhz);
        assert_eq!(scan.channel().flags, ChannelFlags::GHZ_2 | ChannelFlags::MHZ_20);
    }

    #[test]
    fn record_does_not_alias_rx_buffer() {
        let mut rxb = test_frames::rx_mpdu(&test_frames::beacon(&BSSID_A, &TEST_IES));
        let phy = test_frames::phy(1, 1, 40);
        let scan = CachedScan::ingest(&rxb, 0, test_frames::WH_OFFSET, &phy, -40, -95, 0).unwrap();
        let last = rxb.len() - 4;
        rxb[last - 1] = 0;
        rxb.set_len(0);
        assert_eq!(scan.ie(), &TEST_IES);
    }

    #[test]
    fn long_ssid_is_clamped() {
        let mut ies = alloc::vec![0x00, 40];
        ies.extend_from_slice(&[b'x'; 40]);
        let scan = ingest(&ies, 1, 1).unwrap();
        assert_eq!(scan.ssid_len(), 32);
        assert_eq!(scan.ssid().len(), 32);
    }

    #[test]
    fn overflowing_element_in_exact_buffer() {
        // 最后一个元素声明 8 字节，实际只有 2 字节；缓冲恰好到 IE 区末尾
        let ies = [0x00, 0x01, b'a', 0x01, 0x08, 0x82, 0x84];
        let frame = test_frames::beacon(&BSSID_A, &ies);
        let mut rxb = test_frames::rx_mpdu(&frame);
        let end = RX_PKT_HDR_LEN + test_frames::WH_OFFSET + frame.len();
        rxb.set_len(end);
        let phy = test_frames::phy(1, 1, 40);
        let err = CachedScan::ingest(&rxb, 0, test_frames::WH_OFFSET, &phy, -40, -95, 0).unwrap_err();
        assert_eq!(err, ParseError::MalformedElement { offset: 3 });
    }

    #[test]
    fn declared_length_beyond_buffer() {
        let frame = test_frames::beacon(&BSSID_A, &TEST_IES);
        let mut rxb = test_frames::rx_mpdu(&frame);
        rxb.set_len(RX_PKT_HDR_LEN + test_frames::WH_OFFSET + frame.len() - 1);
        let phy = test_frames::phy(1, 1, 40);
        let err = CachedScan::ingest(&rxb, 0, test_frames::WH_OFFSET, &phy, -40, -95, 0).unwrap_err();
        assert_eq!(err, ParseError::Truncated);
    }

    #[test]
    fn leading_tag_must_be_ssid() {
        let err = ingest(&[0x01, 0x01, 0x82], 1, 1).unwrap_err();
        assert_eq!(err, ParseError::NonConformant { tag: 0x01 });
        assert_eq!(err.errno(), -74);
    }

    #[test]
    fn header_only_frame_has_no_elements() {
        let err = ingest(&[], 1, 1).unwrap_err();
        assert_eq!(err, ParseError::NoInformationElements);
    }

    #[test]
    fn bandwidth_from_ht_and_vht() {
        let mut ies = alloc::vec![0x00, 0x00];
        // HT operation：primary 36，secondary offset 存在
        ies.extend_from_slice(&[61, 22, 36, 0x05]);
        ies.extend_from_slice(&[0; 20]);
        let scan = ingest(&ies, 1, 36).unwrap();
        assert!(scan.ht_supported());
        assert_eq!(scan.channel().flags, ChannelFlags::GHZ_5 | ChannelFlags::MHZ_40);

        ies.extend_from_slice(&[192, 5, 1, 42, 0, 0, 0]);
        let scan = ingest(&ies, 1, 36).unwrap();
        assert!(scan.vht_supported());
        assert_eq!(scan.channel().flags, ChannelFlags::GHZ_5 | ChannelFlags::MHZ_80);

        let scan = ingest(&[0x00, 0x00, 61, 2, 6, 0x00], 1, 6).unwrap();
        assert_eq!(scan.channel().flags, ChannelFlags::GHZ_2 | ChannelFlags::MHZ_20);
    }

    #[test]
    fn newest_first_ordering() {
        let mut scans = alloc::vec![
            ingest(&TEST_IES, 5, 1).unwrap(),
            ingest(&TEST_IES, 9, 1).unwrap(),
            ingest(&TEST_IES, 5, 1).unwrap(),
            ingest(&TEST_IES, 7, 1).unwrap(),
        ];
        scans.sort_by(order_cached_scans);
        let ts: Vec<u64> = scans.iter().map(|s| s.timestamp()).collect();
        assert_eq!(ts, [9, 7, 5, 5]);
        assert_eq!(order_cached_scans(&scans[2], &scans[3]), Ordering::Equal);
    }

    #[test]
    fn update_keeps_identity_and_advances_signal() {
        let mut scan = ingest(&TEST_IES, 100, 6).unwrap();
        let phy = test_frames::phy(200, 6, 30);
        scan.update(&phy, -30, -92, 5000);
        assert_eq!(scan.bssid(), BSSID_A);
        assert_eq!(scan.capabilities(), test_frames::CAPAB);
        assert_eq!(scan.ssid(), b"Test");
        assert_eq!(scan.timestamp(), 200);
        assert_eq!((scan.rssi(), scan.noise()), (-30, -92));
        assert_eq!(scan.sys_timestamp(), 5000);

        scan.update(&test_frames::phy(300, 149, 30), -31, -92, 6000);
        assert_eq!(scan.channel().band(), Band::FiveGhz);
        assert_eq!(scan.channel().flags, ChannelFlags::GHZ_5 | ChannelFlags::MHZ_20);
    }

    #[test]
    fn scan_result_snapshot() {
        let mut ies = TEST_IES.to_vec();
        ies.extend_from_slice(&[50, 2, 0x0c | 0x80, 0x12]);
        let scan = ingest(&ies, 1, 11).unwrap();
        let r = scan.to_scan_result(1500);
        assert_eq!(r.ssid, "Test");
        assert_eq!(r.freq, 2462);
        assert_eq!(r.rates.len(), 10);
        assert_eq!(r.rates[0], 41);
        assert_eq!(r.rates[8], 6);
        assert_eq!(r.age_ms, 500);
    }
}
