//! MVM op mode：消费传输层上报的 RX 通知
//!
//! - PHY 信息（0xc0）暂存，供随后的 MPDU 取信号与信道
//! - MPDU（0xc1）：beacon / probe response 进扫描缓存，数据帧进 RX 队列等待交给上层
//! - 短时间内解析失败过多视为固件异常，请求恢复
//!
//! 回调都在中断下半部执行，只做解析与入队，不等待命令应答。

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use ieee80211::ieee80211::{frame_control, is_beacon, is_data, is_probe_resp};
use iwl_trans::{NicError, OpMode, RxPacket, Transport};
use mbuf::{Mbuf, MbufQueue};
use spin::Mutex;

use crate::cached_scan::{ParseError, ScanResult};
use crate::cmd_ids::{rx_res_status, REPLY_RX_MPDU_CMD, REPLY_RX_PHY_CMD};
use crate::config::MvmConfig;
use crate::phy::RxPhyInfo;
use crate::scan_cache::{ScanCache, ScanIngest};
use crate::sf::SfState;

/// MPDU 通知中帧之前的 `byte_count u16, reserved u16`
pub const RX_MPDU_RES_START_LEN: usize = 4;

/// RX 统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MvmStats {
    pub rx_mpdus: u64,
    pub rx_beacons: u64,
    pub rx_data: u64,
    pub rx_dropped: u64,
    pub crc_errors: u64,
    pub parse_errors: u64,
}

struct ParseErrorWindow {
    start_ms: u64,
    count: u32,
}

struct RxState {
    last_phy: Option<RxPhyInfo>,
    scans: ScanCache,
    errors: ParseErrorWindow,
}

pub struct Mvm {
    config: MvmConfig,
    rx: Mutex<RxState>,
    rx_data: MbufQueue,
    stats: Mutex<MvmStats>,
    bss: Mutex<Option<[u8; 6]>>,
    sf_state: Mutex<SfState>,
    recovery: Mutex<Option<NicError>>,
    rfkill: AtomicBool,
    tx_blocked: AtomicBool,
}

fn le16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn le32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

impl Mvm {
    pub fn new(config: MvmConfig) -> Self {
        Self {
            rx: Mutex::new(RxState {
                last_phy: None,
                scans: ScanCache::new(config.scan_cache_size, config.scan_max_age_ms),
                errors: ParseErrorWindow {
                    start_ms: 0,
                    count: 0,
                },
            }),
            rx_data: MbufQueue::new(config.rx_queue_limit),
            stats: Mutex::new(MvmStats::default()),
            bss: Mutex::new(None),
            sf_state: Mutex::new(SfState::Uninit),
            recovery: Mutex::new(None),
            rfkill: AtomicBool::new(false),
            tx_blocked: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &MvmConfig {
        &self.config
    }

    fn rx_phy(&self, trans: &Transport, pkt: &RxPacket<'_>) {
        match RxPhyInfo::parse(pkt.data) {
            Some(phy) => self.rx.lock().last_phy = Some(phy),
            None => {
                log::warn!(target: "iwlwifi::fdrv", "short PHY info ({} bytes)", pkt.data.len());
                self.note_parse_error(trans);
            }
        }
    }

    fn rx_mpdu(&self, trans: &Transport, pkt: &RxPacket<'_>, rxb: &Mbuf, offset: usize) {
        let data = pkt.data;
        self.stats.lock().rx_mpdus += 1;
        if data.len() < RX_MPDU_RES_START_LEN {
            self.note_parse_error(trans);
            return;
        }
        let byte_count = le16(data, 0) as usize;
        let frame_end = RX_MPDU_RES_START_LEN + byte_count;
        if frame_end + 4 > data.len() {
            log::warn!(target: "iwlwifi::fdrv", "MPDU byte count {} beyond packet ({})", byte_count, data.len());
            self.note_parse_error(trans);
            return;
        }
        let status = le32(data, frame_end);
        let ok = rx_res_status::CRC_OK | rx_res_status::OVERRUN_OK;
        if status & ok != ok {
            log::trace!(target: "iwlwifi::fdrv", "MPDU dropped, status 0x{:08x}", status);
            let mut stats = self.stats.lock();
            stats.crc_errors += 1;
            stats.rx_dropped += 1;
            return;
        }
        let frame = &data[RX_MPDU_RES_START_LEN..frame_end];
        let fc = frame_control(frame);

        if is_beacon(fc) || is_probe_resp(fc) {
            let now = trans.platform().now_ms();
            let res = {
                let mut rx = self.rx.lock();
                let Some(phy) = rx.last_phy else {
                    log::debug!(target: "iwlwifi::fdrv", "MPDU without PHY info dropped");
                    drop(rx);
                    self.stats.lock().rx_dropped += 1;
                    return;
                };
                let rssi = phy.rssi();
                rx.scans.ingest(
                    rxb,
                    offset,
                    RX_MPDU_RES_START_LEN,
                    &phy,
                    rssi,
                    self.config.default_noise,
                    now,
                )
            };
            match res {
                Ok(ScanIngest::New | ScanIngest::Updated) => self.stats.lock().rx_beacons += 1,
                Err(e) => {
                    log::debug!(target: "iwlwifi::fdrv::scan", "beacon rejected: {:?}", e);
                    self.note_parse_error(trans);
                }
            }
        } else if is_data(fc) {
            let queued = self.rx_data.enqueue(Mbuf::from_slice(frame));
            let mut stats = self.stats.lock();
            if queued {
                stats.rx_data += 1;
            } else {
                stats.rx_dropped += 1;
            }
        } else {
            log::trace!(target: "iwlwifi::fdrv", "MPDU fc 0x{:04x} ignored", fc);
        }
    }

    /// 在窗口内累计解析失败；达到阈值时请求固件恢复
    fn note_parse_error(&self, trans: &Transport) {
        let now = trans.platform().now_ms();
        self.stats.lock().parse_errors += 1;
        let burst = {
            let mut rx = self.rx.lock();
            let w = &mut rx.errors;
            if now.saturating_sub(w.start_ms) > self.config.parse_error_window_ms {
                w.start_ms = now;
                w.count = 0;
            }
            w.count += 1;
            if w.count >= self.config.parse_error_burst {
                w.count = 0;
                w.start_ms = now;
                true
            } else {
                false
            }
        };
        if burst {
            log::error!(
                target: "iwlwifi::fdrv",
                "{} parse errors within {}ms, requesting recovery",
                self.config.parse_error_burst, self.config.parse_error_window_ms
            );
            trans.fw_error(NicError::ParseErrorBurst);
        }
    }

    // ---- 上层接口 ----

    /// 待交给上层的数据帧
    pub fn rx_queue(&self) -> &MbufQueue {
        &self.rx_data
    }

    pub fn with_scans<R>(&self, f: impl FnOnce(&ScanCache) -> R) -> R {
        f(&self.rx.lock().scans)
    }

    pub fn scan_results(&self, now_ms: u64) -> Vec<ScanResult> {
        self.rx.lock().scans.results(now_ms)
    }

    pub fn find_bss(&self, bssid: &[u8; 6], now_ms: u64) -> Option<ScanResult> {
        self.rx
            .lock()
            .scans
            .find_by_bssid(bssid)
            .map(|r| r.to_scan_result(now_ms))
    }

    pub fn expire_scans(&self, now_ms: u64) -> usize {
        self.rx.lock().scans.expire(now_ms)
    }

    /// 手动送入一帧（例如主动扫描的 probe response 已由上层取得）
    pub fn ingest_scan(
        &self,
        rxb: &Mbuf,
        offset: usize,
        phy: &RxPhyInfo,
        now_ms: u64,
    ) -> Result<ScanIngest, ParseError> {
        self.rx.lock().scans.ingest(
            rxb,
            offset,
            RX_MPDU_RES_START_LEN,
            phy,
            phy.rssi(),
            self.config.default_noise,
            now_ms,
        )
    }

    /// 设置已关联的 BSS（None 表示未关联）
    pub fn set_bss(&self, bssid: Option<[u8; 6]>) {
        *self.bss.lock() = bssid;
    }

    pub fn bss(&self) -> Option<[u8; 6]> {
        *self.bss.lock()
    }

    pub fn sf_state(&self) -> SfState {
        *self.sf_state.lock()
    }

    pub(crate) fn set_sf_state(&self, state: SfState) {
        *self.sf_state.lock() = state;
    }

    /// 取走待处理的恢复请求
    pub fn take_recovery_request(&self) -> Option<NicError> {
        self.recovery.lock().take()
    }

    pub fn is_rfkill(&self) -> bool {
        self.rfkill.load(Ordering::Acquire)
    }

    /// 数据 TX 环已满，上层应暂停发送
    pub fn tx_blocked(&self) -> bool {
        self.tx_blocked.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MvmStats {
        self.stats.lock().clone()
    }

    /// 设备重启后清掉与旧固件实例相关的状态；扫描缓存保留
    pub fn reset(&self) {
        let dropped = self.rx_data.purge();
        {
            let mut rx = self.rx.lock();
            rx.last_phy = None;
            rx.errors.count = 0;
        }
        self.tx_blocked.store(false, Ordering::Release);
        *self.sf_state.lock() = SfState::Uninit;
        if dropped > 0 {
            log::debug!(target: "iwlwifi::fdrv", "reset: dropped {} rx frames", dropped);
        }
    }
}

impl OpMode for Mvm {
    fn rx(&self, trans: &Transport, pkt: &RxPacket<'_>, rxb: &Mbuf, offset: usize) {
        match pkt.opcode {
            REPLY_RX_PHY_CMD => self.rx_phy(trans, pkt),
            REPLY_RX_MPDU_CMD => self.rx_mpdu(trans, pkt, rxb, offset),
            op => log::debug!(target: "iwlwifi::fdrv", "unhandled notification 0x{:04x}", op),
        }
    }

    fn nic_error(&self, _trans: &Transport, err: NicError) {
        log::error!(target: "iwlwifi::fdrv", "nic error {:?}, restart required", err);
        *self.recovery.lock() = Some(err);
    }

    /// RF-kill 打开时要求停机
    fn hw_rf_kill(&self, _trans: &Transport, killed: bool) -> bool {
        log::info!(target: "iwlwifi::fdrv", "rf-kill {}", if killed { "asserted" } else { "released" });
        self.rfkill.store(killed, Ordering::Release);
        killed
    }

    fn queue_full(&self, txq_id: u8) {
        log::debug!(target: "iwlwifi::fdrv", "txq {} full", txq_id);
        self.tx_blocked.store(true, Ordering::Release);
    }

    fn queue_not_full(&self, txq_id: u8) {
        log::debug!(target: "iwlwifi::fdrv", "txq {} has room", txq_id);
        self.tx_blocked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sf::SfError;
    use crate::test_frames::{self, BSSID_A, BSSID_B};
    use alloc::sync::Arc;
    use iwl_trans::cfg::PCI_VENDOR_ID_INTEL;
    use iwl_trans::cmd::SEQ_RX_FRAME;
    use iwl_trans::regs::CsrInt;
    use iwl_trans::sim::{attach_pump, sim_fw_image, SimNic, SimPci, SimPlatform};
    use iwl_trans::{CmdError, Device, Platform, TransConfig};

    struct Bench {
        nic: Arc<SimNic>,
        platform: Arc<SimPlatform>,
        trans: Arc<Transport>,
        mvm: Arc<Mvm>,
    }

    impl Bench {
        fn new(config: MvmConfig) -> Self {
            let pci = SimPci::new(PCI_VENDOR_ID_INTEL, 0x24FD);
            let nic = Arc::new(SimNic::new(256));
            let platform = Arc::new(SimPlatform::new());
            let dev = Device::probe(&pci).unwrap();
            dev.enable_pci(&pci);
            let trans = Arc::new(Transport::new(dev, nic.clone(), platform.clone(), TransConfig::default()));
            let mvm = Arc::new(Mvm::new(config));
            trans.set_op_mode(mvm.clone());
            attach_pump(&platform, &nic, &trans);
            trans.bring_up(&sim_fw_image()).unwrap();
            Self {
                nic,
                platform,
                trans,
                mvm,
            }
        }

        fn rx(&self, opcode: u16, payload: &[u8]) {
            self.nic.inject_rx(&RxPacket::encode(opcode, SEQ_RX_FRAME, payload));
        }

        fn phy(&self, ts: u64, channel: u16, energy: u32) {
            self.rx(REPLY_RX_PHY_CMD, &test_frames::phy(ts, channel, energy).to_bytes());
        }

        fn mpdu(&self, frame: &[u8], status: u32) {
            self.rx(REPLY_RX_MPDU_CMD, &test_frames::mpdu_payload(frame, status));
        }

        fn interrupt(&self) {
            self.nic.raise(CsrInt::FH_RX);
            self.trans.irq_handler();
        }
    }

    const IES: [u8; 8] = [0x00, 0x02, b'a', b'p', 0x01, 0x02, 0x82, 0x84];

    #[test]
    fn beacon_lands_in_scan_cache() {
        let b = Bench::new(MvmConfig::default());
        b.platform.advance_ms(100);
        b.phy(77, 6, 48);
        b.mpdu(&test_frames::beacon(&BSSID_A, &IES), test_frames::good_status());
        b.interrupt();

        let r = b.mvm.find_bss(&BSSID_A, b.platform.now_ms()).unwrap();
        assert_eq!(r.ssid, "ap");
        assert_eq!(r.rssi, -48);
        assert_eq!(r.noise, -95);
        assert_eq!(r.channel.channel, 6);
        assert_eq!(b.mvm.stats().rx_beacons, 1);
        b.mvm.with_scans(|s| assert_eq!(s.iter().next().unwrap().timestamp(), 77));
    }

    #[test]
    fn beacon_without_phy_info_is_dropped() {
        let b = Bench::new(MvmConfig::default());
        b.mpdu(&test_frames::beacon(&BSSID_A, &IES), test_frames::good_status());
        b.interrupt();
        assert!(b.mvm.scan_results(0).is_empty());
        assert_eq!(b.mvm.stats().rx_dropped, 1);
    }

    #[test]
    fn bad_crc_is_dropped() {
        let b = Bench::new(MvmConfig::default());
        b.phy(1, 6, 40);
        b.mpdu(&test_frames::beacon(&BSSID_A, &IES), rx_res_status::OVERRUN_OK);
        b.interrupt();
        assert!(b.mvm.scan_results(0).is_empty());
        assert_eq!(b.mvm.stats().crc_errors, 1);
    }

    #[test]
    fn data_frames_are_queued_with_limit() {
        let config = MvmConfig {
            rx_queue_limit: 2,
            ..Default::default()
        };
        let b = Bench::new(config);
        for i in 0..3u8 {
            b.mpdu(&test_frames::data_frame(&[i; 10]), test_frames::good_status());
        }
        b.interrupt();
        assert_eq!(b.mvm.rx_queue().len(), 2);
        assert_eq!(b.mvm.rx_queue().drops(), 1);
        let first = b.mvm.rx_queue().dequeue().unwrap();
        assert_eq!(&first.data()[24..], &[0u8; 10]);
        let stats = b.mvm.stats();
        assert_eq!((stats.rx_data, stats.rx_dropped), (2, 1));
    }

    #[test]
    fn parse_error_burst_requests_recovery() {
        let config = MvmConfig {
            parse_error_burst: 3,
            ..Default::default()
        };
        let b = Bench::new(config);
        b.phy(1, 6, 40);
        for _ in 0..3 {
            b.mpdu(&test_frames::beacon(&BSSID_B, &[0x07, 0x00]), test_frames::good_status());
        }
        b.interrupt();
        assert_eq!(b.mvm.stats().parse_errors, 3);
        assert!(b.trans.recovery_pending());
        assert_eq!(b.mvm.take_recovery_request(), Some(NicError::ParseErrorBurst));
        assert_eq!(b.mvm.take_recovery_request(), None);
        assert_eq!(b.trans.send_cmd_async(0x88, &[]), Err(CmdError::RecoveryPending));
    }

    #[test]
    fn malformed_frames_from_known_bss_escalate() {
        let config = MvmConfig {
            parse_error_burst: 3,
            ..Default::default()
        };
        let b = Bench::new(config);
        b.phy(1, 6, 40);
        b.mpdu(&test_frames::beacon(&BSSID_A, &IES), test_frames::good_status());
        b.interrupt();
        assert_eq!(b.mvm.stats().rx_beacons, 1);

        b.phy(2, 149, 10);
        for _ in 0..3 {
            b.mpdu(&test_frames::beacon(&BSSID_A, &[0x03, 0x01, 6]), test_frames::good_status());
        }
        b.interrupt();
        assert_eq!(b.mvm.stats().parse_errors, 3);
        assert_eq!(b.mvm.take_recovery_request(), Some(NicError::ParseErrorBurst));
        let r = b.mvm.find_bss(&BSSID_A, 0).unwrap();
        assert_eq!(r.channel.channel, 6);
        assert_eq!(r.rssi, -40);
    }

    #[test]
    fn spread_out_errors_do_not_escalate() {
        let config = MvmConfig {
            parse_error_burst: 2,
            parse_error_window_ms: 100,
            ..Default::default()
        };
        let b = Bench::new(config);
        b.phy(1, 6, 40);
        for _ in 0..3 {
            b.mpdu(&test_frames::beacon(&BSSID_B, &[0x07, 0x00]), test_frames::good_status());
            b.interrupt();
            b.platform.advance_ms(500);
        }
        assert!(!b.trans.recovery_pending());
    }

    #[test]
    fn rfkill_and_queue_hooks() {
        let b = Bench::new(MvmConfig::default());
        b.nic.set_rfkill(true);
        b.trans.irq_handler();
        assert!(b.mvm.is_rfkill());

        b.mvm.queue_full(10);
        assert!(b.mvm.tx_blocked());
        b.mvm.queue_not_full(10);
        assert!(!b.mvm.tx_blocked());
    }

    #[test]
    fn sf_full_on_requires_bss() {
        let b = Bench::new(MvmConfig::default());
        assert_eq!(b.mvm.sf_config(&b.trans, SfState::FullOn), Err(SfError::NoBss));
        b.mvm.set_bss(Some(BSSID_A));
        assert_eq!(b.mvm.sf_config(&b.trans, SfState::FullOn), Err(SfError::NoBss));
        assert_eq!(
            b.mvm.sf_config(&b.trans, SfState::LongDelayOn),
            Err(SfError::InvalidState(SfState::LongDelayOn))
        );

        b.phy(5, 6, 40);
        b.mpdu(&test_frames::beacon(&BSSID_A, &IES), test_frames::good_status());
        b.interrupt();
        b.mvm.sf_config(&b.trans, SfState::FullOn).unwrap();
        assert_eq!(b.mvm.sf_state(), SfState::FullOn);
        let sent = b.nic.cmds();
        let sf = sent.iter().rev().find(|c| c.opcode == crate::cmd_ids::REPLY_SF_CFG_CMD).unwrap();
        assert_eq!(sf.payload.len(), crate::sf::SF_CFG_CMD_LEN);
        assert_eq!(&sf.payload[0..4], &1u32.to_le_bytes());
        assert_eq!(&sf.payload[8..12], &4096u32.to_le_bytes());
    }

    #[test]
    fn reset_clears_runtime_state() {
        let b = Bench::new(MvmConfig::default());
        b.phy(5, 6, 40);
        b.mpdu(&test_frames::beacon(&BSSID_A, &IES), test_frames::good_status());
        b.mpdu(&test_frames::data_frame(&[1; 4]), test_frames::good_status());
        b.interrupt();
        b.mvm.reset();
        assert!(b.mvm.rx_queue().is_empty());
        assert_eq!(b.mvm.scan_results(0).len(), 1);
        b.mpdu(&test_frames::beacon(&BSSID_B, &IES), test_frames::good_status());
        b.interrupt();
        assert!(b.mvm.find_bss(&BSSID_B, 0).is_none());
    }
}
