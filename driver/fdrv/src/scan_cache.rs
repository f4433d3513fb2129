//! 扫描缓存：按 BSSID 去重，按固件时间戳新的在前
//!
//! 同一 BSSID 再次出现时先按新记录的规则检查帧，再原地 `update()`，不再复制缓冲。容量满时淘汰主机时间最早的记录；
//! 超过 `max_age_ms` 未刷新的记录由 [`ScanCache::expire`] 清除。

use alloc::vec::Vec;

use ieee80211::ieee80211::mgmt;
use iwl_trans::rx::RX_PKT_HDR_LEN;
use mbuf::Mbuf;

use crate::cached_scan::{check_frame, order_cached_scans, CachedScan, ParseError, ScanResult};
use crate::phy::RxPhyInfo;

/// 一次入缓存的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanIngest {
    New,
    Updated,
}

pub struct ScanCache {
    records: Vec<CachedScan>,
    capacity: usize,
    max_age_ms: u64,
}

/// 不解析整帧，直接从帧头取 BSSID
fn peek_bssid(rxb: &Mbuf, offset: usize, wh_offset: usize) -> Option<[u8; 6]> {
    let start = offset + RX_PKT_HDR_LEN + wh_offset + mgmt::ADDR3;
    let b = rxb.slice(start, 6)?;
    let mut out = [0u8; 6];
    out.copy_from_slice(b);
    Some(out)
}

impl ScanCache {
    pub fn new(capacity: usize, max_age_ms: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            max_age_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ingest(
        &mut self,
        rxb: &Mbuf,
        offset: usize,
        wh_offset: usize,
        phy_info: &RxPhyInfo,
        rssi: i32,
        noise: i32,
        now_ms: u64,
    ) -> Result<ScanIngest, ParseError> {
        let known = peek_bssid(rxb, offset, wh_offset)
            .and_then(|bssid| self.records.iter().position(|r| r.bssid() == bssid));
        let outcome = match known {
            Some(idx) => {
                check_frame(rxb, offset, wh_offset)?;
                self.records[idx].update(phy_info, rssi, noise, now_ms);
                ScanIngest::Updated
            }
            None => {
                let scan = CachedScan::ingest(rxb, offset, wh_offset, phy_info, rssi, noise, now_ms)?;
                if self.records.len() >= self.capacity {
                    self.evict_oldest();
                }
                log::debug!(
                    target: "iwlwifi::fdrv::scan",
                    "new bss {:02x?} ch {} rssi {}",
                    scan.bssid(), scan.channel().channel, rssi
                );
                self.records.push(scan);
                ScanIngest::New
            }
        };
        self.records.sort_by(order_cached_scans);
        Ok(outcome)
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .records
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.sys_timestamp())
            .map(|(i, _)| i);
        if let Some(i) = oldest {
            let r = self.records.remove(i);
            log::debug!(target: "iwlwifi::fdrv::scan", "cache full, evicted {:02x?}", r.bssid());
        }
    }

    /// 清除超龄记录，返回清除数
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let before = self.records.len();
        let max_age = self.max_age_ms;
        self.records
            .retain(|r| now_ms.saturating_sub(r.sys_timestamp()) <= max_age);
        let expired = before - self.records.len();
        if expired > 0 {
            log::trace!(target: "iwlwifi::fdrv::scan", "expired {} records", expired);
        }
        expired
    }

    /// 新记录在前
    pub fn iter(&self) -> impl Iterator<Item = &CachedScan> {
        self.records.iter()
    }

    pub fn find_by_bssid(&self, bssid: &[u8; 6]) -> Option<&CachedScan> {
        self.records.iter().find(|r| r.bssid() == *bssid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn results(&self, now_ms: u64) -> Vec<ScanResult> {
        self.records.iter().map(|r| r.to_scan_result(now_ms)).collect()
    }
}
