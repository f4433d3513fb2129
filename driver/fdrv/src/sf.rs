//! Smart FIFO 配置（REPLY_SF_CFG_CMD）
//!
//! FULL_ON 的水位按关联 BSS 的能力选取：HT 用 SISO，否则用 LEGACY；
//! 没有节点信息时（UNINIT / INIT_OFF）用 MIMO2 水位与默认超时表。

use axerrno::AxError;
use iwl_trans::{CmdError, Transport};

use crate::cached_scan::CachedScan;
use crate::cmd_ids::REPLY_SF_CFG_CMD;
use crate::op_mode::Mvm;

pub const SF_NUM_SCENARIO: usize = 5;
pub const SF_NUM_TIMEOUT_TYPES: usize = 2;

const SF_W_MARK_SISO: u32 = 6144;
const SF_W_MARK_MIMO2: u32 = 8192;
const SF_W_MARK_LEGACY: u32 = 4096;
const SF_W_MARK_SCAN: u32 = 8192;

/// us
const SF_LONG_DELAY_AGING_TIMER: u32 = 1_000_000;

/// 每个场景的 (aging, idle) 超时，us
const SF_FULL_TIMEOUT: [[u32; SF_NUM_TIMEOUT_TYPES]; SF_NUM_SCENARIO] = [
    [2016, 320],
    [2016, 320],
    [10016, 2016],
    [2016, 320],
    [2016, 320],
];
const SF_FULL_TIMEOUT_DEF: [[u32; SF_NUM_TIMEOUT_TYPES]; SF_NUM_SCENARIO] = [[400, 160]; SF_NUM_SCENARIO];

pub const SF_CFG_CMD_LEN: usize = 4 + 2 * 4 + 2 * SF_NUM_SCENARIO * SF_NUM_TIMEOUT_TYPES * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SfState {
    LongDelayOn = 0,
    FullOn = 1,
    Uninit = 2,
    InitOff = 3,
}

/// watermark 下标
const SF_LONG_DELAY_ON: usize = 0;
const SF_FULL_ON: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfCfgCmd {
    pub state: u32,
    pub watermark: [u32; 2],
    pub long_delay_timeouts: [[u32; SF_NUM_TIMEOUT_TYPES]; SF_NUM_SCENARIO],
    pub full_on_timeouts: [[u32; SF_NUM_TIMEOUT_TYPES]; SF_NUM_SCENARIO],
}

impl SfCfgCmd {
    /// `node` 为关联 BSS 的扫描记录
    pub fn new(state: SfState, node: Option<&CachedScan>) -> Self {
        let full_on_watermark = match node {
            Some(n) if n.ht_supported() => SF_W_MARK_SISO,
            Some(_) => SF_W_MARK_LEGACY,
            None => SF_W_MARK_MIMO2,
        };
        let mut watermark = [0u32; 2];
        watermark[SF_LONG_DELAY_ON] = SF_W_MARK_SCAN;
        watermark[SF_FULL_ON] = full_on_watermark;
        Self {
            state: state as u32,
            watermark,
            long_delay_timeouts: [[SF_LONG_DELAY_AGING_TIMER; SF_NUM_TIMEOUT_TYPES]; SF_NUM_SCENARIO],
            full_on_timeouts: if node.is_some() {
                SF_FULL_TIMEOUT
            } else {
                SF_FULL_TIMEOUT_DEF
            },
        }
    }

    pub fn to_bytes(&self) -> [u8; SF_CFG_CMD_LEN] {
        let mut out = [0u8; SF_CFG_CMD_LEN];
        let words = core::iter::once(self.state)
            .chain(self.watermark)
            .chain(self.long_delay_timeouts.iter().flatten().copied())
            .chain(self.full_on_timeouts.iter().flatten().copied());
        for (chunk, w) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfError {
    /// FULL_ON 需要已关联且已缓存 beacon 的 BSS
    NoBss,
    /// 不能由主机直接请求的状态
    InvalidState(SfState),
    Cmd(CmdError),
}

impl SfError {
    pub const fn errno(self) -> i32 {
        match self {
            SfError::NoBss => -61,
            SfError::InvalidState(_) => -22,
            SfError::Cmd(e) => e.errno(),
        }
    }
}

impl From<CmdError> for SfError {
    fn from(e: CmdError) -> Self {
        SfError::Cmd(e)
    }
}

impl From<SfError> for AxError {
    fn from(e: SfError) -> Self {
        match e {
            SfError::NoBss => AxError::NotFound,
            SfError::InvalidState(_) => AxError::InvalidInput,
            SfError::Cmd(e) => e.into(),
        }
    }
}

impl Mvm {
    /// 组装并异步下发 SF 配置
    pub fn sf_config(&self, trans: &Transport, new_state: SfState) -> Result<(), SfError> {
        let cmd = match new_state {
            SfState::Uninit | SfState::InitOff => SfCfgCmd::new(new_state, None),
            SfState::FullOn => {
                let bssid = self.bss().ok_or(SfError::NoBss)?;
                self.with_scans(|scans| {
                    scans
                        .find_by_bssid(&bssid)
                        .map(|node| SfCfgCmd::new(new_state, Some(node)))
                })
                .ok_or(SfError::NoBss)?
            }
            SfState::LongDelayOn => return Err(SfError::InvalidState(new_state)),
        };
        log::debug!(
            target: "iwlwifi::fdrv",
            "sf config {:?}, full-on watermark {}",
            new_state, cmd.watermark[SF_FULL_ON]
        );
        trans.send_cmd_async(REPLY_SF_CFG_CMD, &cmd.to_bytes())?;
        self.set_sf_state(new_state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout() {
        assert_eq!(SF_CFG_CMD_LEN, 92);
        let cmd = SfCfgCmd::new(SfState::InitOff, None);
        let b = cmd.to_bytes();
        assert_eq!(&b[0..4], &3u32.to_le_bytes());
        assert_eq!(&b[4..8], &SF_W_MARK_SCAN.to_le_bytes());
        assert_eq!(&b[8..12], &SF_W_MARK_MIMO2.to_le_bytes());
        assert_eq!(&b[12..16], &SF_LONG_DELAY_AGING_TIMER.to_le_bytes());
        // full_on_timeouts 从 12 + 40 开始
        assert_eq!(&b[52..56], &400u32.to_le_bytes());
        assert_eq!(&b[88..92], &160u32.to_le_bytes());
    }

    #[test]
    fn full_on_uses_node_capabilities() {
        use crate::test_frames::{self, BSSID_A, WH_OFFSET};

        let ht_ies = [0x00, 0x00, 61, 2, 6, 0x00];
        let rxb = test_frames::rx_mpdu(&test_frames::beacon(&BSSID_A, &ht_ies));
        let phy = test_frames::phy(1, 6, 40);
        let node = CachedScan::ingest(&rxb, 0, WH_OFFSET, &phy, -40, -95, 0).unwrap();
        let cmd = SfCfgCmd::new(SfState::FullOn, Some(&node));
        assert_eq!(cmd.watermark, [SF_W_MARK_SCAN, SF_W_MARK_SISO]);
        assert_eq!(cmd.full_on_timeouts[2], [10016, 2016]);

        let rxb = test_frames::rx_mpdu(&test_frames::beacon(&BSSID_A, &[0x00, 0x00]));
        let node = CachedScan::ingest(&rxb, 0, WH_OFFSET, &phy, -40, -95, 0).unwrap();
        let cmd = SfCfgCmd::new(SfState::FullOn, Some(&node));
        assert_eq!(cmd.watermark[SF_FULL_ON], SF_W_MARK_LEGACY);
    }
}
