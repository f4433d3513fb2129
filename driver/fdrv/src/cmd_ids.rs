//! op mode 使用的固件命令与通知 ID（iwl-mvm fw/api）

/// 每个 MPDU 之前上报的 PHY 信息（iwl_rx_phy_info）
pub const REPLY_RX_PHY_CMD: u16 = 0xc0;
/// 收到的 MPDU：`byte_count u16, reserved u16, frame, status u32`
pub const REPLY_RX_MPDU_CMD: u16 = 0xc1;
/// Smart FIFO 配置
pub const REPLY_SF_CFG_CMD: u16 = 0xd1;

/// MPDU 尾部状态位
pub mod rx_res_status {
    pub const CRC_OK: u32 = 1 << 0;
    pub const OVERRUN_OK: u32 = 1 << 1;
}
