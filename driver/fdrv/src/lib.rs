//! iwlwifi op mode (MVM)
//!
//! 挂在 [`iwl_trans::Transport`] 上，消费固件上报的 RX 通知：
//! - [`op_mode`]：PHY 信息与 MPDU 分流，解析失败突增时请求恢复
//! - [`cached_scan`] / [`scan_cache`]：beacon / probe response 生成的扫描记录与缓存
//! - [`sf`]：Smart FIFO 配置命令
//! - [`net_if`]：与主机网络接口之间的 RX 交付和 TX 发送队列
//! - [`config`]：`TAG=value` 配置文件

#![no_std]

extern crate alloc;

pub mod cached_scan;
pub mod cmd_ids;
pub mod config;
pub mod net_if;
pub mod op_mode;
pub mod phy;
pub mod scan_cache;
pub mod sf;

#[cfg(test)]
mod test_frames;

pub use cached_scan::{order_cached_scans, CachedScan, ParseError, ScanResult};
pub use config::{parse_mac_addr, MvmConfig, ETH_ALEN};
pub use net_if::{NetIf, NetIfStats, NetTx, RxDeliver};
pub use op_mode::{Mvm, MvmStats};
pub use phy::RxPhyInfo;
pub use scan_cache::{ScanCache, ScanIngest};
pub use sf::{SfCfgCmd, SfError, SfState};
