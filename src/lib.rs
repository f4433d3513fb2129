//! Intel PCIe 无线网卡驱动外壳
//!
//! 整合传输层与 op mode：
//! - [`iwl_trans`]：设备句柄、NIC 生命周期、命令环、中断分发、数据 TX 环
//! - [`fdrv`]：MVM op mode、扫描缓存、Smart FIFO、与主机网络接口的数据面交接
//!
//! [`WirelessAdapter`] 是面向主机框架的对象：持有设备与传输层，把主机的生命周期调用
//! （probe / start / stop）、两个中断入口与收发包请求转给下层。

#![no_std]

extern crate alloc;

pub use fdrv;
pub use ieee80211;
pub use iwl_trans;
pub use mbuf;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use axerrno::{AxError, AxResult};
use fdrv::{Mvm, MvmConfig, NetIf, NetIfStats, NetTx, RxDeliver, ScanResult, SfState};
use iwl_trans::{
    CmdResponse, Device, FwImage, IrqFilter, IwlIo, NicState, PciConfig, Platform, TransConfig,
    Transport, UcodeType,
};
use mbuf::{Mbuf, MbufList};
use spin::Mutex;

pub const VENDOR_NAME: &str = "Intel";
/// 上层可见 MTU
pub const MAX_PACKET_SIZE: u32 = 1500;

/// 一块网卡
pub struct WirelessAdapter {
    pci: Arc<dyn PciConfig>,
    trans: Arc<Transport>,
    mvm: Arc<Mvm>,
    irq: IrqFilter,
    rx_deliver: RxDeliver,
    net_tx: NetTx,
    /// 最近一次启动成功的固件文件，恢复时重新解析
    firmware: Mutex<Option<Vec<u8>>>,
    hw_addr: Option<[u8; 6]>,
    enabled: AtomicBool,
}

impl WirelessAdapter {
    /// 识别芯片并建立传输层；不认识的设备直接返回错误，不留下任何状态
    pub fn probe(
        pci: Arc<dyn PciConfig>,
        io: Arc<dyn IwlIo>,
        platform: Arc<dyn Platform>,
        trans_config: TransConfig,
        mvm_config: MvmConfig,
    ) -> AxResult<Self> {
        let dev = Device::probe(&*pci)?;
        let hw_addr = mvm_config.mac_addr;
        let tx_limit = mvm_config.tx_queue_limit;
        let trans = Arc::new(Transport::new(dev, io, platform, trans_config));
        let mvm = Arc::new(Mvm::new(mvm_config));
        trans.set_op_mode(mvm.clone());
        log::info!(
            target: "iwlwifi::adapter",
            "adapter: {} ({})",
            trans.device().cfg().name, trans.device().cfg().fw_name_pre
        );
        Ok(Self {
            irq: trans.irq_filter(),
            pci,
            trans,
            mvm,
            rx_deliver: RxDeliver::new(),
            net_tx: NetTx::new(tx_limit),
            firmware: Mutex::new(None),
            hw_addr,
            enabled: AtomicBool::new(false),
        })
    }

    /// 打开 PCI 译码并用 `firmware`（TLV ucode 文件）完整启动；
    /// 失败时关掉本次打开的一切，网卡对主机不可见
    pub fn start(&self, firmware: &[u8]) -> AxResult {
        let fw = FwImage::parse(firmware, UcodeType::Regular)?;
        self.trans.device().enable_pci(&*self.pci);
        if let Err(e) = self.trans.bring_up(&fw) {
            log::error!(target: "iwlwifi::adapter", "start failed: {:?} ({})", e, e.errno());
            self.trans.device().disable_pci(&*self.pci);
            return Err(e.into());
        }
        *self.firmware.lock() = Some(firmware.to_vec());
        self.enabled.store(true, Ordering::Release);
        log::info!(
            target: "iwlwifi::adapter",
            "started, fw {}.{}.{}",
            fw.ver >> 24, (fw.ver >> 16) & 0xff, fw.ver & 0xffff
        );
        Ok(())
    }

    pub fn stop(&self) {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }
        self.trans.stop_device();
        let dropped = self.net_tx.purge();
        self.mvm.reset();
        self.trans.device().disable_pci(&*self.pci);
        log::info!(target: "iwlwifi::adapter", "stopped, {} tx frames dropped", dropped);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    // ---- 中断 ----

    /// 注册到硬中断上下文的句柄
    pub fn irq_filter(&self) -> IrqFilter {
        self.irq.clone()
    }

    /// 硬中断入口：只屏蔽
    pub fn intr_filter(&self) -> bool {
        self.irq.filter()
    }

    /// 中断下半部入口；环重新有空位时顺带把积压的发送队列推下去
    pub fn intr_occurred(&self) {
        self.trans.irq_handler();
        if self.trans.fw_running() && !self.mvm.tx_blocked() && self.net_tx.pending() > 0 {
            self.net_tx.start(&self.trans);
        }
    }

    // ---- 命令 ----

    pub fn submit(&self, opcode: u16, payload: &[u8], sync: bool) -> AxResult<Option<CmdResponse>> {
        self.trans.submit(opcode, payload, sync).map_err(|e| {
            log::debug!(target: "iwlwifi::adapter", "cmd 0x{:04x}: {:?}", opcode, e);
            AxError::from(e)
        })
    }

    /// 读硬件开关；true 表示射频被关闭
    pub fn rfkill_status(&self) -> bool {
        self.trans.check_hw_rfkill()
    }

    // ---- 恢复 ----

    /// 处理 op mode 记下的恢复请求（命令超时、固件错误、解析失败突增）；
    /// 会等待固件启动，只能在调用者上下文执行。返回是否做了重启
    pub fn handle_recovery(&self) -> AxResult<bool> {
        let Some(err) = self.mvm.take_recovery_request() else {
            return Ok(false);
        };
        log::warn!(target: "iwlwifi::adapter", "recovering from {:?}", err);
        self.recover(true)?;
        Ok(true)
    }

    /// 直接停机后用上次的固件完整重启
    pub fn recover(&self, fw_error: bool) -> AxResult {
        let firmware = self.firmware.lock();
        let Some(blob) = firmware.as_deref() else {
            return Err(AxError::BadState);
        };
        let fw = FwImage::parse(blob, UcodeType::Regular)?;
        let dropped = self.net_tx.purge();
        let res = self.trans.restart_nic(&fw, fw_error);
        self.mvm.reset();
        if let Err(e) = res {
            log::error!(target: "iwlwifi::adapter", "restart failed: {:?}", e);
            self.enabled.store(false, Ordering::Release);
            self.trans.device().disable_pci(&*self.pci);
            return Err(e.into());
        }
        log::info!(target: "iwlwifi::adapter", "restart done, {} tx frames dropped", dropped);
        Ok(())
    }

    // ---- 数据面 ----

    /// 发送一个 802.11 帧；设备未运行时帧被丢弃
    pub fn output_packet(&self, m: Mbuf) -> AxResult {
        if self.trans.state() != NicState::Running {
            return Err(AxError::BadState);
        }
        if !self.net_tx.enqueue(m) {
            return Err(AxError::NoMemory);
        }
        if !self.mvm.tx_blocked() {
            self.net_tx.start(&self.trans);
        }
        Ok(())
    }

    /// 把 op mode 收下的数据帧交给 `ifp`，返回交付个数
    pub fn service_rx(&self, ifp: &dyn NetIf) -> usize {
        let mut ml = MbufList::new();
        while let Some(m) = self.mvm.rx_queue().dequeue() {
            ml.enqueue(m);
        }
        if ml.is_empty() {
            return 0;
        }
        self.rx_deliver.if_input(ifp, &mut ml)
    }

    pub fn tx_pending(&self) -> usize {
        self.net_tx.pending()
    }

    pub fn net_stats(&self) -> NetIfStats {
        let rx = self.rx_deliver.stats();
        let tx = self.net_tx.stats();
        NetIfStats {
            rx_packets: rx.rx_packets,
            rx_bytes: rx.rx_bytes,
            tx_packets: tx.tx_packets,
            tx_bytes: tx.tx_bytes,
            tx_errors: tx.tx_errors,
            tx_dropped: tx.tx_dropped,
        }
    }

    // ---- 扫描 / BSS ----

    fn now_ms(&self) -> u64 {
        self.trans.platform().now_ms()
    }

    /// 新记录在前
    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.mvm.scan_results(self.now_ms())
    }

    pub fn find_bss(&self, bssid: &[u8; 6]) -> Option<ScanResult> {
        self.mvm.find_bss(bssid, self.now_ms())
    }

    pub fn expire_scans(&self) -> usize {
        self.mvm.expire_scans(self.now_ms())
    }

    /// 记录关联的 BSS 并据此配置 Smart FIFO；None 表示断开
    pub fn set_bss(&self, bssid: Option<[u8; 6]>) -> AxResult {
        self.mvm.set_bss(bssid);
        let state = if bssid.is_some() {
            SfState::FullOn
        } else {
            SfState::InitOff
        };
        if let Err(e) = self.mvm.sf_config(&self.trans, state) {
            log::warn!(target: "iwlwifi::adapter", "sf config {:?}: {:?}", state, e);
            self.mvm.set_bss(None);
            return Err(e.into());
        }
        Ok(())
    }

    // ---- 属性 ----

    /// 全零地址视为无效
    pub fn hardware_address(&self) -> AxResult<[u8; 6]> {
        match self.hw_addr {
            Some(addr) if addr != [0; 6] => Ok(addr),
            _ => Err(AxError::InvalidData),
        }
    }

    pub fn model_name(&self) -> &'static str {
        self.trans.device().cfg().name
    }

    pub fn vendor_name(&self) -> &'static str {
        VENDOR_NAME
    }

    pub fn max_packet_size(&self) -> u32 {
        MAX_PACKET_SIZE
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.trans
    }

    pub fn mvm(&self) -> &Arc<Mvm> {
        &self.mvm
    }
}
