//! 设备句柄
//!
//! 一个 PCI function 对应一个 [`Device`]：ID、芯片配置、寄存器锁、RX 同步等待计数、
//! 上次 EBS 扫描结果。芯片配置在 probe 时按自身 device ID 查表确定，之后不再改变。

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, MutexGuard};

use crate::cfg::{self, IwlCfg};
use crate::error::{TransError, TransResult};
use crate::sync::{self, Platform, WaitEvent};

// PCI 配置空间偏移
pub const PCI_VENDOR_ID: u8 = 0x00;
pub const PCI_DEVICE_ID: u8 = 0x02;
pub const PCI_REVISION_ID: u8 = 0x08;
pub const PCI_SUBSYSTEM_VENDOR_ID: u8 = 0x2c;
pub const PCI_SUBSYSTEM_ID: u8 = 0x2e;
/// iwlwifi 关闭 RETRY_TIMEOUT 的配置寄存器
pub const PCI_CFG_RETRY_TIMEOUT: u8 = 0x41;

/// PCI function 的配置空间与命令寄存器
pub trait PciConfig: Send + Sync {
    fn config_read8(&self, offset: u8) -> u8;
    fn config_read16(&self, offset: u8) -> u16;
    fn config_write8(&self, offset: u8, val: u8);
    fn set_bus_master_enable(&self, enable: bool);
    fn set_memory_enable(&self, enable: bool);
    fn set_io_enable(&self, enable: bool);
}

/// 设备句柄
pub struct Device {
    pub vendor_id: u16,
    pub device_id: u16,
    pub subsystem_vendor_id: u16,
    pub subsystem_device_id: u16,
    pub revision: u8,
    cfg: &'static IwlCfg,
    reg_lock: Mutex<()>,
    rx_sync_seq: AtomicU32,
    last_ebs_successful: AtomicBool,
}

impl Device {
    /// 读配置空间并查芯片表；非 Intel 或未知 device ID 返回 `UnsupportedDevice`。
    pub fn probe(pci: &dyn PciConfig) -> TransResult<Self> {
        let vendor_id = pci.config_read16(PCI_VENDOR_ID);
        let device_id = pci.config_read16(PCI_DEVICE_ID);
        let Some(id) = cfg::match_device(vendor_id, device_id) else {
            log::error!(target: "iwlwifi::trans", "probe: unsupported device {:04x}:{:04x}", vendor_id, device_id);
            return Err(TransError::UnsupportedDevice(device_id));
        };
        let dev = Device {
            vendor_id,
            device_id,
            subsystem_vendor_id: pci.config_read16(PCI_SUBSYSTEM_VENDOR_ID),
            subsystem_device_id: pci.config_read16(PCI_SUBSYSTEM_ID),
            revision: pci.config_read8(PCI_REVISION_ID),
            cfg: id.cfg,
            reg_lock: Mutex::new(()),
            rx_sync_seq: AtomicU32::new(0),
            last_ebs_successful: AtomicBool::new(true),
        };
        log::info!(
            target: "iwlwifi::trans",
            "probe: {:04x}:{:04x} subsys {:04x}:{:04x} rev {} -> {}",
            dev.vendor_id, dev.device_id, dev.subsystem_vendor_id, dev.subsystem_device_id, dev.revision, dev.cfg.name
        );
        Ok(dev)
    }

    pub fn cfg(&self) -> &'static IwlCfg {
        self.cfg
    }

    /// 打开总线主控、内存与 IO 译码，并关闭 RETRY_TIMEOUT（避免 L0s 下 PCIe Tx 重试干扰 C3）
    pub fn enable_pci(&self, pci: &dyn PciConfig) {
        pci.set_bus_master_enable(true);
        pci.set_memory_enable(true);
        pci.set_io_enable(true);
        pci.config_write8(PCI_CFG_RETRY_TIMEOUT, 0x00);
    }

    pub fn disable_pci(&self, pci: &dyn PciConfig) {
        pci.set_bus_master_enable(false);
        pci.set_memory_enable(false);
        pci.set_io_enable(false);
    }

    /// 寄存器锁：只包住单次寄存器访问，不得跨等待持有
    pub fn reg_lock(&self) -> MutexGuard<'_, ()> {
        self.reg_lock.lock()
    }

    /// 当前 RX 同步序号
    pub fn rx_sync_seq(&self) -> u32 {
        self.rx_sync_seq.load(Ordering::Acquire)
    }

    /// 一轮 RX 处理结束：推进序号并唤醒等待者
    pub fn rx_sync_notify(&self, platform: &dyn Platform) {
        self.rx_sync_seq.fetch_add(1, Ordering::AcqRel);
        platform.notify(WaitEvent::RxSync);
    }

    /// 等待 RX 同步序号越过 `since`；超时返回 false
    pub fn rx_sync_wait(&self, platform: &dyn Platform, since: u32, timeout_ms: u32) -> bool {
        sync::wait_until(platform, WaitEvent::RxSync, timeout_ms, 10, || {
            self.rx_sync_seq() != since
        })
    }

    pub fn last_ebs_successful(&self) -> bool {
        self.last_ebs_successful.load(Ordering::Relaxed)
    }

    pub fn set_last_ebs_successful(&self, ok: bool) {
        self.last_ebs_successful.store(ok, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("vendor_id", &format_args!("{:#06x}", self.vendor_id))
            .field("device_id", &format_args!("{:#06x}", self.device_id))
            .field("cfg", &self.cfg.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPci;

    #[test]
    fn probe_resolves_cfg_for_own_id() {
        let pci = SimPci::new(0x8086, 0x24FD);
        let dev = Device::probe(&pci).unwrap();
        assert_eq!(dev.device_id, 0x24FD);
        assert!(core::ptr::eq(dev.cfg(), &crate::cfg::IWL8265_CFG));
        let id = crate::cfg::match_device(dev.vendor_id, dev.device_id).unwrap();
        assert_eq!(id.device, dev.device_id);
        assert!(dev.last_ebs_successful());
    }

    #[test]
    fn probe_rejects_foreign_vendor() {
        let pci = SimPci::new(0x10ec, 0x24FD);
        assert_eq!(
            Device::probe(&pci).unwrap_err(),
            TransError::UnsupportedDevice(0x24FD)
        );
    }

    #[test]
    fn enable_pci_sets_decode_bits() {
        let pci = SimPci::new(0x8086, 0x2723);
        let dev = Device::probe(&pci).unwrap();
        dev.enable_pci(&pci);
        assert!(pci.bus_master() && pci.memory() && pci.io());
        dev.disable_pci(&pci);
        assert!(!pci.bus_master());
    }
}
