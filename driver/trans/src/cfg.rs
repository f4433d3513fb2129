//! 芯片配置表（iwl-config.h / pcie/drv.c 中的 iwl_hw_card_ids）
//!
//! 只收录本驱动支持的两代传输层：gen1（7000/8000/9000）与 gen2（22000）。

/// Intel PCI vendor ID
pub const PCI_VENDOR_ID_INTEL: u16 = 0x8086;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    Family7000,
    Family8000,
    Family9000,
    Family22000,
}

/// 传输层代际
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransGen {
    Gen1,
    Gen2,
}

impl DeviceFamily {
    pub const fn trans_gen(self) -> TransGen {
        match self {
            DeviceFamily::Family22000 => TransGen::Gen2,
            _ => TransGen::Gen1,
        }
    }
}

/// 芯片配置（struct iwl_cfg 中驱动用到的部分）
#[derive(Debug, PartialEq, Eq)]
pub struct IwlCfg {
    pub name: &'static str,
    /// 固件文件名前缀，加 API 版本与 ".ucode" 得到完整文件名
    pub fw_name_pre: &'static str,
    pub ucode_api_max: u8,
    pub family: DeviceFamily,
    /// 该芯片 apm_init 需要经 PRPH 打开 DMA 时钟
    pub apmg_wake_up_wa: bool,
}

pub static IWL7260_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Dual Band Wireless AC 7260",
    fw_name_pre: "iwlwifi-7260-",
    ucode_api_max: 17,
    family: DeviceFamily::Family7000,
    apmg_wake_up_wa: true,
};

pub static IWL3160_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Dual Band Wireless AC 3160",
    fw_name_pre: "iwlwifi-3160-",
    ucode_api_max: 17,
    family: DeviceFamily::Family7000,
    apmg_wake_up_wa: true,
};

pub static IWL7265_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Dual Band Wireless AC 7265",
    fw_name_pre: "iwlwifi-7265D-",
    ucode_api_max: 29,
    family: DeviceFamily::Family7000,
    apmg_wake_up_wa: true,
};

pub static IWL3165_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Dual Band Wireless AC 3165",
    fw_name_pre: "iwlwifi-7265D-",
    ucode_api_max: 29,
    family: DeviceFamily::Family7000,
    apmg_wake_up_wa: true,
};

pub static IWL8260_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Dual Band Wireless AC 8260",
    fw_name_pre: "iwlwifi-8000C-",
    ucode_api_max: 36,
    family: DeviceFamily::Family8000,
    apmg_wake_up_wa: false,
};

pub static IWL8265_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Dual Band Wireless AC 8265",
    fw_name_pre: "iwlwifi-8265-",
    ucode_api_max: 36,
    family: DeviceFamily::Family8000,
    apmg_wake_up_wa: false,
};

pub static IWL9260_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Wireless-AC 9260",
    fw_name_pre: "iwlwifi-9260-th-b0-jf-b0-",
    ucode_api_max: 46,
    family: DeviceFamily::Family9000,
    apmg_wake_up_wa: false,
};

pub static IWL9560_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Wireless-AC 9560",
    fw_name_pre: "iwlwifi-9000-pu-b0-jf-b0-",
    ucode_api_max: 46,
    family: DeviceFamily::Family9000,
    apmg_wake_up_wa: false,
};

pub static IWL_AX200_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Wi-Fi 6 AX200",
    fw_name_pre: "iwlwifi-cc-a0-",
    ucode_api_max: 50,
    family: DeviceFamily::Family22000,
    apmg_wake_up_wa: false,
};

pub static IWL_AX201_CFG: IwlCfg = IwlCfg {
    name: "Intel(R) Wi-Fi 6 AX201",
    fw_name_pre: "iwlwifi-QuZ-a0-hr-b0-",
    ucode_api_max: 50,
    family: DeviceFamily::Family22000,
    apmg_wake_up_wa: false,
};

/// PCI device ID → 配置
pub struct PciDeviceId {
    pub device: u16,
    pub cfg: &'static IwlCfg,
}

pub static IWL_HW_CARD_IDS: &[PciDeviceId] = &[
    PciDeviceId { device: 0x08B1, cfg: &IWL7260_CFG },
    PciDeviceId { device: 0x08B2, cfg: &IWL7260_CFG },
    PciDeviceId { device: 0x08B3, cfg: &IWL3160_CFG },
    PciDeviceId { device: 0x08B4, cfg: &IWL3160_CFG },
    PciDeviceId { device: 0x095A, cfg: &IWL7265_CFG },
    PciDeviceId { device: 0x095B, cfg: &IWL7265_CFG },
    PciDeviceId { device: 0x3165, cfg: &IWL3165_CFG },
    PciDeviceId { device: 0x3166, cfg: &IWL3165_CFG },
    PciDeviceId { device: 0x24F3, cfg: &IWL8260_CFG },
    PciDeviceId { device: 0x24F4, cfg: &IWL8260_CFG },
    PciDeviceId { device: 0x24FD, cfg: &IWL8265_CFG },
    PciDeviceId { device: 0x2526, cfg: &IWL9260_CFG },
    PciDeviceId { device: 0x9DF0, cfg: &IWL9560_CFG },
    PciDeviceId { device: 0x30DC, cfg: &IWL9560_CFG },
    PciDeviceId { device: 0x31DC, cfg: &IWL9560_CFG },
    PciDeviceId { device: 0xA370, cfg: &IWL9560_CFG },
    PciDeviceId { device: 0x2723, cfg: &IWL_AX200_CFG },
    PciDeviceId { device: 0x06F0, cfg: &IWL_AX201_CFG },
    PciDeviceId { device: 0x02F0, cfg: &IWL_AX201_CFG },
    PciDeviceId { device: 0xA0F0, cfg: &IWL_AX201_CFG },
    PciDeviceId { device: 0x43F0, cfg: &IWL_AX201_CFG },
];

/// 按 device ID 查表，返回命中的表项（表项的 device 必与参数相同）。
pub fn match_device(vendor: u16, device: u16) -> Option<&'static PciDeviceId> {
    if vendor != PCI_VENDOR_ID_INTEL {
        return None;
    }
    IWL_HW_CARD_IDS.iter().find(|id| id.device == device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_device_id() {
        let id = match_device(PCI_VENDOR_ID_INTEL, 0x24FD).unwrap();
        assert_eq!(id.device, 0x24FD);
        assert_eq!(id.cfg.family, DeviceFamily::Family8000);
        assert_eq!(id.cfg.family.trans_gen(), TransGen::Gen1);
        assert_eq!(
            match_device(PCI_VENDOR_ID_INTEL, 0x2723).unwrap().cfg.family.trans_gen(),
            TransGen::Gen2
        );
    }

    #[test]
    fn unknown_ids() {
        assert!(match_device(0x10ec, 0x24FD).is_none());
        assert!(match_device(PCI_VENDOR_ID_INTEL, 0x1234).is_none());
    }
}
