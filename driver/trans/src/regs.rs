//! CSR / FH / PRPH 寄存器定义（iwl-csr.h、iwl-fh.h、iwl-prph.h）

use bitflags::bitflags;

pub const CSR_HW_IF_CONFIG_REG: u32 = 0x000;
pub const CSR_INT_COALESCING: u32 = 0x004;
pub const CSR_INT: u32 = 0x008;
pub const CSR_INT_MASK: u32 = 0x00c;
pub const CSR_FH_INT_STATUS: u32 = 0x010;
pub const CSR_GPIO_IN: u32 = 0x018;
pub const CSR_RESET: u32 = 0x020;
pub const CSR_GP_CNTRL: u32 = 0x024;
pub const CSR_HW_REV: u32 = 0x028;
pub const CSR_GIO_REG: u32 = 0x03c;
pub const CSR_UCODE_DRV_GP1: u32 = 0x054;
pub const CSR_UCODE_DRV_GP1_SET: u32 = 0x058;
pub const CSR_UCODE_DRV_GP1_CLR: u32 = 0x05c;
pub const CSR_GIO_CHICKEN_BITS: u32 = 0x100;
pub const CSR_DBG_HPET_MEM_REG: u32 = 0x240;

/// gen2 context-info：与 CSR_HW_IF_CONFIG_REG 同址的启动控制
pub const CSR_CTXT_INFO_BOOT_CTRL: u32 = 0x000;
pub const CSR_CTXT_INFO_BA: u32 = 0x040;
pub const CSR_AUTO_FUNC_BOOT_ENA: u32 = 1 << 1;

// CSR_HW_IF_CONFIG_REG
pub const CSR_HW_IF_CONFIG_REG_BIT_RADIO_SI: u32 = 1 << 9;
pub const CSR_HW_IF_CONFIG_REG_BIT_MAC_SI: u32 = 1 << 8;
pub const CSR_HW_IF_CONFIG_REG_BIT_HAP_WAKE_L1A: u32 = 1 << 19;
pub const CSR_HW_IF_CONFIG_REG_BIT_NIC_READY: u32 = 1 << 22;
pub const CSR_HW_IF_CONFIG_REG_PREPARE: u32 = 1 << 27;
pub const CSR_HW_IF_CONFIG_REG_MSK_MAC_DASH: u32 = 0x0000_0003;
pub const CSR_HW_IF_CONFIG_REG_MSK_MAC_STEP: u32 = 0x0000_000C;
pub const CSR_HW_IF_CONFIG_REG_POS_MAC_STEP: u32 = 2;

// CSR_GP_CNTRL
pub const CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY: u32 = 1 << 0;
pub const CSR_GP_CNTRL_REG_FLAG_INIT_DONE: u32 = 1 << 2;
pub const CSR_GP_CNTRL_REG_FLAG_MAC_ACCESS_REQ: u32 = 1 << 3;
pub const CSR_GP_CNTRL_REG_FLAG_GOING_TO_SLEEP: u32 = 1 << 4;
/// 读为 0 表示硬件射频开关处于关闭（RF-kill）
pub const CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW: u32 = 1 << 27;

// CSR_RESET
pub const CSR_RESET_REG_FLAG_NEVO_RESET: u32 = 1 << 0;
pub const CSR_RESET_REG_FLAG_FORCE_NMI: u32 = 1 << 1;
pub const CSR_RESET_REG_FLAG_SW_RESET: u32 = 1 << 7;
pub const CSR_RESET_REG_FLAG_MASTER_DISABLED: u32 = 1 << 8;
pub const CSR_RESET_REG_FLAG_STOP_MASTER: u32 = 1 << 9;

// CSR_GIO_CHICKEN_BITS
pub const CSR_GIO_CHICKEN_BITS_REG_BIT_L1A_NO_L0S_RX: u32 = 1 << 23;
pub const CSR_GIO_CHICKEN_BITS_REG_BIT_DIS_L0S_EXIT_TIMER: u32 = 1 << 29;

// CSR_UCODE_DRV_GP1
pub const CSR_UCODE_SW_BIT_RFKILL: u32 = 1 << 1;
pub const CSR_UCODE_DRV_GP1_BIT_CMD_BLOCKED: u32 = 1 << 2;

bitflags! {
    /// CSR_INT / CSR_INT_MASK 位
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CsrInt: u32 {
        const ALIVE = 1 << 0;
        const WAKEUP = 1 << 1;
        const SW_RX = 1 << 3;
        const CT_KILL = 1 << 6;
        const RF_KILL = 1 << 7;
        const SW_ERR = 1 << 25;
        const SCD = 1 << 26;
        const FH_TX = 1 << 27;
        const RX_PERIODIC = 1 << 28;
        const HW_ERR = 1 << 29;
        const FH_RX = 1 << 31;
    }
}

impl CsrInt {
    /// 运行期打开的中断集合（CSR_INI_SET_MASK）
    pub const INI_SET_MASK: CsrInt = CsrInt::FH_RX
        .union(CsrInt::HW_ERR)
        .union(CsrInt::FH_TX)
        .union(CsrInt::SW_ERR)
        .union(CsrInt::RF_KILL)
        .union(CsrInt::SW_RX)
        .union(CsrInt::WAKEUP)
        .union(CsrInt::ALIVE)
        .union(CsrInt::RX_PERIODIC);
    /// 所有 RX 相关位
    pub const RX_ANY: CsrInt = CsrInt::FH_RX.union(CsrInt::SW_RX).union(CsrInt::RX_PERIODIC);
}

// CSR_FH_INT_STATUS
pub const CSR_FH_INT_BIT_TX_CHNL0: u32 = 1 << 0;
pub const CSR_FH_INT_BIT_TX_CHNL1: u32 = 1 << 1;
pub const CSR_FH_INT_BIT_RX_CHNL0: u32 = 1 << 16;
pub const CSR_FH_INT_BIT_RX_CHNL1: u32 = 1 << 17;
pub const CSR_FH_INT_BIT_HI_PRIOR: u32 = 1 << 30;
pub const CSR_FH_INT_TX_MASK: u32 = CSR_FH_INT_BIT_TX_CHNL1 | CSR_FH_INT_BIT_TX_CHNL0;
pub const CSR_FH_INT_RX_MASK: u32 =
    CSR_FH_INT_BIT_HI_PRIOR | CSR_FH_INT_BIT_RX_CHNL1 | CSR_FH_INT_BIT_RX_CHNL0;

// HBUS 目标访问窗口
pub const HBUS_TARG_PRPH_WADDR: u32 = 0x444;
pub const HBUS_TARG_PRPH_RADDR: u32 = 0x448;
pub const HBUS_TARG_PRPH_WDAT: u32 = 0x44c;
pub const HBUS_TARG_PRPH_RDAT: u32 = 0x450;
pub const HBUS_TARG_WRPTR: u32 = 0x460;

// FH
pub const FH_MEM_RCSR_CHNL0_CONFIG_REG: u32 = 0x1c00;
pub const FH_RSCSR_CHNL0_WPTR: u32 = 0x1bc8;
pub const FH_MEM_RSSR_RX_STATUS_REG: u32 = 0x1c44;
pub const FH_RSSR_CHNL0_RX_STATUS_CHNL_IDLE: u32 = 1 << 24;
pub const FH_TCSR_CHNL_NUM: u32 = 8;
pub const FH_TSSR_TX_STATUS_REG: u32 = 0x1ea0;

pub const fn fh_tcsr_chnl_tx_config_reg(chnl: u32) -> u32 {
    0x1d00 + 0x20 * chnl
}

pub const FH_TCSR_TX_CONFIG_REG_VAL_DMA_CHNL_ENABLE: u32 = 0x8000_0000;
pub const FH_TCSR_TX_CONFIG_REG_VAL_DMA_CREDIT_ENABLE: u32 = 0x0000_0008;

// PRPH
pub const APMG_CLK_EN_REG: u32 = 0x3004;
pub const APMG_CLK_VAL_DMA_CLK_RQT: u32 = 1 << 9;
pub const APMG_PCIDEV_STT_REG: u32 = 0x3048;
pub const APMG_PCIDEV_STT_VAL_L1_ACT_DIS: u32 = 1 << 11;
pub const SCD_SRAM_BASE_ADDR: u32 = 0xa0_2c00 + 0x0;
pub const SCD_TXFACT: u32 = 0xa0_2c00 + 0x10;
pub const SCD_QUEUECHAIN_SEL: u32 = 0xa0_2c00 + 0xe8;
pub const SCD_AGGR_SEL: u32 = 0xa0_2c00 + 0x248;
pub const HPM_HIPM_GEN_CFG: u32 = 0xa0_3458;
pub const HPM_HIPM_GEN_CFG_CR_PG_EN: u32 = 1 << 0;
pub const HPM_HIPM_GEN_CFG_CR_SLP_EN: u32 = 1 << 1;
pub const HPM_HIPM_GEN_CFG_CR_FORCE_ACTIVE: u32 = 1 << 10;
/// PRPH 地址有效位
pub const PRPH_ADDR_MASK: u32 = 0x000f_ffff;
