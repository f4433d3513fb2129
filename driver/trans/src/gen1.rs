//! 7000/8000/9000 系列：CSR/FH 寄存器序列
//!
//! 固件经命令环逐段下载，写完最后一段后清 CSR_RESET 放开内嵌 CPU；
//! ALIVE 后按固件给出的调度器基址打开 FH TX 通道。

use crate::cfg::TransGen;
use crate::error::{BringUpStage, TransError, TransResult};
use crate::fw::FwImage;
use crate::regs::*;
use crate::trans::{TransOps, Transport};

pub struct TransOpsGen1;

impl TransOpsGen1 {
    /// 停 FH TX DMA 并等待通道空闲
    fn stop_dma(&self, t: &Transport) {
        for ch in 0..FH_TCSR_CHNL_NUM {
            t.write32(fh_tcsr_chnl_tx_config_reg(ch), 0);
        }
        t.write32(FH_MEM_RCSR_CHNL0_CONFIG_REG, 0);
        if t
            .poll_bit(
                FH_MEM_RSSR_RX_STATUS_REG,
                FH_RSSR_CHNL0_RX_STATUS_CHNL_IDLE,
                FH_RSSR_CHNL0_RX_STATUS_CHNL_IDLE,
                1000,
            )
            .is_err()
        {
            log::warn!(target: "iwlwifi::trans", "rx dma did not go idle");
        }
    }

    /// 停总线主控后软复位
    fn sw_reset(&self, t: &Transport) {
        t.set_bit(CSR_RESET, CSR_RESET_REG_FLAG_STOP_MASTER);
        if t
            .poll_bit(
                CSR_RESET,
                CSR_RESET_REG_FLAG_MASTER_DISABLED,
                CSR_RESET_REG_FLAG_MASTER_DISABLED,
                100,
            )
            .is_err()
        {
            log::warn!(target: "iwlwifi::trans", "master disable timed out");
        }
        t.set_bit(CSR_RESET, CSR_RESET_REG_FLAG_SW_RESET);
    }
}

impl TransOps for TransOpsGen1 {
    fn gen(&self) -> TransGen {
        TransGen::Gen1
    }

    fn apm_init(&self, t: &Transport) -> TransResult {
        log::debug!(target: "iwlwifi::trans", "apm_init (gen1)");
        t.set_bit(
            CSR_GIO_CHICKEN_BITS,
            CSR_GIO_CHICKEN_BITS_REG_BIT_DIS_L0S_EXIT_TIMER
                | CSR_GIO_CHICKEN_BITS_REG_BIT_L1A_NO_L0S_RX,
        );
        t.set_bit(CSR_HW_IF_CONFIG_REG, CSR_HW_IF_CONFIG_REG_BIT_HAP_WAKE_L1A);
        t.set_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_INIT_DONE);
        if t
            .poll_bit(
                CSR_GP_CNTRL,
                CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY,
                CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY,
                25_000,
            )
            .is_err()
        {
            log::error!(target: "iwlwifi::trans", "apm_init: mac clock not ready");
            return Err(TransError::BringUpFailed(BringUpStage::Apm));
        }
        if t.device().cfg().apmg_wake_up_wa {
            t.write_prph(APMG_CLK_EN_REG, APMG_CLK_VAL_DMA_CLK_RQT);
            t.set_bits_prph(APMG_PCIDEV_STT_REG, APMG_PCIDEV_STT_VAL_L1_ACT_DIS);
        }
        Ok(())
    }

    fn apm_stop(&self, t: &Transport, op_mode_leave: bool) {
        log::debug!(target: "iwlwifi::trans", "apm_stop (gen1, leave={})", op_mode_leave);
        if op_mode_leave {
            t.clear_bit(CSR_HW_IF_CONFIG_REG, CSR_HW_IF_CONFIG_REG_PREPARE);
        }
        self.sw_reset(t);
        t.clear_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_INIT_DONE);
    }

    fn nic_init(&self, t: &Transport) -> TransResult {
        t.io().reset_rings();
        t.nic_config();
        Ok(())
    }

    fn start_fw(&self, t: &Transport, fw: &FwImage<'_>) -> TransResult {
        // 下载期间 CPU 保持复位
        t.write32(CSR_RESET, CSR_RESET_REG_FLAG_NEVO_RESET);
        for (idx, section) in fw.sections().iter().enumerate() {
            t.load_section(idx, section)?;
        }
        t.write32(CSR_RESET, 0);
        Ok(())
    }

    fn fw_alive(&self, t: &Transport, scd_addr: u32) {
        let sram = t.read_prph(SCD_SRAM_BASE_ADDR);
        if scd_addr != 0 && sram != scd_addr {
            log::warn!(
                target: "iwlwifi::trans",
                "scd base mismatch: alive 0x{:08x}, prph 0x{:08x}",
                scd_addr, sram
            );
        }
        t.write_prph(SCD_TXFACT, 0);
        for ch in 0..FH_TCSR_CHNL_NUM {
            t.write32(
                fh_tcsr_chnl_tx_config_reg(ch),
                FH_TCSR_TX_CONFIG_REG_VAL_DMA_CHNL_ENABLE | FH_TCSR_TX_CONFIG_REG_VAL_DMA_CREDIT_ENABLE,
            );
        }
    }

    fn stop_device_directly(&self, t: &Transport) {
        self.stop_dma(t);
        t.io().reset_rings();
        self.apm_stop(t, false);
    }

    fn force_power_gating(&self, _t: &Transport) -> TransResult {
        Ok(())
    }
}
