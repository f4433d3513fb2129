//! 22000 系列：context-info 启动与强制电源门控

use crate::cfg::TransGen;
use crate::error::{BringUpStage, TransError, TransResult};
use crate::fw::FwImage;
use crate::regs::*;
use crate::trans::{TransOps, Transport};

pub struct TransOpsGen2;

impl TransOps for TransOpsGen2 {
    fn gen(&self) -> TransGen {
        TransGen::Gen2
    }

    fn apm_init(&self, t: &Transport) -> TransResult {
        log::debug!(target: "iwlwifi::trans", "apm_init (gen2)");
        t.set_bit(
            CSR_GIO_CHICKEN_BITS,
            CSR_GIO_CHICKEN_BITS_REG_BIT_L1A_NO_L0S_RX,
        );
        t.set_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_INIT_DONE);
        t.poll_bit(
            CSR_GP_CNTRL,
            CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY,
            CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY,
            25_000,
        )
        .map(|_| ())
        .map_err(|_| {
            log::error!(target: "iwlwifi::trans", "apm_init: mac clock not ready");
            TransError::BringUpFailed(BringUpStage::Apm)
        })
    }

    fn apm_stop(&self, t: &Transport, _op_mode_leave: bool) {
        log::debug!(target: "iwlwifi::trans", "apm_stop (gen2)");
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
        t.clear_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_INIT_DONE);
    }

    fn nic_init(&self, t: &Transport) -> TransResult {
        t.io().reset_rings();
        t.nic_config();
        Ok(())
    }

    /// 段仍经命令环写入；最后写 context-info 基址并置 AUTO_FUNC_BOOT_ENA 自启动
    fn start_fw(&self, t: &Transport, fw: &FwImage<'_>) -> TransResult {
        for (idx, section) in fw.sections().iter().enumerate() {
            t.load_section(idx, section)?;
        }
        let base = fw.sections().first().map(|s| s.offset).unwrap_or(0);
        t.write32(CSR_CTXT_INFO_BA, base);
        t.set_bit(CSR_CTXT_INFO_BOOT_CTRL, CSR_AUTO_FUNC_BOOT_ENA);
        Ok(())
    }

    /// 调度器由固件自行配置，只记录基址
    fn fw_alive(&self, _t: &Transport, scd_addr: u32) {
        log::debug!(target: "iwlwifi::trans", "gen2 alive, scd 0x{:08x}", scd_addr);
    }

    fn stop_device_directly(&self, t: &Transport) {
        t.io().reset_rings();
        self.apm_stop(t, false);
    }

    fn force_power_gating(&self, t: &Transport) -> TransResult {
        t.set_bits_prph(HPM_HIPM_GEN_CFG, HPM_HIPM_GEN_CFG_CR_FORCE_ACTIVE);
        t.platform().delay_us(20);
        t.set_bits_prph(
            HPM_HIPM_GEN_CFG,
            HPM_HIPM_GEN_CFG_CR_PG_EN | HPM_HIPM_GEN_CFG_CR_SLP_EN,
        );
        t.platform().delay_us(20);
        let v = t.read_prph(HPM_HIPM_GEN_CFG);
        t.write_prph(HPM_HIPM_GEN_CFG, v & !HPM_HIPM_GEN_CFG_CR_FORCE_ACTIVE);
        Ok(())
    }
}
