//! 传输层：NIC 生命周期状态机与命令提交
//!
//! 状态阶梯：
//!
//! ```text
//! Uninitialized/Stopped --apm_init--> PowerApplied --nic_init--> NicInitialized
//!   --start_fw--> FirmwareLoading --ALIVE--> FirmwareAlive --enter_running--> Running
//!   --stop_device--> StoppingGraceful --> Stopped
//!   --stop_device_directly--> StoppingDirect --> Stopped
//! ```
//!
//! RF-kill 可把 NicInitialized..Running 之间任一状态直接打到 KillPending，只有完整重启能恢复。
//! 各代芯片的寄存器序列在 [`TransOps`] 实现里，状态检查与命令协议在这里共享。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use bitflags::bitflags;
use spin::{Mutex, Once};

use crate::cfg::TransGen;
use crate::cmd::{self, opcode, CmdFlags, CmdQueue, CmdResponse, HostCmd, CMD_QUEUE_ID};
use crate::config::TransConfig;
use crate::device::Device;
use crate::error::{BringUpStage, CmdError, TransError, TransResult};
use crate::fw::{FwImage, FwSection};
use crate::io::{self, IwlIo};
use crate::regs::*;
use crate::rx::{NicError, OpMode};
use crate::sync::{self, Platform, WaitEvent};
use crate::tx::TxQueue;
use crate::{gen1, gen2};

/// 同步等待的单片时长（ms）
const WAIT_SLICE_MS: u32 = 10;
/// 寄存器轮询间隔（us）
const POLL_INTERVAL_US: u32 = 10;

/// NIC 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NicState {
    Uninitialized = 0,
    PowerApplied,
    NicInitialized,
    FirmwareLoading,
    FirmwareAlive,
    Running,
    StoppingGraceful,
    StoppingDirect,
    Stopped,
    KillPending,
}

impl NicState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => NicState::PowerApplied,
            2 => NicState::NicInitialized,
            3 => NicState::FirmwareLoading,
            4 => NicState::FirmwareAlive,
            5 => NicState::Running,
            6 => NicState::StoppingGraceful,
            7 => NicState::StoppingDirect,
            8 => NicState::Stopped,
            9 => NicState::KillPending,
            _ => NicState::Uninitialized,
        }
    }

    /// 固件已在加载或运行（RF-kill 会把这些状态打到 KillPending）
    pub fn is_active(self) -> bool {
        matches!(
            self,
            NicState::NicInitialized
                | NicState::FirmwareLoading
                | NicState::FirmwareAlive
                | NicState::Running
        )
    }

    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            NicState::StoppingGraceful | NicState::StoppingDirect | NicState::Stopped
        )
    }
}

bitflags! {
    /// 传输层状态位（STATUS_*）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransStatus: u32 {
        const DEVICE_ENABLED = 1 << 0;
        const INT_ENABLED = 1 << 1;
        const HW_RFKILL = 1 << 2;
        const RFKILL_OPMODE = 1 << 3;
        const UCODE_WRITE_COMPLETE = 1 << 4;
        const FW_ALIVE = 1 << 5;
        const FW_ERROR = 1 << 6;
        const RECOVERY_PENDING = 1 << 7;
    }
}

/// ERROR_RECOVERY_CMD 标志
pub mod recovery_flags {
    pub const ERROR_RECOVERY_UPDATE_DB: u32 = 1 << 0;
    pub const ERROR_RECOVERY_END_OF_RECOVERY: u32 = 1 << 1;
}

/// 按芯片代际区分的寄存器序列
pub trait TransOps: Send + Sync {
    fn gen(&self) -> TransGen;

    /// 上电与时钟就绪（iwl_pcie_apm_init）
    fn apm_init(&self, t: &Transport) -> TransResult;

    /// 断电；`op_mode_leave` 表示驱动整体卸载，不再需要 WoWLAN 唤醒
    fn apm_stop(&self, t: &Transport, op_mode_leave: bool);

    /// 环与硬件配置（iwl_pcie_nic_init）
    fn nic_init(&self, t: &Transport) -> TransResult;

    /// 下载固件并释放内嵌 CPU
    fn start_fw(&self, t: &Transport, fw: &FwImage<'_>) -> TransResult;

    /// 固件 ALIVE 后的代际相关配置（调度器等）
    fn fw_alive(&self, t: &Transport, scd_addr: u32);

    /// 停 DMA、复位环、断电
    fn stop_device_directly(&self, t: &Transport);

    fn force_power_gating(&self, t: &Transport) -> TransResult;
}

fn ops_for(gen: TransGen) -> Box<dyn TransOps> {
    match gen {
        TransGen::Gen1 => Box::new(gen1::TransOpsGen1),
        TransGen::Gen2 => Box::new(gen2::TransOpsGen2),
    }
}

/// PCIe 传输层
pub struct Transport {
    device: Device,
    io: Arc<dyn IwlIo>,
    platform: Arc<dyn Platform>,
    ops: Box<dyn TransOps>,
    config: TransConfig,
    state: AtomicU8,
    status: AtomicU32,
    pub(crate) inta_mask: AtomicU32,
    scd_base_addr: AtomicU32,
    pub(crate) cmd_queue: CmdQueue,
    pub(crate) txq: TxQueue,
    pub(crate) rx_read: Mutex<u16>,
    pub(crate) irq_lock: Mutex<()>,
    pub(crate) irq_pending: AtomicBool,
    op_mode: Once<Arc<dyn OpMode>>,
}

impl Transport {
    /// 按芯片代际选择 [`TransOps`]，之后不再改变
    pub fn new(
        device: Device,
        io: Arc<dyn IwlIo>,
        platform: Arc<dyn Platform>,
        mut config: TransConfig,
    ) -> Self {
        config.sanitize();
        let ops = ops_for(device.cfg().family.trans_gen());
        log::info!(
            target: "iwlwifi::trans",
            "trans: {} ({:?}), cmd ring {}, rx ring {}",
            device.cfg().name, ops.gen(), config.cmd_queue_size, config.rx_queue_size
        );
        Self {
            cmd_queue: CmdQueue::new(CMD_QUEUE_ID, config.cmd_queue_size),
            txq: TxQueue::new(config.tx_queue_size),
            device,
            io,
            platform,
            ops,
            config,
            state: AtomicU8::new(NicState::Uninitialized as u8),
            status: AtomicU32::new(0),
            inta_mask: AtomicU32::new(0),
            scd_base_addr: AtomicU32::new(0),
            rx_read: Mutex::new(0),
            irq_lock: Mutex::new(()),
            irq_pending: AtomicBool::new(false),
            op_mode: Once::new(),
        }
    }

    /// 挂接 op mode；只能挂一次
    pub fn set_op_mode(&self, op_mode: Arc<dyn OpMode>) {
        self.op_mode.call_once(|| op_mode);
    }

    pub(crate) fn op_mode(&self) -> Option<&Arc<dyn OpMode>> {
        self.op_mode.get()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &TransConfig {
        &self.config
    }

    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    pub(crate) fn io(&self) -> &dyn IwlIo {
        &*self.io
    }

    pub(crate) fn io_arc(&self) -> Arc<dyn IwlIo> {
        self.io.clone()
    }

    pub fn gen(&self) -> TransGen {
        self.ops.gen()
    }

    pub fn scd_base_addr(&self) -> u32 {
        self.scd_base_addr.load(Ordering::Acquire)
    }

    // ---- 状态 ----

    pub fn state(&self) -> NicState {
        NicState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new: NicState) -> NicState {
        let old = NicState::from_u8(self.state.swap(new as u8, Ordering::AcqRel));
        if old != new {
            log::debug!(target: "iwlwifi::trans", "state {:?} -> {:?}", old, new);
        }
        old
    }

    /// 仅当当前状态为 `from` 时切换到 `to`
    fn transition(&self, from: NicState, to: NicState) -> TransResult {
        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                log::debug!(target: "iwlwifi::trans", "state {:?} -> {:?}", from, to);
                Ok(())
            }
            Err(cur) => Err(TransError::InvalidState(NicState::from_u8(cur))),
        }
    }

    pub fn status(&self) -> TransStatus {
        TransStatus::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn test_status(&self, bits: TransStatus) -> bool {
        self.status().contains(bits)
    }

    /// 置位并返回置位前是否已全部置位
    pub(crate) fn set_status(&self, bits: TransStatus) -> bool {
        let old = self.status.fetch_or(bits.bits(), Ordering::AcqRel);
        old & bits.bits() == bits.bits()
    }

    pub(crate) fn clear_status(&self, bits: TransStatus) {
        self.status.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    pub fn fw_running(&self) -> bool {
        self.state() == NicState::Running
    }

    pub fn recovery_pending(&self) -> bool {
        self.test_status(TransStatus::RECOVERY_PENDING)
    }

    // ---- 寄存器访问（寄存器锁只包住单次访问）----

    pub fn read32(&self, reg: u32) -> u32 {
        let _guard = self.device.reg_lock();
        self.io.read32(reg)
    }

    pub fn write32(&self, reg: u32, val: u32) {
        let _guard = self.device.reg_lock();
        self.io.write32(reg, val);
    }

    pub fn set_bit(&self, reg: u32, mask: u32) {
        let _guard = self.device.reg_lock();
        let v = self.io.read32(reg);
        self.io.write32(reg, v | mask);
    }

    pub fn clear_bit(&self, reg: u32, mask: u32) {
        let _guard = self.device.reg_lock();
        let v = self.io.read32(reg);
        self.io.write32(reg, v & !mask);
    }

    /// 轮询直到 `(reg & mask) == (bits & mask)`；成功返回耗时（us）
    pub fn poll_bit(&self, reg: u32, bits: u32, mask: u32, timeout_us: u32) -> Result<u32, u32> {
        let mut t = 0;
        loop {
            if self.read32(reg) & mask == bits & mask {
                return Ok(t);
            }
            if t >= timeout_us {
                return Err(t);
            }
            self.platform.delay_us(POLL_INTERVAL_US);
            t += POLL_INTERVAL_US;
        }
    }

    pub fn read_prph(&self, addr: u32) -> u32 {
        let _guard = self.device.reg_lock();
        io::read_prph(&*self.io, addr)
    }

    pub fn write_prph(&self, addr: u32, val: u32) {
        let _guard = self.device.reg_lock();
        io::write_prph(&*self.io, addr, val);
    }

    pub fn set_bits_prph(&self, addr: u32, mask: u32) {
        let _guard = self.device.reg_lock();
        let v = io::read_prph(&*self.io, addr);
        io::write_prph(&*self.io, addr, v | mask);
    }

    /// 请求 MAC 访问（唤醒设备）
    pub fn grab_nic_access(&self) -> bool {
        self.set_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_MAC_ACCESS_REQ);
        let ok = self
            .poll_bit(
                CSR_GP_CNTRL,
                CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY,
                CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY | CSR_GP_CNTRL_REG_FLAG_GOING_TO_SLEEP,
                15_000,
            )
            .is_ok();
        if !ok {
            self.clear_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_MAC_ACCESS_REQ);
            log::error!(target: "iwlwifi::trans", "timeout waiting for mac clock, GP_CNTRL 0x{:08x}", self.read32(CSR_GP_CNTRL));
        }
        ok
    }

    pub fn release_nic_access(&self) {
        self.clear_bit(CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_MAC_ACCESS_REQ);
    }

    // ---- 中断开关 ----

    pub(crate) fn enable_interrupts(&self) {
        self.set_status(TransStatus::INT_ENABLED);
        self.inta_mask.store(CsrInt::INI_SET_MASK.bits(), Ordering::Release);
        self.write32(CSR_INT_MASK, CsrInt::INI_SET_MASK.bits());
    }

    /// 屏蔽并清除全部中断
    pub(crate) fn disable_interrupts(&self) {
        self.clear_status(TransStatus::INT_ENABLED);
        self.inta_mask.store(0, Ordering::Release);
        self.write32(CSR_INT_MASK, 0);
        self.write32(CSR_INT, 0xffff_ffff);
        self.write32(CSR_FH_INT_STATUS, 0xffff_ffff);
    }

    /// 设备停止后只保留 RF-kill 中断，继续感知开关变化
    fn enable_rfkill_int(&self) {
        self.inta_mask.store(CsrInt::RF_KILL.bits(), Ordering::Release);
        self.write32(CSR_INT_MASK, CsrInt::RF_KILL.bits());
    }

    // ---- 启动阶梯 ----

    /// iwl_pcie_prepare_card_hw：置 PREPARE 并等待 NIC_READY
    fn prepare_card_hw(&self) -> bool {
        self.set_bit(CSR_HW_IF_CONFIG_REG, CSR_HW_IF_CONFIG_REG_PREPARE);
        self.poll_bit(
            CSR_HW_IF_CONFIG_REG,
            CSR_HW_IF_CONFIG_REG_BIT_NIC_READY,
            CSR_HW_IF_CONFIG_REG_BIT_NIC_READY,
            150_000,
        )
        .is_ok()
    }

    /// Uninitialized/Stopped → PowerApplied
    pub fn start_hw(&self) -> TransResult {
        let cur = self.state();
        if !matches!(cur, NicState::Uninitialized | NicState::Stopped) {
            return Err(TransError::InvalidState(cur));
        }
        if !self.prepare_card_hw() {
            log::error!(target: "iwlwifi::trans", "start_hw: NIC not ready");
            return Err(TransError::BringUpFailed(BringUpStage::Apm));
        }
        self.ops.force_power_gating(self)?;
        if let Err(e) = self.ops.apm_init(self) {
            log::error!(target: "iwlwifi::trans", "start_hw: apm_init failed: {:?}", e);
            return Err(TransError::BringUpFailed(BringUpStage::Apm));
        }
        self.transition(cur, NicState::PowerApplied)?;
        self.set_status(TransStatus::DEVICE_ENABLED);
        self.enable_rfkill_int();
        self.check_hw_rfkill();
        Ok(())
    }

    /// PowerApplied → NicInitialized；RF-kill 时进入 KillPending 并返回 `HwRfKilled`
    pub fn nic_init(&self) -> TransResult {
        let cur = self.state();
        if cur != NicState::PowerApplied {
            return Err(TransError::InvalidState(cur));
        }
        self.reset_queues();
        self.write32(CSR_INT, 0xffff_ffff);
        self.write32(CSR_FH_INT_STATUS, 0xffff_ffff);
        if let Err(e) = self.ops.nic_init(self) {
            log::error!(target: "iwlwifi::trans", "nic_init failed: {:?}", e);
            return Err(TransError::BringUpFailed(BringUpStage::NicInit));
        }
        self.transition(NicState::PowerApplied, NicState::NicInitialized)?;
        if self.check_hw_rfkill() {
            log::warn!(target: "iwlwifi::trans", "nic_init: radio is killed by hw switch");
            return Err(TransError::HwRfKilled);
        }
        Ok(())
    }

    /// 复位命令环、数据 TX 环与 RX 读指针
    fn reset_queues(&self) {
        self.io.reset_rings();
        self.cmd_queue.reset();
        self.txq.reset();
        *self.rx_read.lock() = 0;
    }

    /// NicInitialized → FirmwareLoading，下载固件并释放 CPU；ALIVE 由中断下半部处理
    pub fn start_fw(&self, fw: &FwImage<'_>, run_in_rfkill: bool) -> TransResult {
        if fw.is_empty() {
            return Err(TransError::FirmwareImage);
        }
        self.transition(NicState::NicInitialized, NicState::FirmwareLoading)?;
        if self.check_hw_rfkill() && !run_in_rfkill {
            return Err(TransError::HwRfKilled);
        }
        self.clear_status(TransStatus::FW_ALIVE | TransStatus::FW_ERROR);
        self.write32(CSR_INT, 0xffff_ffff);
        self.enable_interrupts();
        self.write32(CSR_UCODE_DRV_GP1_CLR, CSR_UCODE_SW_BIT_RFKILL);
        self.write32(CSR_UCODE_DRV_GP1_CLR, CSR_UCODE_DRV_GP1_BIT_CMD_BLOCKED);
        log::info!(target: "iwlwifi::trans", "start_fw: {} sections, {} bytes", fw.sections().len(), fw.total_len());
        self.ops.start_fw(self, fw)
    }

    /// 经命令环下载一个段，按 `fw_chunk_size` 分块
    pub(crate) fn load_section(&self, idx: usize, section: &FwSection<'_>) -> TransResult {
        let chunk_size = self.config.fw_chunk_size;
        for (n, chunk) in section.data.chunks(chunk_size).enumerate() {
            let dst = section.offset + (n * chunk_size) as u32;
            self.load_fw_chunk(dst, chunk).map_err(|e| {
                log::error!(target: "iwlwifi::trans", "section {} chunk {} @0x{:08x} failed", idx, n, dst);
                e
            })?;
        }
        log::debug!(target: "iwlwifi::trans", "section {} @0x{:08x} ({} bytes) loaded", idx, section.offset, section.data.len());
        Ok(())
    }

    /// 写一块固件并等待 FH_TX（写完成）
    fn load_fw_chunk(&self, dst: u32, chunk: &[u8]) -> TransResult {
        let fail = TransError::BringUpFailed(BringUpStage::FirmwareLoad);
        let token = self.cmd_queue.reserve_chunk().map_err(|_| fail)?;
        self.clear_status(TransStatus::UCODE_WRITE_COMPLETE);
        let mut payload = alloc::vec::Vec::with_capacity(4 + chunk.len());
        payload.extend_from_slice(&dst.to_le_bytes());
        payload.extend_from_slice(chunk);
        let frame = cmd::build_frame(
            opcode::FW_CHUNK_CMD,
            CmdFlags::ASYNC,
            self.cmd_queue.sequence(token),
            &payload,
        );
        self.io.write_cmd_slot(token.index, &frame);
        let done = sync::wait_until(
            &*self.platform,
            WaitEvent::UcodeWrite,
            self.config.fw_load_timeout_ms,
            WAIT_SLICE_MS,
            || self.test_status(TransStatus::UCODE_WRITE_COMPLETE),
        );
        self.cmd_queue.release(token);
        if done {
            Ok(())
        } else {
            log::error!(target: "iwlwifi::trans", "fw chunk @0x{:08x} write timeout", dst);
            Err(fail)
        }
    }

    /// 固件 ALIVE（由中断下半部调用）：FirmwareLoading → FirmwareAlive
    pub fn fw_alive(&self, scd_addr: u32) {
        if let Err(e) = self.transition(NicState::FirmwareLoading, NicState::FirmwareAlive) {
            log::warn!(target: "iwlwifi::trans", "unexpected ALIVE: {:?}", e);
            return;
        }
        self.scd_base_addr.store(scd_addr, Ordering::Release);
        self.ops.fw_alive(self, scd_addr);
        self.set_status(TransStatus::FW_ALIVE);
        log::info!(target: "iwlwifi::trans", "firmware alive, scd base 0x{:08x}", scd_addr);
        self.platform.notify(WaitEvent::FwAlive);
    }

    /// 等待 ALIVE；返回调度器基址
    pub fn wait_alive(&self) -> TransResult<u32> {
        let ok = sync::wait_until(
            &*self.platform,
            WaitEvent::FwAlive,
            self.config.alive_timeout_ms,
            WAIT_SLICE_MS,
            || self.test_status(TransStatus::FW_ALIVE) || self.test_status(TransStatus::FW_ERROR),
        );
        if ok && self.test_status(TransStatus::FW_ALIVE) {
            Ok(self.scd_base_addr())
        } else {
            log::error!(target: "iwlwifi::trans", "no ALIVE within {}ms", self.config.alive_timeout_ms);
            Err(TransError::BringUpFailed(BringUpStage::Alive))
        }
    }

    /// FirmwareAlive → Running
    pub fn enter_running(&self) -> TransResult {
        self.transition(NicState::FirmwareAlive, NicState::Running)
            .map_err(|_| TransError::BringUpFailed(BringUpStage::Running))?;
        self.clear_status(TransStatus::RECOVERY_PENDING | TransStatus::FW_ERROR);
        Ok(())
    }

    /// 完整启动；任一步失败都直接停机释放本次占用的资源后再返回
    pub fn bring_up(&self, fw: &FwImage<'_>) -> TransResult {
        let res = (|| {
            self.start_hw()?;
            self.nic_init()?;
            self.start_fw(fw, false)?;
            self.wait_alive()?;
            self.enter_running()
        })();
        if let Err(e) = res {
            log::error!(target: "iwlwifi::trans", "bring-up failed: {:?}", e);
            if self.state() != NicState::Uninitialized {
                self.stop_device_directly();
            }
            return Err(e);
        }
        log::info!(target: "iwlwifi::trans", "bring-up done, {} running", self.device.cfg().name);
        Ok(())
    }

    // ---- 停止 ----

    /// 优雅停止：拒绝新命令，等在途命令清空，关中断，等正在执行的下半部结束，再断电
    pub fn stop_device(&self) {
        let prev = self.state();
        if matches!(prev, NicState::Uninitialized | NicState::Stopped) {
            return;
        }
        self.set_state(NicState::StoppingGraceful);
        let drained = sync::wait_until(
            &*self.platform,
            WaitEvent::CmdDone,
            self.config.drain_timeout_ms,
            WAIT_SLICE_MS,
            || self.cmd_queue.in_flight() == 0,
        );
        if !drained {
            log::warn!(
                target: "iwlwifi::trans",
                "stop_device: {} commands still in flight after {}ms",
                self.cmd_queue.in_flight(), self.config.drain_timeout_ms
            );
        }
        let seq = self.device.rx_sync_seq();
        self.disable_interrupts();
        if self.irq_lock.is_locked() {
            self.device
                .rx_sync_wait(&*self.platform, seq, self.config.drain_timeout_ms);
        }
        self.finish_stop(prev);
    }

    /// 立即停止（致命错误路径）
    pub fn stop_device_directly(&self) {
        let prev = self.state();
        if prev == NicState::Uninitialized {
            return;
        }
        self.set_state(NicState::StoppingDirect);
        self.disable_interrupts();
        self.finish_stop(prev);
    }

    fn finish_stop(&self, prev: NicState) {
        let was_in_rfkill = self.test_status(TransStatus::HW_RFKILL);
        self.cmd_queue.abort_all(CmdError::ShuttingDown);
        self.platform.notify(WaitEvent::CmdDone);
        let dropped = self.txq.purge();
        if dropped > 0 {
            log::debug!(target: "iwlwifi::trans", "stop: dropped {} pending tx frames", dropped);
        }
        if prev != NicState::Stopped {
            self.ops.stop_device_directly(self);
        }
        self.clear_status(
            TransStatus::DEVICE_ENABLED
                | TransStatus::FW_ALIVE
                | TransStatus::UCODE_WRITE_COMPLETE,
        );
        self.set_state(NicState::Stopped);
        self.enable_rfkill_int();
        self.handle_stop_rfkill(was_in_rfkill);
        log::info!(target: "iwlwifi::trans", "device stopped (was {:?})", prev);
    }

    /// 重启：直接停机后完整启动；固件出错引起的重启在成功后通知固件恢复结束
    pub fn restart_nic(&self, fw: &FwImage<'_>, fw_error: bool) -> TransResult {
        log::warn!(target: "iwlwifi::trans", "restart nic (fw_error={})", fw_error);
        self.stop_device_directly();
        self.clear_status(TransStatus::FW_ERROR | TransStatus::RECOVERY_PENDING);
        self.bring_up(fw)?;
        if fw_error {
            if let Err(e) = self.send_recovery_cmd(recovery_flags::ERROR_RECOVERY_END_OF_RECOVERY) {
                log::warn!(target: "iwlwifi::trans", "recovery cmd failed: {:?}", e);
            }
        }
        Ok(())
    }

    pub fn force_power_gating(&self) -> TransResult {
        self.ops.force_power_gating(self)
    }

    /// 按 CSR_HW_REV 配置 MAC step/dash 与 SI 位（iwl_mvm_nic_config）
    pub fn nic_config(&self) {
        let hw_rev = self.read32(CSR_HW_REV);
        let step = (hw_rev & 0xc) >> 2;
        let dash = hw_rev & 0x3;
        let val = (step << CSR_HW_IF_CONFIG_REG_POS_MAC_STEP)
            | dash
            | CSR_HW_IF_CONFIG_REG_BIT_RADIO_SI
            | CSR_HW_IF_CONFIG_REG_BIT_MAC_SI;
        let _guard = self.device.reg_lock();
        let mask = CSR_HW_IF_CONFIG_REG_MSK_MAC_DASH
            | CSR_HW_IF_CONFIG_REG_MSK_MAC_STEP
            | CSR_HW_IF_CONFIG_REG_BIT_RADIO_SI
            | CSR_HW_IF_CONFIG_REG_BIT_MAC_SI;
        let cur = self.io.read32(CSR_HW_IF_CONFIG_REG);
        self.io.write32(CSR_HW_IF_CONFIG_REG, (cur & !mask) | val);
    }

    // ---- RF-kill ----

    /// 读硬件开关并同步状态；返回是否处于 RF-kill
    pub fn check_hw_rfkill(&self) -> bool {
        let killed = self.read32(CSR_GP_CNTRL) & CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW == 0;
        self.set_hw_rfkill_state(killed);
        killed
    }

    pub fn is_rfkill(&self) -> bool {
        self.test_status(TransStatus::HW_RFKILL)
    }

    /// 记录硬件开关状态；开关关闭时把活动状态打到 KillPending。返回 op mode 是否要求停机。
    pub fn set_hw_rfkill_state(&self, killed: bool) -> bool {
        let was = self.is_rfkill();
        if killed {
            self.set_status(TransStatus::HW_RFKILL);
            let cur = self.state();
            if cur.is_active() && self.transition(cur, NicState::KillPending).is_ok() {
                log::warn!(target: "iwlwifi::trans", "rf-kill asserted in {:?}", cur);
            }
        } else {
            self.clear_status(TransStatus::HW_RFKILL);
        }
        if was != killed {
            self.set_rfkill_state(killed)
        } else {
            false
        }
    }

    /// 通知 op mode；返回 op mode 是否要求停机
    pub fn set_rfkill_state(&self, killed: bool) -> bool {
        if killed {
            self.set_status(TransStatus::RFKILL_OPMODE);
        } else {
            self.clear_status(TransStatus::RFKILL_OPMODE);
        }
        match self.op_mode() {
            Some(op) => op.hw_rf_kill(self, killed),
            None => false,
        }
    }

    /// RF_KILL 中断：同步状态，开关关闭时中止在途同步命令
    pub fn irq_rfkill_handle(&self) {
        let killed = self.read32(CSR_GP_CNTRL) & CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW == 0;
        log::warn!(target: "iwlwifi::trans::irq", "rf-kill switch {}", if killed { "off" } else { "on" });
        let wants_stop = self.set_hw_rfkill_state(killed);
        if killed {
            if self.cmd_queue.abort_sync(CmdError::HwRfKilled) {
                self.platform.notify(WaitEvent::CmdDone);
            }
            if wants_stop {
                log::info!(target: "iwlwifi::trans::irq", "op mode requested stop on rf-kill");
            }
        }
    }

    /// 停机后重新检查开关：停机期间中断关闭，可能错过了开关恢复
    pub fn handle_stop_rfkill(&self, was_in_rfkill: bool) {
        let hw_rfkill = self.read32(CSR_GP_CNTRL) & CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW == 0;
        if hw_rfkill {
            self.set_status(TransStatus::HW_RFKILL);
        } else {
            self.clear_status(TransStatus::HW_RFKILL);
        }
        if was_in_rfkill != hw_rfkill {
            self.set_rfkill_state(hw_rfkill);
        }
    }

    // ---- 错误与恢复 ----

    /// 固件/硬件错误：置待恢复并通知 op mode（只通知一次）
    pub fn fw_error(&self, err: NicError) {
        if self.set_status(TransStatus::FW_ERROR | TransStatus::RECOVERY_PENDING) {
            return;
        }
        log::error!(target: "iwlwifi::trans", "nic error {:?} in {:?}, recovery pending", err, self.state());
        if let Some(op) = self.op_mode() {
            op.nic_error(self, err);
        }
    }

    /// 通知固件恢复阶段（ERROR_RECOVERY_CMD，异步）
    pub fn send_recovery_cmd(&self, flags: u32) -> Result<(), CmdError> {
        let data = flags.to_le_bytes();
        self.send_cmd(&HostCmd::async_(opcode::ERROR_RECOVERY_CMD, &data))
            .map(|_| ())
    }

    // ---- 命令提交 ----

    fn check_cmd_allowed(&self, flags: CmdFlags) -> Result<(), CmdError> {
        let state = self.state();
        if state.is_stopping() {
            return Err(CmdError::ShuttingDown);
        }
        if self.recovery_pending() {
            return Err(CmdError::RecoveryPending);
        }
        match state {
            NicState::Running => {}
            // 固件仍在运行时允许标记了 SEND_IN_RFKILL 的命令
            NicState::KillPending
                if flags.contains(CmdFlags::SEND_IN_RFKILL)
                    && self.test_status(TransStatus::FW_ALIVE) => {}
            NicState::KillPending => return Err(CmdError::HwRfKilled),
            _ => return Err(CmdError::NotRunning),
        }
        if self.is_rfkill() && !flags.contains(CmdFlags::SEND_IN_RFKILL) {
            return Err(CmdError::HwRfKilled);
        }
        Ok(())
    }

    /// 提交命令。同步命令返回应答，异步命令放上命令环后返回 None。
    pub fn submit(
        &self,
        opcode: u16,
        payload: &[u8],
        synchronous: bool,
    ) -> Result<Option<CmdResponse>, CmdError> {
        let cmd = if synchronous {
            HostCmd::sync(opcode, payload)
        } else {
            HostCmd::async_(opcode, payload)
        };
        self.send_cmd(&cmd)
    }

    pub fn send_cmd(&self, cmd: &HostCmd<'_>) -> Result<Option<CmdResponse>, CmdError> {
        self.check_cmd_allowed(cmd.flags)?;
        if cmd.data.len() > self.config.max_cmd_payload {
            return Err(CmdError::PayloadTooLarge);
        }
        let sync = cmd.is_sync();
        let token = self.cmd_queue.reserve(cmd.opcode, sync).map_err(|e| {
            log::debug!(target: "iwlwifi::trans::cmd", "cmd 0x{:04x} rejected: {:?}", cmd.opcode, e);
            e
        })?;
        let seq = self.cmd_queue.sequence(token);
        let frame = cmd::build_frame(cmd.opcode, cmd.flags, seq, cmd.data);
        log::trace!(
            target: "iwlwifi::trans::cmd",
            "cmd 0x{:04x} seq 0x{:04x} len {} {}",
            cmd.opcode, seq, cmd.data.len(), if sync { "sync" } else { "async" }
        );
        self.io.write_cmd_slot(token.index, &frame);
        if !sync {
            return Ok(None);
        }

        let mut result = None;
        sync::wait_until(
            &*self.platform,
            WaitEvent::CmdDone,
            self.config.cmd_timeout_ms,
            WAIT_SLICE_MS,
            || {
                result = self.cmd_queue.poll(token);
                result.is_some()
            },
        );
        if let Some(r) = result.or_else(|| self.cmd_queue.abandon(token)) {
            return r.map(Some);
        }
        let state = self.state();
        if state.is_stopping() {
            log::debug!(
                target: "iwlwifi::trans::cmd",
                "cmd 0x{:04x} seq 0x{:04x} dropped by stop in {:?}",
                cmd.opcode, seq, state
            );
            return Err(CmdError::ShuttingDown);
        }
        log::error!(
            target: "iwlwifi::trans::cmd",
            "cmd 0x{:04x} seq 0x{:04x} timed out after {}ms",
            cmd.opcode, seq, self.config.cmd_timeout_ms
        );
        self.fw_error(NicError::CmdTimeout { opcode: cmd.opcode });
        Err(CmdError::CmdTimeout)
    }

    /// 便捷封装：同步命令
    pub fn send_cmd_sync(&self, opcode: u16, payload: &[u8]) -> Result<CmdResponse, CmdError> {
        self.send_cmd(&HostCmd::sync(opcode, payload))?
            .ok_or(CmdError::ShuttingDown)
    }

    /// 便捷封装：异步命令
    pub fn send_cmd_async(&self, opcode: u16, payload: &[u8]) -> Result<(), CmdError> {
        self.send_cmd(&HostCmd::async_(opcode, payload)).map(|_| ())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if !matches!(self.state(), NicState::Uninitialized | NicState::Stopped) {
            self.stop_device_directly();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_fw_image, AliveMode, SimBench, SIM_SCD_BASE};

    fn small_ring() -> TransConfig {
        TransConfig {
            cmd_queue_size: 4,
            ..TransConfig::default()
        }
    }

    #[test]
    fn bring_up_gen1_reaches_running() {
        let bench = SimBench::new_running();
        let t = &bench.trans;
        assert_eq!(t.state(), NicState::Running);
        assert!(t.fw_running());
        assert_eq!(t.gen(), TransGen::Gen1);
        assert_eq!(t.scd_base_addr(), SIM_SCD_BASE);
        assert_eq!(bench.nic.fw_bytes_loaded(), 48 + 20);
        assert!(t.status().contains(TransStatus::FW_ALIVE | TransStatus::DEVICE_ENABLED));
        assert_ne!(
            bench.nic.reg(fh_tcsr_chnl_tx_config_reg(0)) & FH_TCSR_TX_CONFIG_REG_VAL_DMA_CHNL_ENABLE,
            0
        );
        assert_eq!(t.cmd_queue.in_flight(), 0);
    }

    #[test]
    fn bring_up_gen2_uses_context_info() {
        let bench = SimBench::with_device(0x2723, TransConfig::default());
        bench.bring_up();
        assert_eq!(bench.trans.gen(), TransGen::Gen2);
        assert_eq!(bench.trans.state(), NicState::Running);
        assert_eq!(bench.nic.reg(CSR_CTXT_INFO_BA), 0x0040_0000);
        let hpm = bench.nic.prph(HPM_HIPM_GEN_CFG);
        assert_ne!(hpm & HPM_HIPM_GEN_CFG_CR_PG_EN, 0);
        assert_ne!(hpm & HPM_HIPM_GEN_CFG_CR_SLP_EN, 0);
        assert_eq!(hpm & HPM_HIPM_GEN_CFG_CR_FORCE_ACTIVE, 0);
    }

    #[test]
    fn sync_command_returns_response() {
        let bench = SimBench::new_running();
        bench.nic.set_response(0x88, &[1, 0, 0, 0, 9]);
        let resp = bench.trans.submit(0x88, &[1, 2], true).unwrap().unwrap();
        assert_eq!(resp.opcode, 0x88);
        assert_eq!(resp.status(), Some(1));
        assert_eq!(resp.data[4], 9);
        let sent = bench.nic.cmds();
        let last = sent.last().unwrap();
        assert_eq!(last.payload, [1, 2]);
        assert_eq!(cmd::seq_to_queue(last.sequence), CMD_QUEUE_ID);
        assert_eq!(bench.trans.cmd_queue.in_flight(), 0);
    }

    #[test]
    fn async_commands_fill_ring_then_recover() {
        let bench = SimBench::with_device(0x24FD, small_ring());
        bench.bring_up();
        let t = &bench.trans;
        for _ in 0..4 {
            assert_eq!(t.submit(0x10, &[0], false), Ok(None));
        }
        assert_eq!(t.submit(0x10, &[0], false), Err(CmdError::QueueFull));
        assert_eq!(t.submit(0x11, &[0], true), Err(CmdError::QueueFull));
        bench.pump_all();
        assert_eq!(t.cmd_queue.in_flight(), 0);
        assert_eq!(t.submit(0x10, &[0], false), Ok(None));
    }

    #[test]
    fn timeout_enters_recovery_until_restart() {
        let bench = SimBench::new_running();
        let t = &bench.trans;
        bench.nic.silence(0x77);
        let start = t.platform().now_ms();
        assert_eq!(t.submit(0x77, &[], true), Err(CmdError::CmdTimeout));
        assert!(t.platform().now_ms() - start >= t.config().cmd_timeout_ms as u64);
        assert!(t.recovery_pending());
        assert_eq!(
            bench.op_mode.last_nic_error(),
            Some(NicError::CmdTimeout { opcode: 0x77 })
        );
        assert_eq!(t.submit(0x10, &[], false), Err(CmdError::RecoveryPending));

        t.restart_nic(&sim_fw_image(), true).unwrap();
        assert_eq!(t.state(), NicState::Running);
        assert!(!t.recovery_pending());
        assert!(bench.nic.cmd_opcodes().contains(&opcode::ERROR_RECOVERY_CMD));
        bench.nic.unsilence(0x77);
        assert!(t.submit(0x77, &[], true).unwrap().is_some());
    }

    #[test]
    fn timeout_during_stop_is_not_a_nic_error() {
        let bench = SimBench::new_running();
        let t = &bench.trans;
        bench.nic.silence(0x77);
        let weak = Arc::downgrade(t);
        // 命令已上环后设备开始停止
        bench.platform.set_pump(Box::new(move || {
            if let Some(t) = weak.upgrade() {
                t.set_state(NicState::StoppingGraceful);
            }
            false
        }));
        assert_eq!(t.submit(0x77, &[], true), Err(CmdError::ShuttingDown));
        assert!(!t.recovery_pending());
        assert_eq!(bench.op_mode.last_nic_error(), None);
    }

    #[test]
    fn stopped_ring_refuses_slots_until_nic_init() {
        let bench = SimBench::new_running();
        let t = &bench.trans;
        t.stop_device();
        assert_eq!(t.cmd_queue.reserve(0x10, false), Err(CmdError::ShuttingDown));
        assert_eq!(t.cmd_queue.reserve(0x10, true), Err(CmdError::ShuttingDown));
        assert_eq!(t.cmd_queue.in_flight(), 0);

        bench.bring_up();
        assert_eq!(t.state(), NicState::Running);
        assert!(t.submit(0x10, &[], true).unwrap().is_some());
    }

    #[test]
    fn commands_refused_outside_running() {
        let bench = SimBench::new();
        assert_eq!(bench.trans.submit(0x10, &[], true), Err(CmdError::NotRunning));
        bench.bring_up();
        bench.trans.stop_device();
        assert_eq!(bench.trans.state(), NicState::Stopped);
        assert_eq!(bench.trans.submit(0x10, &[], true), Err(CmdError::ShuttingDown));
        assert_eq!(bench.trans.submit(0x10, &[], false), Err(CmdError::ShuttingDown));
    }

    #[test]
    fn oversized_payload_rejected() {
        let bench = SimBench::new_running();
        let big = [0u8; 321];
        assert_eq!(
            bench.trans.submit(0x10, &big, false),
            Err(CmdError::PayloadTooLarge)
        );
        assert_eq!(bench.trans.cmd_queue.in_flight(), 0);
    }

    #[test]
    fn graceful_stop_drains_async_commands() {
        let bench = SimBench::new_running();
        let t = &bench.trans;
        t.submit(0x10, &[1], false).unwrap();
        t.submit(0x11, &[2], false).unwrap();
        assert_eq!(t.cmd_queue.in_flight(), 2);
        t.stop_device();
        assert_eq!(t.state(), NicState::Stopped);
        assert_eq!(t.cmd_queue.in_flight(), 0);
        assert_eq!(bench.nic.reg(CSR_INT_MASK), CsrInt::RF_KILL.bits());
        assert!(!t.status().contains(TransStatus::INT_ENABLED));
    }

    #[test]
    fn rfkill_while_running() {
        let bench = SimBench::new_running();
        let t = &bench.trans;
        bench.nic.set_rfkill(true);
        t.irq_handler();
        assert_eq!(t.state(), NicState::KillPending);
        assert!(t.is_rfkill());
        assert_eq!(bench.op_mode.rfkill_events(), [true]);
        assert_eq!(t.submit(0x10, &[], true), Err(CmdError::HwRfKilled));

        let cmd = HostCmd {
            opcode: 0x10,
            flags: CmdFlags::SEND_IN_RFKILL,
            data: &[],
        };
        assert!(t.send_cmd(&cmd).unwrap().is_some());

        bench.nic.set_rfkill(false);
        t.irq_handler();
        assert!(!t.is_rfkill());
        assert_eq!(bench.op_mode.rfkill_events(), [true, false]);
        // 只有完整重启能离开 KillPending
        assert_eq!(t.state(), NicState::KillPending);
        t.stop_device();
        bench.bring_up();
        assert_eq!(t.state(), NicState::Running);
    }

    #[test]
    fn rfkill_at_nic_init_fails_bring_up() {
        let bench = SimBench::new();
        bench.nic.set_rfkill(true);
        assert_eq!(
            bench.trans.bring_up(&sim_fw_image()),
            Err(TransError::HwRfKilled)
        );
        assert_eq!(bench.trans.state(), NicState::Stopped);
        assert!(bench.trans.is_rfkill());
        assert!(bench.trans.check_hw_rfkill());
    }

    #[test]
    fn start_hw_only_from_idle_states() {
        let bench = SimBench::new();
        bench.trans.start_hw().unwrap();
        assert_eq!(bench.trans.state(), NicState::PowerApplied);
        assert_eq!(
            bench.trans.start_hw(),
            Err(TransError::InvalidState(NicState::PowerApplied))
        );
        assert_eq!(
            bench.trans.start_fw(&sim_fw_image(), false),
            Err(TransError::InvalidState(NicState::PowerApplied))
        );
    }

    #[test]
    fn missing_alive_tears_down_and_allows_retry() {
        let bench = SimBench::new();
        bench.nic.set_alive(AliveMode::Silent);
        assert_eq!(
            bench.trans.bring_up(&sim_fw_image()),
            Err(TransError::BringUpFailed(BringUpStage::Alive))
        );
        assert_eq!(bench.trans.state(), NicState::Stopped);
        assert_eq!(bench.trans.cmd_queue.in_flight(), 0);

        bench.nic.set_alive(AliveMode::Ok);
        bench.bring_up();
        assert_eq!(bench.trans.state(), NicState::Running);
    }

    #[test]
    fn bad_alive_reports_nic_error() {
        let bench = SimBench::new();
        bench.nic.set_alive(AliveMode::BadStatus(0xdead));
        assert_eq!(
            bench.trans.bring_up(&sim_fw_image()),
            Err(TransError::BringUpFailed(BringUpStage::Alive))
        );
        assert_eq!(
            bench.op_mode.last_nic_error(),
            Some(NicError::BadAlive { status: 0xdead })
        );
    }

    #[test]
    fn stalled_fw_load_times_out() {
        let bench = SimBench::new();
        bench.nic.stall_fw_load(true);
        assert_eq!(
            bench.trans.bring_up(&sim_fw_image()),
            Err(TransError::BringUpFailed(BringUpStage::FirmwareLoad))
        );
        assert!(bench.trans.platform().now_ms() >= 5000);
        assert_eq!(bench.trans.state(), NicState::Stopped);
    }

    #[test]
    fn empty_firmware_rejected() {
        let bench = SimBench::new();
        let empty = FwImage::from_sections(alloc::vec::Vec::new());
        assert_eq!(bench.trans.bring_up(&empty), Err(TransError::FirmwareImage));
    }

    #[test]
    fn nic_config_programs_mac_step_and_dash() {
        let bench = SimBench::new();
        bench.nic.set_hw_rev(0b1110);
        bench.bring_up();
        let v = bench.nic.reg(CSR_HW_IF_CONFIG_REG);
        assert_eq!(v & CSR_HW_IF_CONFIG_REG_MSK_MAC_STEP, 3 << 2);
        assert_eq!(v & CSR_HW_IF_CONFIG_REG_MSK_MAC_DASH, 2);
        assert_ne!(v & CSR_HW_IF_CONFIG_REG_BIT_RADIO_SI, 0);
        assert_ne!(v & CSR_HW_IF_CONFIG_REG_BIT_MAC_SI, 0);
    }

    #[test]
    fn fw_error_notifies_once() {
        let bench = SimBench::new_running();
        bench.trans.fw_error(NicError::SwError);
        bench.trans.fw_error(NicError::SwError);
        assert_eq!(bench.op_mode.nic_errors(), 1);
        assert_eq!(
            bench.trans.send_recovery_cmd(recovery_flags::ERROR_RECOVERY_UPDATE_DB),
            Err(CmdError::RecoveryPending)
        );
    }
}
