//! 主机侧模拟：PCI function、NIC 寄存器/环与固件应答、虚拟时钟平台
//!
//! 模拟 NIC 把固件的反应（命令应答、写完成、ALIVE）先放进待投递队列；
//! [`SimPlatform`] 在等待时调用 pump 投递一批事件并跑一轮中断上下半部。
//! 没有可投递事件时虚拟时钟直接前进到超时，所以超时测试不消耗真实时间。

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use core::time::Duration;

use mbuf::Mbuf;
use spin::Mutex;

use crate::cmd::{self, opcode, CmdHeader, CMD_HDR_LEN, SEQ_RX_FRAME};
use crate::config::TransConfig;
use crate::device::{self, Device, PciConfig};
use crate::fw::{FwImage, FwSection};
use crate::io::IwlIo;
use crate::irq::IWL_ALIVE_STATUS_OK;
use crate::regs::*;
use crate::rx::{NicError, OpMode, RxPacket, FH_RSCSR_FRAME_ALIGN};
use crate::sync::{Platform, WaitEvent};
use crate::trans::Transport;

/// 模拟固件上报的调度器基址
pub const SIM_SCD_BASE: u32 = 0x0080_0000;

/// 补齐到 RB 内包对齐
pub fn pad_packet(mut pkt: Vec<u8>) -> Vec<u8> {
    let aligned = (pkt.len() + FH_RSCSR_FRAME_ALIGN - 1) & !(FH_RSCSR_FRAME_ALIGN - 1);
    pkt.resize(aligned, 0);
    pkt
}

static SIM_FW_RT: [u8; 48] = [0x5a; 48];
static SIM_FW_DATA: [u8; 20] = [0xa5; 20];

/// 两段的小固件
pub fn sim_fw_image() -> FwImage<'static> {
    FwImage::from_sections(alloc::vec![
        FwSection { offset: 0x0040_0000, data: &SIM_FW_RT },
        FwSection { offset: 0x0080_0000, data: &SIM_FW_DATA },
    ])
}

// ---- PCI ----

/// 模拟 PCI function 配置空间
pub struct SimPci {
    vendor: u16,
    device: u16,
    subsys_vendor: u16,
    subsys: u16,
    revision: u8,
    bus_master: AtomicBool,
    memory: AtomicBool,
    io: AtomicBool,
    cfg8: Mutex<BTreeMap<u8, u8>>,
}

impl SimPci {
    pub fn new(vendor: u16, device: u16) -> Self {
        Self {
            vendor,
            device,
            subsys_vendor: vendor,
            subsys: 0x0010,
            revision: 0x10,
            bus_master: AtomicBool::new(false),
            memory: AtomicBool::new(false),
            io: AtomicBool::new(false),
            cfg8: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn bus_master(&self) -> bool {
        self.bus_master.load(Ordering::Acquire)
    }

    pub fn memory(&self) -> bool {
        self.memory.load(Ordering::Acquire)
    }

    pub fn io(&self) -> bool {
        self.io.load(Ordering::Acquire)
    }
}

impl PciConfig for SimPci {
    fn config_read8(&self, offset: u8) -> u8 {
        if offset == device::PCI_REVISION_ID {
            return self.revision;
        }
        self.cfg8.lock().get(&offset).copied().unwrap_or(0)
    }

    fn config_read16(&self, offset: u8) -> u16 {
        match offset {
            device::PCI_VENDOR_ID => self.vendor,
            device::PCI_DEVICE_ID => self.device,
            device::PCI_SUBSYSTEM_VENDOR_ID => self.subsys_vendor,
            device::PCI_SUBSYSTEM_ID => self.subsys,
            _ => 0,
        }
    }

    fn config_write8(&self, offset: u8, val: u8) {
        self.cfg8.lock().insert(offset, val);
    }

    fn set_bus_master_enable(&self, enable: bool) {
        self.bus_master.store(enable, Ordering::Release);
    }

    fn set_memory_enable(&self, enable: bool) {
        self.memory.store(enable, Ordering::Release);
    }

    fn set_io_enable(&self, enable: bool) {
        self.io.store(enable, Ordering::Release);
    }
}

// ---- NIC ----

/// 固件对释放 CPU 的反应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveMode {
    Ok,
    BadStatus(u16),
    Silent,
}

/// 主机写入命令环的一条命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCmd {
    pub opcode: u16,
    pub flags: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

enum SimEvent {
    FwWriteDone,
    Rx(Vec<u8>),
}

struct Hw {
    regs: BTreeMap<u32, u32>,
    prph: BTreeMap<u32, u32>,
    prph_waddr: u32,
    prph_raddr: u32,
    rfkill: bool,
    fw_chunks: usize,
    fw_bytes: usize,
    pending: VecDeque<SimEvent>,
    rx_ring: Vec<Option<Mbuf>>,
    closed: u16,
    restocked: u16,
    cmds: Vec<SimCmd>,
    tx_frames: Vec<(u8, u16, Vec<u8>)>,
    responses: BTreeMap<u16, Vec<u8>>,
    silent: BTreeSet<u16>,
    alive: AliveMode,
    stall_fw_load: bool,
    tx_silent: bool,
}

impl Hw {
    fn reg(&self, reg: u32) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn push_rb(&mut self, rb: Vec<u8>) {
        let mask = self.rx_ring.len() as u16 - 1;
        let idx = (self.closed & mask) as usize;
        if self.rx_ring[idx].is_some() {
            log::warn!(target: "iwlwifi::trans", "sim: rx ring overrun at {}", idx);
        }
        self.rx_ring[idx] = Some(Mbuf::from_slice(&rb));
        self.closed = self.closed.wrapping_add(1);
        *self.regs.entry(CSR_INT).or_insert(0) |= CsrInt::FH_RX.bits();
        *self.regs.entry(CSR_FH_INT_STATUS).or_insert(0) |= CSR_FH_INT_BIT_RX_CHNL0;
    }

    fn release_cpu(&mut self) {
        if self.fw_chunks == 0 {
            return;
        }
        self.fw_chunks = 0;
        let status = match self.alive {
            AliveMode::Ok => IWL_ALIVE_STATUS_OK,
            AliveMode::BadStatus(s) => s,
            AliveMode::Silent => return,
        };
        let scd = self
            .prph
            .get(&(SCD_SRAM_BASE_ADDR & PRPH_ADDR_MASK))
            .copied()
            .unwrap_or(0);
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&status.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&scd.to_le_bytes());
        self.pending.push_back(SimEvent::Rx(RxPacket::encode(
            opcode::UCODE_ALIVE_NTFY,
            SEQ_RX_FRAME,
            &data,
        )));
    }
}

/// 模拟 NIC
pub struct SimNic {
    hw: Mutex<Hw>,
}

impl SimNic {
    pub fn new(rx_queue_size: u16) -> Self {
        let mut rx_ring = Vec::new();
        rx_ring.resize_with(rx_queue_size as usize, || None);
        let mut prph = BTreeMap::new();
        prph.insert(SCD_SRAM_BASE_ADDR & PRPH_ADDR_MASK, SIM_SCD_BASE);
        Self {
            hw: Mutex::new(Hw {
                regs: BTreeMap::new(),
                prph,
                prph_waddr: 0,
                prph_raddr: 0,
                rfkill: false,
                fw_chunks: 0,
                fw_bytes: 0,
                pending: VecDeque::new(),
                rx_ring,
                closed: 0,
                restocked: 0,
                cmds: Vec::new(),
                tx_frames: Vec::new(),
                responses: BTreeMap::new(),
                silent: BTreeSet::new(),
                alive: AliveMode::Ok,
                stall_fw_load: false,
                tx_silent: false,
            }),
        }
    }

    /// 寄存器原始值（不经读模拟）
    pub fn reg(&self, reg: u32) -> u32 {
        self.hw.lock().reg(reg)
    }

    pub fn prph(&self, addr: u32) -> u32 {
        self.hw
            .lock()
            .prph
            .get(&(addr & PRPH_ADDR_MASK))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_hw_rev(&self, rev: u32) {
        self.hw.lock().regs.insert(CSR_HW_REV, rev);
    }

    /// 拨动硬件射频开关并置 RF_KILL 中断
    pub fn set_rfkill(&self, killed: bool) {
        let mut hw = self.hw.lock();
        hw.rfkill = killed;
        *hw.regs.entry(CSR_INT).or_insert(0) |= CsrInt::RF_KILL.bits();
    }

    pub fn raise(&self, ints: CsrInt) {
        *self.hw.lock().regs.entry(CSR_INT).or_insert(0) |= ints.bits();
    }

    /// 立即放入一个只含 `pkt` 的 RB 并置 FH_RX
    pub fn inject_rx(&self, pkt: &[u8]) {
        self.hw.lock().push_rb(pad_packet(pkt.to_vec()));
    }

    /// 立即放入一个原始 RB 并置 FH_RX
    pub fn inject_rb(&self, rb: &[u8]) {
        self.hw.lock().push_rb(rb.to_vec());
    }

    /// 固件对 `opcode` 的应答载荷（默认 4 字节 0 状态）
    pub fn set_response(&self, opcode: u16, payload: &[u8]) {
        self.hw.lock().responses.insert(opcode, payload.to_vec());
    }

    /// 固件不再应答 `opcode`
    pub fn silence(&self, opcode: u16) {
        self.hw.lock().silent.insert(opcode);
    }

    pub fn unsilence(&self, opcode: u16) {
        self.hw.lock().silent.remove(&opcode);
    }

    pub fn set_alive(&self, mode: AliveMode) {
        self.hw.lock().alive = mode;
    }

    /// 固件块写入后不产生 FH_TX
    pub fn stall_fw_load(&self, stall: bool) {
        self.hw.lock().stall_fw_load = stall;
    }

    /// 数据帧不产生 TX 应答
    pub fn silence_tx(&self, silent: bool) {
        self.hw.lock().tx_silent = silent;
    }

    pub fn cmds(&self) -> Vec<SimCmd> {
        self.hw.lock().cmds.clone()
    }

    pub fn cmd_opcodes(&self) -> Vec<u16> {
        self.hw.lock().cmds.iter().map(|c| c.opcode).collect()
    }

    pub fn tx_frames(&self) -> Vec<Vec<u8>> {
        self.hw
            .lock()
            .tx_frames
            .iter()
            .map(|(_, _, f)| f.clone())
            .collect()
    }

    pub fn fw_bytes_loaded(&self) -> usize {
        self.hw.lock().fw_bytes
    }

    pub fn restocked(&self) -> u16 {
        self.hw.lock().restocked
    }

    pub fn pending(&self) -> usize {
        self.hw.lock().pending.len()
    }

    /// 投递全部待投递事件；有投递返回 true
    pub fn deliver_pending(&self) -> bool {
        let mut hw = self.hw.lock();
        if hw.pending.is_empty() {
            return false;
        }
        while let Some(ev) = hw.pending.pop_front() {
            match ev {
                SimEvent::FwWriteDone => {
                    *hw.regs.entry(CSR_INT).or_insert(0) |= CsrInt::FH_TX.bits();
                    *hw.regs.entry(CSR_FH_INT_STATUS).or_insert(0) |= CSR_FH_INT_BIT_TX_CHNL1;
                }
                SimEvent::Rx(pkt) => hw.push_rb(pad_packet(pkt)),
            }
        }
        true
    }
}

impl Default for SimNic {
    fn default() -> Self {
        Self::new(256)
    }
}

impl IwlIo for SimNic {
    fn read32(&self, reg: u32) -> u32 {
        let hw = self.hw.lock();
        let v = hw.reg(reg);
        match reg {
            CSR_GP_CNTRL => {
                let mut v = v & !CSR_GP_CNTRL_REG_FLAG_GOING_TO_SLEEP;
                if v & (CSR_GP_CNTRL_REG_FLAG_INIT_DONE | CSR_GP_CNTRL_REG_FLAG_MAC_ACCESS_REQ) != 0 {
                    v |= CSR_GP_CNTRL_REG_FLAG_MAC_CLOCK_READY;
                }
                if hw.rfkill {
                    v & !CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW
                } else {
                    v | CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW
                }
            }
            CSR_HW_IF_CONFIG_REG => v | CSR_HW_IF_CONFIG_REG_BIT_NIC_READY,
            CSR_RESET if v & CSR_RESET_REG_FLAG_STOP_MASTER != 0 => {
                v | CSR_RESET_REG_FLAG_MASTER_DISABLED
            }
            FH_MEM_RSSR_RX_STATUS_REG => FH_RSSR_CHNL0_RX_STATUS_CHNL_IDLE,
            HBUS_TARG_PRPH_RDAT => hw.prph.get(&hw.prph_raddr).copied().unwrap_or(0),
            _ => v,
        }
    }

    fn write32(&self, reg: u32, val: u32) {
        let mut hw = self.hw.lock();
        match reg {
            CSR_INT | CSR_FH_INT_STATUS => {
                let cur = hw.reg(reg);
                hw.regs.insert(reg, cur & !val);
            }
            HBUS_TARG_PRPH_WADDR => hw.prph_waddr = val & PRPH_ADDR_MASK,
            HBUS_TARG_PRPH_RADDR => hw.prph_raddr = val & PRPH_ADDR_MASK,
            HBUS_TARG_PRPH_WDAT => {
                let addr = hw.prph_waddr;
                hw.prph.insert(addr, val);
            }
            CSR_RESET => {
                hw.regs.insert(reg, val);
                if val == 0 {
                    hw.release_cpu();
                }
            }
            CSR_CTXT_INFO_BOOT_CTRL => {
                hw.regs.insert(reg, val);
                if val & CSR_AUTO_FUNC_BOOT_ENA != 0 {
                    hw.release_cpu();
                }
            }
            _ => {
                hw.regs.insert(reg, val);
            }
        }
    }

    fn write_cmd_slot(&self, _index: u16, frame: &[u8]) {
        let Some(hdr) = CmdHeader::parse(frame) else {
            return;
        };
        let payload = frame[CMD_HDR_LEN..].to_vec();
        let mut hw = self.hw.lock();
        if hdr.opcode == opcode::FW_CHUNK_CMD {
            hw.fw_chunks += 1;
            hw.fw_bytes += payload.len().saturating_sub(4);
            if !hw.stall_fw_load {
                hw.pending.push_back(SimEvent::FwWriteDone);
            }
            return;
        }
        hw.cmds.push(SimCmd {
            opcode: hdr.opcode,
            flags: hdr.flags,
            sequence: hdr.sequence,
            payload,
        });
        if hw.silent.contains(&hdr.opcode) {
            return;
        }
        let resp = hw
            .responses
            .get(&hdr.opcode)
            .cloned()
            .unwrap_or_else(|| alloc::vec![0; 4]);
        hw.pending
            .push_back(SimEvent::Rx(RxPacket::encode(hdr.opcode, hdr.sequence, &resp)));
    }

    fn write_tx_slot(&self, txq_id: u8, index: u16, frame: &[u8]) {
        let mut hw = self.hw.lock();
        let payload = frame.get(CMD_HDR_LEN..).unwrap_or(&[]).to_vec();
        hw.tx_frames.push((txq_id, index, payload));
        if hw.tx_silent {
            return;
        }
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&index.wrapping_add(1).to_le_bytes());
        let seq = cmd::queue_to_seq(txq_id) | cmd::index_to_seq(index);
        hw.pending
            .push_back(SimEvent::Rx(RxPacket::encode(opcode::TX_CMD, seq, &data)));
    }

    fn rx_closed_rb_num(&self) -> u16 {
        self.hw.lock().closed
    }

    fn rx_take(&self, index: u16) -> Option<Mbuf> {
        let mut hw = self.hw.lock();
        let mask = hw.rx_ring.len() - 1;
        hw.rx_ring[index as usize & mask].take()
    }

    fn rx_restock(&self, read: u16) {
        self.hw.lock().restocked = read;
    }

    fn reset_rings(&self) {
        let mut hw = self.hw.lock();
        for rb in hw.rx_ring.iter_mut() {
            *rb = None;
        }
        hw.closed = 0;
        hw.restocked = 0;
        hw.fw_chunks = 0;
        hw.pending.clear();
    }
}

// ---- 平台 ----

type Pump = Arc<dyn Fn() -> bool + Send + Sync>;

/// 虚拟时钟平台
pub struct SimPlatform {
    now_us: AtomicU64,
    notifies: AtomicU32,
    pump: Mutex<Option<Pump>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            now_us: AtomicU64::new(0),
            notifies: AtomicU32::new(0),
            pump: Mutex::new(None),
        }
    }

    /// 等待时调用的事件泵；返回 true 表示投递了事件
    pub fn set_pump(&self, pump: Box<dyn Fn() -> bool + Send + Sync>) {
        *self.pump.lock() = Some(Arc::from(pump));
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_us.fetch_add(ms * 1000, Ordering::AcqRel);
    }

    pub fn notifies(&self) -> u32 {
        self.notifies.load(Ordering::Acquire)
    }

    pub fn run_pump(&self) -> bool {
        let pump = self.pump.lock().clone();
        match pump {
            Some(p) => p(),
            None => false,
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn now_ms(&self) -> u64 {
        self.now_us.load(Ordering::Acquire) / 1000
    }

    fn delay_us(&self, us: u32) {
        self.now_us.fetch_add(us as u64, Ordering::AcqRel);
    }

    fn wait_timeout(&self, _ev: WaitEvent, dur: Duration) -> bool {
        if self.run_pump() {
            return false;
        }
        self.now_us
            .fetch_add(dur.as_micros() as u64, Ordering::AcqRel);
        true
    }

    fn notify(&self, _ev: WaitEvent) {
        self.notifies.fetch_add(1, Ordering::AcqRel);
    }
}

/// 把模拟 NIC 的投递接到传输层的中断入口：投递后先跑上半部再跑下半部
pub fn attach_pump(platform: &SimPlatform, nic: &Arc<SimNic>, trans: &Arc<Transport>) {
    let nic = nic.clone();
    let weak: Weak<Transport> = Arc::downgrade(trans);
    platform.set_pump(Box::new(move || {
        let Some(trans) = weak.upgrade() else {
            return false;
        };
        if !nic.deliver_pending() {
            return false;
        }
        if trans.irq_filter().filter() {
            trans.irq_handler();
        }
        true
    }));
}

// ---- op mode ----

/// 记录回调的 op mode
#[derive(Default)]
pub struct SimOpMode {
    rx: Mutex<Vec<u16>>,
    nic_errors: Mutex<Vec<NicError>>,
    rfkill: Mutex<Vec<bool>>,
    queue_events: Mutex<Vec<(u8, bool)>>,
    stop_on_rfkill: AtomicBool,
}

impl SimOpMode {
    pub fn rx_opcodes(&self) -> Vec<u16> {
        self.rx.lock().clone()
    }

    pub fn nic_errors(&self) -> usize {
        self.nic_errors.lock().len()
    }

    pub fn last_nic_error(&self) -> Option<NicError> {
        self.nic_errors.lock().last().copied()
    }

    pub fn rfkill_events(&self) -> Vec<bool> {
        self.rfkill.lock().clone()
    }

    /// (txq, full)
    pub fn queue_events(&self) -> Vec<(u8, bool)> {
        self.queue_events.lock().clone()
    }

    pub fn set_stop_on_rfkill(&self, stop: bool) {
        self.stop_on_rfkill.store(stop, Ordering::Release);
    }
}

impl OpMode for SimOpMode {
    fn rx(&self, _trans: &Transport, pkt: &RxPacket<'_>, _rxb: &Mbuf, _offset: usize) {
        self.rx.lock().push(pkt.opcode);
    }

    fn nic_error(&self, _trans: &Transport, err: NicError) {
        self.nic_errors.lock().push(err);
    }

    fn hw_rf_kill(&self, _trans: &Transport, killed: bool) -> bool {
        self.rfkill.lock().push(killed);
        self.stop_on_rfkill.load(Ordering::Acquire)
    }

    fn queue_full(&self, txq_id: u8) {
        self.queue_events.lock().push((txq_id, true));
    }

    fn queue_not_full(&self, txq_id: u8) {
        self.queue_events.lock().push((txq_id, false));
    }
}

// ---- 组装 ----

/// 一套接好线的模拟环境
pub struct SimBench {
    pub pci: SimPci,
    pub nic: Arc<SimNic>,
    pub platform: Arc<SimPlatform>,
    pub trans: Arc<Transport>,
    pub op_mode: Arc<SimOpMode>,
}

impl SimBench {
    /// 8265（gen1）
    pub fn new() -> Self {
        Self::with_device(0x24FD, TransConfig::default())
    }

    pub fn with_device(device_id: u16, config: TransConfig) -> Self {
        let pci = SimPci::new(crate::cfg::PCI_VENDOR_ID_INTEL, device_id);
        let nic = Arc::new(SimNic::new(config.rx_queue_size));
        let platform = Arc::new(SimPlatform::new());
        let dev = match Device::probe(&pci) {
            Ok(dev) => dev,
            Err(e) => panic!("sim device {:04x} not in table: {:?}", device_id, e),
        };
        dev.enable_pci(&pci);
        let trans = Arc::new(Transport::new(dev, nic.clone(), platform.clone(), config));
        let op_mode = Arc::new(SimOpMode::default());
        trans.set_op_mode(op_mode.clone());
        attach_pump(&platform, &nic, &trans);
        Self {
            pci,
            nic,
            platform,
            trans,
            op_mode,
        }
    }

    /// 已完成启动的 gen1 环境
    pub fn new_running() -> Self {
        let bench = Self::new();
        bench.bring_up();
        bench
    }

    pub fn bring_up(&self) {
        if let Err(e) = self.trans.bring_up(&sim_fw_image()) {
            panic!("sim bring-up failed: {:?}", e);
        }
    }

    /// 投递并处理一批事件
    pub fn pump(&self) -> bool {
        self.platform.run_pump()
    }

    /// 反复投递直到没有事件
    pub fn pump_all(&self) {
        while self.pump() {}
    }
}

impl Default for SimBench {
    fn default() -> Self {
        Self::new()
    }
}
