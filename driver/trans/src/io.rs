//! 设备访问接口
//!
//! MMIO 与 DMA 环的物理操作由宿主实现；传输层只维护环的读写指针与槽位元数据。

use mbuf::Mbuf;

/// 一个 NIC 的寄存器空间与 DMA 环
pub trait IwlIo: Send + Sync {
    fn read32(&self, reg: u32) -> u32;

    fn write32(&self, reg: u32, val: u32);

    /// 把序列化好的命令帧写入命令环 `index` 槽并推进写指针（HBUS_TARG_WRPTR）
    fn write_cmd_slot(&self, index: u16, frame: &[u8]);

    /// 把数据帧写入数据 TX 环 `txq_id` 的 `index` 槽并推进写指针
    fn write_tx_slot(&self, txq_id: u8, index: u16, frame: &[u8]);

    /// 硬件已关闭（DMA 写完）的最新 RB 序号（closed_rb_num）
    fn rx_closed_rb_num(&self) -> u16;

    /// 取走 RX 环 `index` 处的 RB 内容；空槽返回 None
    fn rx_take(&self, index: u16) -> Option<Mbuf>;

    /// 归还 RB 并把读指针告知硬件（restock）
    fn rx_restock(&self, read: u16);

    /// 复位全部 DMA 环（rx_init/tx_init）
    fn reset_rings(&self);
}

/// 经 HBUS 窗口读 PRPH 寄存器
pub fn read_prph(io: &dyn IwlIo, addr: u32) -> u32 {
    use crate::regs::*;
    io.write32(HBUS_TARG_PRPH_RADDR, (addr & PRPH_ADDR_MASK) | (3 << 24));
    io.read32(HBUS_TARG_PRPH_RDAT)
}

/// 经 HBUS 窗口写 PRPH 寄存器
pub fn write_prph(io: &dyn IwlIo, addr: u32, val: u32) {
    use crate::regs::*;
    io.write32(HBUS_TARG_PRPH_WADDR, (addr & PRPH_ADDR_MASK) | (3 << 24));
    io.write32(HBUS_TARG_PRPH_WDAT, val);
}
