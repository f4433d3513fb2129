//! iwlwifi PCIe 传输层
//!
//! - [`device`]：PCI function 与芯片配置
//! - [`trans`]：NIC 生命周期状态机与命令提交，[`gen1`]/[`gen2`] 为代际寄存器序列
//! - [`cmd`]：命令帧与命令环槽位
//! - [`irq`]：中断上半部/下半部与 RX 分发
//! - [`tx`]：数据 TX 环

#![no_std]

extern crate alloc;

pub mod cfg;
pub mod cmd;
pub mod config;
pub mod device;
pub mod error;
pub mod fw;
mod gen1;
mod gen2;
pub mod io;
pub mod irq;
pub mod regs;
pub mod rx;
pub mod sync;
pub mod trans;
pub mod tx;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use cfg::{DeviceFamily, IwlCfg, TransGen};
pub use cmd::{CmdFlags, CmdResponse, HostCmd};
pub use config::TransConfig;
pub use device::{Device, PciConfig};
pub use error::{BringUpStage, CmdError, TransError, TransResult};
pub use fw::{FwImage, FwSection, UcodeType};
pub use io::IwlIo;
pub use irq::IrqFilter;
pub use rx::{NicError, OpMode, RxPacket};
pub use sync::{Platform, WaitEvent};
pub use trans::{NicState, TransOps, TransStatus, Transport};
pub use tx::DATA_TXQ_ID;
