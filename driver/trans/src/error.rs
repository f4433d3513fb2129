//! 传输层错误
//!
//! 每个错误都能给出 Linux 负 errno（`errno()`），并可转换为 `AxError` 供外壳的 `AxResult` 接口使用。

use axerrno::AxError;

use crate::trans::NicState;

/// Linux errno（取正值，调用方取负）
pub mod errno {
    pub const EIO: i32 = 5;
    pub const ENOEXEC: i32 = 8;
    pub const EBUSY: i32 = 16;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const ESHUTDOWN: i32 = 108;
    pub const ETIMEDOUT: i32 = 110;
    pub const ERFKILL: i32 = 132;
}

/// 命令提交错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdError {
    /// 命令环已满，调用方重试或丢弃
    QueueFull,
    /// 固件在超时窗口内未应答；传输层已进入待恢复状态
    CmdTimeout,
    /// 已有一条同步命令在途
    SyncBusy,
    /// 设备正在停止或已停止
    ShuttingDown,
    /// 设备尚未进入 Running
    NotRunning,
    /// 射频被硬件开关关闭
    HwRfKilled,
    /// 之前的命令超时或固件出错，需完整重启后才接受新命令
    RecoveryPending,
    /// 载荷超过命令槽容量
    PayloadTooLarge,
}

impl CmdError {
    pub const fn errno(self) -> i32 {
        -(match self {
            CmdError::QueueFull => errno::ENOSPC,
            CmdError::CmdTimeout => errno::ETIMEDOUT,
            CmdError::SyncBusy => errno::EBUSY,
            CmdError::ShuttingDown => errno::ESHUTDOWN,
            CmdError::NotRunning | CmdError::RecoveryPending => errno::EIO,
            CmdError::HwRfKilled => errno::ERFKILL,
            CmdError::PayloadTooLarge => errno::EINVAL,
        })
    }
}

impl From<CmdError> for AxError {
    fn from(e: CmdError) -> Self {
        match e {
            CmdError::QueueFull => AxError::WouldBlock,
            CmdError::SyncBusy => AxError::ResourceBusy,
            CmdError::PayloadTooLarge => AxError::InvalidInput,
            CmdError::HwRfKilled => AxError::PermissionDenied,
            CmdError::CmdTimeout => AxError::TimedOut,
            CmdError::ShuttingDown
            | CmdError::NotRunning
            | CmdError::RecoveryPending => AxError::BadState,
        }
    }
}

/// 启动阶梯上失败的那一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpStage {
    Apm,
    NicInit,
    FirmwareLoad,
    Alive,
    Running,
}

/// 传输层生命周期错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransError {
    HwRfKilled,
    BringUpFailed(BringUpStage),
    /// 当前状态不允许该操作
    InvalidState(NicState),
    /// 非 Intel 或不在芯片表中的设备 ID
    UnsupportedDevice(u16),
    /// 固件文件格式错误
    FirmwareImage,
    Cmd(CmdError),
}

impl TransError {
    pub const fn errno(self) -> i32 {
        match self {
            TransError::HwRfKilled => -errno::ERFKILL,
            TransError::BringUpFailed(_) => -errno::EIO,
            TransError::InvalidState(_) => -errno::EINVAL,
            TransError::UnsupportedDevice(_) => -errno::ENODEV,
            TransError::FirmwareImage => -errno::ENOEXEC,
            TransError::Cmd(e) => e.errno(),
        }
    }
}

impl From<CmdError> for TransError {
    fn from(e: CmdError) -> Self {
        match e {
            CmdError::HwRfKilled => TransError::HwRfKilled,
            e => TransError::Cmd(e),
        }
    }
}

impl From<TransError> for AxError {
    fn from(e: TransError) -> Self {
        match e {
            TransError::HwRfKilled => AxError::PermissionDenied,
            TransError::BringUpFailed(_) => AxError::Io,
            TransError::InvalidState(_) => AxError::BadState,
            TransError::UnsupportedDevice(_) => AxError::Unsupported,
            TransError::FirmwareImage => AxError::InvalidData,
            TransError::Cmd(e) => e.into(),
        }
    }
}

pub type TransResult<T = ()> = Result<T, TransError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values() {
        assert_eq!(CmdError::CmdTimeout.errno(), -110);
        assert_eq!(CmdError::QueueFull.errno(), -28);
        assert_eq!(TransError::Cmd(CmdError::SyncBusy).errno(), -16);
        assert_eq!(TransError::UnsupportedDevice(0x1234).errno(), -19);
    }

    #[test]
    fn timeout_keeps_its_kind_through_axerror() {
        assert_eq!(AxError::from(CmdError::CmdTimeout), AxError::TimedOut);
        assert_eq!(
            AxError::from(TransError::Cmd(CmdError::CmdTimeout)),
            AxError::TimedOut
        );
        assert_eq!(AxError::from(CmdError::ShuttingDown), AxError::BadState);
    }

    #[test]
    fn rfkill_is_not_wrapped() {
        assert_eq!(TransError::from(CmdError::HwRfKilled), TransError::HwRfKilled);
        assert_eq!(
            AxError::from(TransError::from(CmdError::QueueFull)),
            AxError::WouldBlock
        );
    }
}
