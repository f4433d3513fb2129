//! 平台同步原语
//!
//! 驱动不直接依赖宿主的调度器：时钟、微秒延时与等待队列由宿主实现 [`Platform`] 提供。
//! 等待语义与 `WaitQueue::wait_timeout` 一致：超时返回 true，被唤醒返回 false。
//! 唤醒可能丢失（唤醒发生在检查条件之后、进入等待之前），调用方必须按短片循环等待并重查条件。

use core::time::Duration;

/// 驱动使用的等待队列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// 同步命令的响应到达
    CmdDone,
    /// 一块固件写入完成（FH_TX）
    UcodeWrite,
    /// 固件 ALIVE
    FwAlive,
    /// 一轮中断下半部处理完成
    RxSync,
}

/// 宿主平台
pub trait Platform: Send + Sync {
    /// 单调时钟（ms）
    fn now_ms(&self) -> u64;

    /// 忙等延时，仅用于寄存器轮询
    fn delay_us(&self, us: u32);

    /// 在 `ev` 上阻塞至多 `dur`。超时返回 true。
    fn wait_timeout(&self, ev: WaitEvent, dur: Duration) -> bool;

    /// 唤醒 `ev` 上的全部等待者
    fn notify(&self, ev: WaitEvent);
}

/// 按片等待直到 `cond()` 成立或 `timeout_ms` 用尽。成立返回 true。
///
/// 每片最长 `slice_ms`，片内被唤醒后立即重查。
pub fn wait_until(
    platform: &dyn Platform,
    ev: WaitEvent,
    timeout_ms: u32,
    slice_ms: u32,
    mut cond: impl FnMut() -> bool,
) -> bool {
    let start = platform.now_ms();
    loop {
        if cond() {
            return true;
        }
        let waited = platform.now_ms().saturating_sub(start);
        if waited >= timeout_ms as u64 {
            return cond();
        }
        let slice = (timeout_ms as u64 - waited).min(slice_ms.max(1) as u64);
        platform.wait_timeout(ev, Duration::from_millis(slice));
    }
}
