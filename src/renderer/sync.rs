//! GPU 同步机制模块
//!
//! CPU-GPU 同步只依赖一个 fence：
//!
//! - CPU 侧维护严格递增的当前值（`current_value`）
//! - GPU 在执行完之前排入的全部命令后，把 signal 的值写入完成值（`completed_value`）
//! - 完成值单调不减，并且始终不大于当前值
//!
//! 后端只需要实现 `GpuFence`：排入 signal、读取完成值、阻塞等待。
//! `GpuTimeline` 在其之上维护 CPU 侧计数器和等待策略，
//! 作为单一的拥有者对象按引用传给需要 signal 或等待的组件。

use std::time::Duration;
use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};

/// Fence 值
///
/// 0 表示"从未 signal 过"，对应尚未使用过的帧资源。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 初始值
    pub const ZERO: FenceValue = FenceValue(0);

    /// 创建新的Fence值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// 是否从未被使用
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Fence 等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// 一直等待，GPU 挂起时 CPU 也随之挂起
    Infinite,
    /// 超过时限视为设备丢失
    Timeout(Duration),
}

impl WaitPolicy {
    /// 由配置中的毫秒数构造
    pub fn from_timeout_ms(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => WaitPolicy::Timeout(Duration::from_millis(ms)),
            None => WaitPolicy::Infinite,
        }
    }
}

/// 后端提供的 fence 原语
pub trait GpuFence {
    /// 在命令队列上排入一个 signal
    ///
    /// GPU 执行完此前排入的全部命令后才会写入该值。
    fn signal(&self, value: FenceValue) -> Result<()>;

    /// GPU 已完成的值
    fn completed_value(&self) -> FenceValue;

    /// 阻塞当前线程直到完成值不小于 `value`
    ///
    /// `timeout` 为 `None` 时无限等待；超时返回 `Ok(false)`。
    fn wait_for(&self, value: FenceValue, timeout: Option<Duration>) -> Result<bool>;
}

/// GPU 时间线
///
/// 拥有后端 fence 和 CPU 侧计数器。第 k 次 `advance` 产生值 k（从 1 开始）。
pub struct GpuTimeline<F: GpuFence> {
    fence: F,
    current: FenceValue,
    policy: WaitPolicy,
    stalls: u64,
}

impl<F: GpuFence> GpuTimeline<F> {
    /// 创建新的时间线，计数器从 0 开始
    pub fn new(fence: F, policy: WaitPolicy) -> Self {
        Self {
            fence,
            current: FenceValue::ZERO,
            policy,
            stalls: 0,
        }
    }

    /// CPU 侧当前值
    pub fn current_value(&self) -> FenceValue {
        self.current
    }

    /// GPU 已完成的值
    pub fn completed_value(&self) -> FenceValue {
        self.fence.completed_value()
    }

    /// 指定值对应的工作是否已经完成
    ///
    /// 值 0 从未被 signal，视为已完成。
    pub fn is_completed(&self, value: FenceValue) -> bool {
        value.is_zero() || self.completed_value() >= value
    }

    /// 递增 CPU 侧计数器并在 GPU 时间线上 signal 新值
    pub fn advance(&mut self) -> Result<FenceValue> {
        let value = self.current.next();
        self.fence.signal(value)?;
        self.current = value;
        trace!(fence_value = value.value(), "Fence signaled");
        Ok(value)
    }

    /// 阻塞直到 GPU 到达指定值
    pub fn wait_until(&mut self, value: FenceValue) -> Result<()> {
        if self.is_completed(value) {
            return Ok(());
        }

        let completed = self.completed_value();
        debug!(
            fence_value = value.value(),
            completed = completed.value(),
            "Waiting for GPU"
        );
        self.stalls += 1;

        match self.policy {
            WaitPolicy::Infinite => {
                self.fence.wait_for(value, None)?;
            }
            WaitPolicy::Timeout(timeout) => {
                if !self.fence.wait_for(value, Some(timeout))? {
                    return Err(GraphicsError::DeviceLost {
                        waited_for: value.value(),
                        completed: self.completed_value().value(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .into());
                }
            }
        }

        debug!(fence_value = value.value(), "GPU wait completed");
        Ok(())
    }

    /// 刷新命令队列：signal 一个新值并等待它完成
    ///
    /// 用于初始化之后以及销毁、重建资源之前。
    pub fn flush(&mut self) -> Result<FenceValue> {
        let value = self.advance()?;
        self.wait_until(value)?;
        debug!(fence_value = value.value(), "Command queue flushed");
        Ok(value)
    }

    /// CPU 因等待 GPU 而阻塞的次数
    pub fn stall_count(&self) -> u64 {
        self.stalls
    }

    /// 后端 fence
    pub fn fence(&self) -> &F {
        &self.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// 只有在等待时才推进的 fence
    #[derive(Default)]
    struct LazyFence {
        pending: RefCell<VecDeque<u64>>,
        completed: RefCell<u64>,
        stuck: bool,
    }

    impl GpuFence for LazyFence {
        fn signal(&self, value: FenceValue) -> Result<()> {
            self.pending.borrow_mut().push_back(value.value());
            Ok(())
        }

        fn completed_value(&self) -> FenceValue {
            FenceValue::new(*self.completed.borrow())
        }

        fn wait_for(&self, value: FenceValue, _timeout: Option<Duration>) -> Result<bool> {
            if self.stuck {
                return Ok(false);
            }
            let mut pending = self.pending.borrow_mut();
            while *self.completed.borrow() < value.value() {
                match pending.pop_front() {
                    Some(v) => *self.completed.borrow_mut() = v,
                    None => return Ok(false),
                }
            }
            Ok(true)
        }
    }

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::ZERO.is_zero());
        assert!(FenceValue::new(1) < FenceValue::new(2));
    }

    #[test]
    fn test_advance_is_strictly_increasing() {
        let mut timeline = GpuTimeline::new(LazyFence::default(), WaitPolicy::Infinite);
        for k in 1..=5 {
            assert_eq!(timeline.advance().unwrap(), FenceValue::new(k));
        }
        assert_eq!(timeline.current_value().value(), 5);
        assert_eq!(timeline.completed_value().value(), 0);
        assert!(timeline.completed_value() <= timeline.current_value());
    }

    #[test]
    fn test_wait_until() {
        let mut timeline = GpuTimeline::new(LazyFence::default(), WaitPolicy::Infinite);
        let v1 = timeline.advance().unwrap();
        let v2 = timeline.advance().unwrap();

        assert!(timeline.is_completed(FenceValue::ZERO));
        assert!(!timeline.is_completed(v1));

        timeline.wait_until(v1).unwrap();
        assert!(timeline.is_completed(v1));
        assert!(!timeline.is_completed(v2));
        assert_eq!(timeline.stall_count(), 1);

        // 已完成的值不会再次阻塞
        timeline.wait_until(v1).unwrap();
        assert_eq!(timeline.stall_count(), 1);
    }

    #[test]
    fn test_flush_waits_for_everything() {
        let mut timeline = GpuTimeline::new(LazyFence::default(), WaitPolicy::Infinite);
        timeline.advance().unwrap();
        timeline.advance().unwrap();
        let flushed = timeline.flush().unwrap();
        assert_eq!(flushed.value(), 3);
        assert_eq!(timeline.completed_value(), timeline.current_value());
    }

    #[test]
    fn test_timeout_reports_device_lost() {
        let fence = LazyFence { stuck: true, ..Default::default() };
        let mut timeline = GpuTimeline::new(fence, WaitPolicy::from_timeout_ms(Some(5)));
        let v = timeline.advance().unwrap();

        let err = timeline.wait_until(v).unwrap_err();
        assert!(matches!(
            err,
            crate::core::DxLearnError::Graphics(GraphicsError::DeviceLost { waited_for: 1, completed: 0, timeout_ms: 5 })
        ));
    }
}
