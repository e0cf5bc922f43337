//! 帧时钟模块
//!
//! 基于高精度计数器计算帧间隔与总运行时间，支持暂停。
//!
//! # 状态
//!
//! 时钟只有两个状态：运行（Running）和停止（Stopped）。
//!
//! - 运行中调用 `stop()` 记录停止时刻；停止状态下再次调用不产生任何效果
//! - 停止中调用 `start()` 把暂停区间累加进暂停时间，然后恢复运行
//! - `total_time()` 只统计未暂停的墙钟时间
//!
//! 计数器通过 `CounterSource` 注入，测试可以使用 `ManualCounter` 精确控制时间。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 高精度计数器
pub trait CounterSource {
    /// 当前计数值
    fn ticks(&self) -> i64;

    /// 每秒计数
    fn ticks_per_second(&self) -> i64;
}

/// 基于 `Instant` 的系统计数器，精度为纳秒
pub struct SystemCounter {
    origin: Instant,
}

impl SystemCounter {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for SystemCounter {
    fn ticks(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }

    fn ticks_per_second(&self) -> i64 {
        1_000_000_000
    }
}

/// 手动推进的计数器
///
/// 克隆出的句柄共享同一个计数值。允许把时间往回拨，
/// 用来模拟处理器切换导致的负帧间隔。
#[derive(Debug, Clone)]
pub struct ManualCounter {
    ticks: Arc<AtomicI64>,
    ticks_per_second: i64,
}

impl ManualCounter {
    pub fn new(ticks_per_second: i64) -> Self {
        Self {
            ticks: Arc::new(AtomicI64::new(0)),
            ticks_per_second,
        }
    }

    pub fn set(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::Release);
    }

    pub fn advance(&self, ticks: i64) {
        self.ticks.fetch_add(ticks, Ordering::AcqRel);
    }
}

impl CounterSource for ManualCounter {
    fn ticks(&self) -> i64 {
        self.ticks.load(Ordering::Acquire)
    }

    fn ticks_per_second(&self) -> i64 {
        self.ticks_per_second
    }
}

/// 帧时钟
pub struct FrameClock {
    source: Box<dyn CounterSource>,
    seconds_per_tick: f64,
    delta_time: f64,

    base_time: i64,
    paused_time: i64,
    stop_time: i64,
    prev_time: i64,
    curr_time: i64,

    stopped: bool,
}

impl FrameClock {
    /// 使用系统计数器创建时钟
    pub fn new() -> Self {
        Self::with_source(Box::new(SystemCounter::new()))
    }

    /// 使用指定计数器创建时钟，创建后立即处于运行状态
    pub fn with_source(source: Box<dyn CounterSource>) -> Self {
        let seconds_per_tick = 1.0 / source.ticks_per_second() as f64;
        let now = source.ticks();
        Self {
            source,
            seconds_per_tick,
            delta_time: 0.0,
            base_time: now,
            paused_time: 0,
            stop_time: 0,
            prev_time: now,
            curr_time: now,
            stopped: false,
        }
    }

    /// 未暂停的总运行时间（秒）
    pub fn total_time(&self) -> f32 {
        let end = if self.stopped { self.stop_time } else { self.curr_time };
        (((end - self.paused_time) - self.base_time) as f64 * self.seconds_per_tick) as f32
    }

    /// 上一次 `tick()` 计算出的帧间隔（秒）
    pub fn delta_time(&self) -> f32 {
        self.delta_time as f32
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 以当前时刻为基准重新开始计时
    pub fn reset(&mut self) {
        let now = self.source.ticks();
        self.base_time = now;
        self.prev_time = now;
        self.curr_time = now;
        self.paused_time = 0;
        self.stop_time = 0;
        self.stopped = false;
    }

    /// 从停止状态恢复
    pub fn start(&mut self) {
        if self.stopped {
            let start_time = self.source.ticks();
            self.paused_time += start_time - self.stop_time;
            self.prev_time = start_time;
            self.stop_time = 0;
            self.stopped = false;
        }
    }

    /// 暂停计时
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stop_time = self.source.ticks();
            self.stopped = true;
        }
    }

    /// 采样计数器并更新帧间隔
    pub fn tick(&mut self) {
        if self.stopped {
            self.delta_time = 0.0;
            return;
        }

        self.curr_time = self.source.ticks();
        self.delta_time = (self.curr_time - self.prev_time) as f64 * self.seconds_per_tick;
        self.prev_time = self.curr_time;

        // 省电模式或线程被调度到另一个核心时，计数差可能为负
        if self.delta_time < 0.0 {
            self.delta_time = 0.0;
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次帧统计结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStatsSample {
    /// 每秒帧数
    pub fps: f32,
    /// 每帧毫秒数
    pub mspf: f32,
}

/// 帧统计
///
/// 每经过一秒总时间输出一次平均帧率。
#[derive(Debug, Default)]
pub struct FrameStats {
    frame_count: u32,
    time_elapsed: f32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧；满一秒时返回统计结果
    pub fn record(&mut self, total_time: f32) -> Option<FrameStatsSample> {
        self.frame_count += 1;

        if total_time - self.time_elapsed < 1.0 {
            return None;
        }

        let fps = self.frame_count as f32;
        let sample = FrameStatsSample { fps, mspf: 1000.0 / fps };

        self.frame_count = 0;
        self.time_elapsed += 1.0;
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TPS: i64 = 1000;

    fn manual_clock() -> (FrameClock, ManualCounter) {
        let counter = ManualCounter::new(TPS);
        let clock = FrameClock::with_source(Box::new(counter.clone()));
        (clock, counter)
    }

    #[test]
    fn test_tick_computes_delta() {
        let (mut clock, counter) = manual_clock();
        counter.advance(16);
        clock.tick();
        assert!((clock.delta_time() - 0.016).abs() < 1e-6);
        assert!((clock.total_time() - 0.016).abs() < 1e-6);
    }

    #[test]
    fn test_negative_delta_is_clamped() {
        let (mut clock, counter) = manual_clock();
        counter.set(100);
        clock.tick();
        counter.set(90);
        clock.tick();
        assert_eq!(clock.delta_time(), 0.0);
    }

    #[test]
    fn test_paused_time_is_excluded() {
        let (mut clock, counter) = manual_clock();
        counter.set(1000);
        clock.tick();
        clock.stop();

        counter.set(5000);
        clock.tick();
        assert_eq!(clock.delta_time(), 0.0);
        assert!((clock.total_time() - 1.0).abs() < 1e-6);

        clock.start();
        counter.set(6000);
        clock.tick();
        assert!((clock.total_time() - 2.0).abs() < 1e-6);
        assert!((clock.delta_time() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stop_twice_is_idempotent() {
        let (mut clock, counter) = manual_clock();
        counter.set(1000);
        clock.tick();

        clock.stop();
        counter.set(3000);
        clock.stop();
        assert!((clock.total_time() - 1.0).abs() < 1e-6);

        clock.start();
        counter.set(4000);
        clock.tick();
        assert!((clock.total_time() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let (mut clock, counter) = manual_clock();
        counter.set(500);
        clock.start();
        clock.tick();
        assert!((clock.total_time() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_reset_rebases() {
        let (mut clock, counter) = manual_clock();
        counter.set(2000);
        clock.tick();
        clock.reset();
        counter.set(2250);
        clock.tick();
        assert!((clock.total_time() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_frame_stats() {
        let mut stats = FrameStats::new();
        for i in 0..59 {
            assert!(stats.record(i as f32 / 60.0).is_none());
        }
        let sample = stats.record(1.0).unwrap();
        assert_eq!(sample.fps, 60.0);
        assert!((sample.mspf - 1000.0 / 60.0).abs() < 1e-4);
        assert!(stats.record(1.01).is_none());
    }
}
