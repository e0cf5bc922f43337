//! 脏计数器
//!
//! 每个帧资源槽位都有一份独立的常量缓冲区，一次数据修改必须写入全部 N 份副本。
//! 修改时把计数器置为 N，每帧访问一次减一，直到归零。

/// 多帧传播的脏计数器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyCounter {
    remaining: u32,
    frames: u32,
}

impl DirtyCounter {
    /// 创建计数器，初始为脏，保证首次写入所有槽位
    pub fn new(frame_resource_count: usize) -> Self {
        let frames = frame_resource_count as u32;
        Self { remaining: frames, frames }
    }

    /// 数据已修改，需要重新写入全部槽位
    pub fn mark(&mut self) {
        self.remaining = self.frames;
    }

    pub fn is_dirty(&self) -> bool {
        self.remaining > 0
    }

    /// 还有多少个槽位没有拿到最新数据
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// 当前槽位是否需要写入；需要时计数减一
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}
