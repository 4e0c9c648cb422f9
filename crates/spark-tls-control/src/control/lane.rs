use std::collections::VecDeque;

use parking_lot::Mutex;

type Resume = Box<dyn FnOnce() + Send + 'static>;

/// [`WriteLane::acquire`] 的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneAdmission {
    /// 立即获得写通道，调用方应在当前调用栈内开始写入。
    Granted,
    /// 写通道被占用，恢复闭包已排队，将在前一持有者释放时被调用。
    Queued,
}

/// 传输层的单一写通道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 控制消息与应用数据共用同一条底层流，任意时刻只允许一个写者；控制操作发现通道被占用时
///   不应失败，而是排队等待传输就绪（区别于控制操作之间的嵌套检测）。
///
/// ## 逻辑（How）
/// - `busy` 标志与等待队列由同一把互斥锁保护；
/// - [`release`](Self::release) 在有等待者时直接把所有权移交给队首，`busy` 保持为真，
///   恢复闭包在锁外、释放者的线程上执行。
///
/// ## 风险与权衡（Trade-offs）
/// - 恢复闭包若同步完成并再次释放，会在同一调用栈上唤醒下一个等待者；队列很短时可以接受。
#[derive(Default)]
pub struct WriteLane {
    state: Mutex<LaneState>,
}

#[derive(Default)]
struct LaneState {
    busy: bool,
    waiters: VecDeque<Resume>,
}

impl WriteLane {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取写通道；被占用时排队 `resume`，获得所有权时调用它。
    pub fn acquire<F>(&self, resume: F) -> LaneAdmission
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.busy {
            state.waiters.push_back(Box::new(resume));
            LaneAdmission::Queued
        } else {
            state.busy = true;
            LaneAdmission::Granted
        }
    }

    /// 非排队的获取尝试，供应用数据写者使用。
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        !core::mem::replace(&mut state.busy, true)
    }

    /// 释放写通道；有等待者时把所有权交给队首。
    pub fn release(&self) {
        let next = {
            let mut state = self.state.lock();
            let next = state.waiters.pop_front();
            if next.is_none() {
                state.busy = false;
            }
            next
        };
        if let Some(resume) = next {
            resume();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl core::fmt::Debug for WriteLane {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WriteLane")
            .field("busy", &state.busy)
            .field("queued", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn ownership_is_handed_to_waiters_in_fifo_order() {
        let lane = Arc::new(WriteLane::new());
        assert!(lane.try_acquire());
        assert!(!lane.try_acquire());

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let resumed = Arc::new(AtomicUsize::new(0));
        for tag in 0..3 {
            let order = Arc::clone(&order);
            let resumed = Arc::clone(&resumed);
            let admission = lane.acquire(move || {
                order.lock().push(tag);
                resumed.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(admission, LaneAdmission::Queued);
        }
        assert_eq!(lane.queued(), 3);

        for expected in 1..=3 {
            lane.release();
            assert_eq!(resumed.load(Ordering::SeqCst), expected);
            assert!(lane.is_busy(), "移交后通道仍被新持有者占用");
        }
        lane.release();
        assert!(!lane.is_busy());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn free_lane_is_granted_without_running_resume() {
        let lane = WriteLane::new();
        let admission = lane.acquire(|| panic!("获得通道时不得调用恢复闭包"));
        assert_eq!(admission, LaneAdmission::Granted);
        assert!(lane.is_busy());
    }
}
