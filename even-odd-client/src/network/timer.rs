//! 可取消的定时任务句柄

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// 后台任务句柄，drop 时自动取消
#[derive(Debug)]
pub struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    /// 启动后台任务
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    /// 延迟 `delay` 后执行一次 `f`
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    /// 每隔 `period` 执行一次 `f`（首次在一个周期之后）
    pub fn every<F>(period: Duration, mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                f();
            }
        })
    }

    /// 任务是否已结束
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
