use log::{debug, info};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Drives periodic background jobs on the current tokio runtime.
pub struct TaskRunner {
    handle: Handle,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        TaskRunner {
            handle: Handle::current(),
        }
    }

    /// Runs `task` every `every`, starting immediately. A run that outlasts
    /// the period delays the next one rather than overlapping it.
    pub fn run_task<F, R>(
        &self,
        name: &'static str,
        every: time::Duration,
        mut task: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> R + Send + 'static,
        R: std::future::Future<Output = ()> + Send + 'static,
    {
        info!("Scheduling {} every {}s", name, every.as_secs());

        self.handle.spawn(async move {
            let mut interval = time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                debug!("Running {}", name);
                task().await;
            }
        })
    }
}
