use std::sync::mpsc::Sender;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::state::{Event, RefreshSchedule};

/// Background ticker behind auto-refresh. At most one task is alive and it
/// always belongs to the schedule it was armed with.
#[derive(Default)]
pub struct RefreshTimer {
    armed: Option<(RefreshSchedule, JoinHandle<()>)>,
}

impl RefreshTimer {
    /// Re-arms when `schedule` differs from the armed one and cancels when
    /// it is `None`.
    pub fn sync(&mut self, schedule: Option<RefreshSchedule>, handle: &Handle, tx: &Sender<Event>) {
        if self.armed.as_ref().map(|(armed, _)| armed) == schedule.as_ref() {
            return;
        }
        self.cancel();
        let Some(schedule) = schedule else {
            return;
        };

        let period = Duration::from_secs(schedule.seconds.max(1));
        let tx = tx.clone();
        let task = handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(Event::AutoRefreshTick).is_err() {
                    break;
                }
            }
        });
        tracing::debug!(app_id = %schedule.app_id, seconds = schedule.seconds, "auto-refresh armed");
        self.armed = Some((schedule, task));
    }

    pub fn cancel(&mut self) {
        if let Some((schedule, task)) = self.armed.take() {
            task.abort();
            tracing::debug!(app_id = %schedule.app_id, "auto-refresh cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
