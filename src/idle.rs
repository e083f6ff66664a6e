use crate::events::ShellEvent;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};

/// Single-shot inactivity countdown. At most one deadline is outstanding;
/// every reset cancels the previous one before arming again.
///
/// Expiry is reported as [`ShellEvent::IdleExpired`] tagged with the arming
/// generation, so an expiry that was already queued when the timer was reset
/// is recognised as stale and dropped.
pub struct IdleTimer {
    events: UnboundedSender<ShellEvent>,
    handle: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    generation: u64,
}

impl IdleTimer {
    pub fn new(events: UnboundedSender<ShellEvent>) -> Self {
        Self {
            events,
            handle: None,
            deadline: None,
            generation: 0,
        }
    }

    /// Cancels any outstanding deadline, then arms `timeout` if present.
    /// Returns whether a deadline is now armed.
    pub fn reset(&mut self, timeout: Option<Duration>) -> bool {
        self.cancel();
        let Some(timeout) = timeout else {
            return false;
        };

        let generation = self.generation;
        let events = self.events.clone();
        let deadline = Instant::now() + timeout;
        self.deadline = Some(deadline);
        self.handle = Some(tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = events.send(ShellEvent::IdleExpired { generation });
        }));
        true
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.deadline = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Consumes an expiry. True only for the current arming, and only once.
    pub fn take_expiry(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        self.deadline = None;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IdleTimer;
    use crate::events::ShellEvent;
    use tokio::sync::mpsc;
    use tokio::time::{Duration, advance};

    fn expiry(event: ShellEvent) -> u64 {
        match event {
            ShellEvent::IdleExpired { generation } => generation,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        assert!(timer.reset(Some(Duration::from_secs(60))));
        advance(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());

        let generation = expiry(rx.recv().await.expect("expiry"));
        assert!(timer.take_expiry(generation));
        assert!(!timer.take_expiry(generation));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_resets_leave_one_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        for _ in 0..5 {
            timer.reset(Some(Duration::from_secs(30)));
        }
        assert!(timer.is_armed());

        advance(Duration::from_secs(31)).await;
        let generation = expiry(rx.recv().await.expect("expiry"));
        assert!(timer.take_expiry(generation));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "aborted deadlines must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_is_dropped_after_reset() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        timer.reset(Some(Duration::from_secs(10)));
        advance(Duration::from_secs(11)).await;
        let stale = expiry(rx.recv().await.expect("expiry"));

        timer.reset(Some(Duration::from_secs(10)));
        assert!(!timer.take_expiry(stale));
        assert!(timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn no_timeout_disarms() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(tx);

        timer.reset(Some(Duration::from_secs(10)));
        assert!(!timer.reset(None));
        assert!(!timer.is_armed());
        assert!(timer.deadline().is_none());
    }
}
