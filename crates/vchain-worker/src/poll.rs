//! Backoff ticker driving the status poll loop.

use std::time::Duration;

use tokio::sync::watch;

use crate::config::PollConfig;

/// Outcome of waiting for the next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Time to query status; `attempt` is 1-based
    Ready { attempt: u32 },
    /// Every allowed attempt has been used
    Exhausted { attempts: u32 },
    /// The cancel channel fired
    Cancelled,
}

/// Sleeps between status queries, growing the interval by the backoff
/// factor after each tick until the cap.
#[derive(Debug)]
pub struct PollTicker {
    config: PollConfig,
    next_delay: Duration,
    attempts: u32,
    cancel: Option<watch::Receiver<bool>>,
}

impl PollTicker {
    pub fn new(config: PollConfig) -> Self {
        Self {
            next_delay: config.initial_interval.min(config.max_interval),
            config,
            attempts: 0,
            cancel: None,
        }
    }

    /// Stop ticking once `cancel` becomes `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Delay before the next tick.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Wait for the next poll slot.
    pub async fn tick(&mut self) -> Tick {
        if self.is_cancelled() {
            return Tick::Cancelled;
        }
        if self.attempts >= self.config.max_attempts {
            return Tick::Exhausted {
                attempts: self.attempts,
            };
        }

        let sleep = tokio::time::sleep(self.next_delay);
        tokio::pin!(sleep);

        loop {
            let Some(rx) = self.cancel.as_mut() else {
                (&mut sleep).await;
                break;
            };
            let mut closed = false;
            tokio::select! {
                _ = &mut sleep => break,
                changed = rx.changed() => match changed {
                    Ok(()) if *rx.borrow() => return Tick::Cancelled,
                    Ok(()) => {}
                    // Sender gone: nobody can cancel any more
                    Err(_) => closed = true,
                },
            }
            if closed {
                self.cancel = None;
            }
        }

        self.attempts += 1;
        self.next_delay = self
            .next_delay
            .mul_f64(self.config.backoff_factor)
            .min(self.config.max_interval);
        Tick::Ready {
            attempt: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_secs(10),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(60),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_to_cap() {
        let mut ticker = PollTicker::new(config(10));
        let mut delays = Vec::new();
        for _ in 0..7 {
            delays.push(ticker.next_delay().as_millis());
            assert!(matches!(ticker.tick().await, Tick::Ready { .. }));
        }
        assert_eq!(delays, vec![10_000, 15_000, 22_500, 33_750, 50_625, 60_000, 60_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_sleep_on_the_clock() {
        let start = tokio::time::Instant::now();
        let mut ticker = PollTicker::new(config(3));
        ticker.tick().await;
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let mut ticker = PollTicker::new(config(2));
        assert_eq!(ticker.tick().await, Tick::Ready { attempt: 1 });
        assert_eq!(ticker.tick().await, Tick::Ready { attempt: 2 });
        assert_eq!(ticker.tick().await, Tick::Exhausted { attempts: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let (tx, rx) = watch::channel(false);
        let mut ticker = PollTicker::new(config(5)).with_cancel(rx);

        let handle = tokio::spawn(async move { ticker.tick().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), Tick::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_cancel_sender_keeps_ticking() {
        let (tx, rx) = watch::channel(false);
        let mut ticker = PollTicker::new(config(5)).with_cancel(rx);
        drop(tx);
        assert_eq!(ticker.tick().await, Tick::Ready { attempt: 1 });
    }
}
