//! Transport-level liveness probing.
//!
//! Each tick first checks that the previous probe was answered, then clears
//! the flag and asks for a new probe. A connection that stays silent for a
//! whole period is reported dead, which catches half-open sockets the
//! transport never reports as closed.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping frame now.
    Probe,
    /// The last probe went unanswered. The monitor has stopped itself.
    Dead,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Duration,
    is_alive: bool,
    interval: Option<Interval>,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            is_alive: false,
            interval: None,
        }
    }

    /// Arm the periodic timer. The first tick lands one period from now.
    /// Restarting replaces any running interval.
    pub fn start(&mut self) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.is_alive = true;
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&mut self) {
        self.interval = None;
        self.is_alive = false;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    /// Record a probe response from the transport.
    pub fn on_pong(&mut self) {
        if self.is_running() {
            self.is_alive = true;
        }
    }

    /// Wait for the next tick and evaluate it. Pends forever while stopped.
    pub async fn tick(&mut self) -> Beat {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
        self.evaluate()
    }

    fn evaluate(&mut self) -> Beat {
        if !self.is_alive {
            self.stop();
            return Beat::Dead;
        }
        self.is_alive = false;
        Beat::Probe
    }
}
