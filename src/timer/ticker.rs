//! Background countdown. Owns nothing but its own copy of the remaining
//! seconds; talks to the engine only through [`TickerCommand`] and
//! [`TickerEvent`].

use std::time::Duration;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{log_debug, log_warn};

const ENABLE_LOGS: bool = false;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickerCommand {
    Start {
        run_id: u64,
        time_left: u64,
        interval: Duration,
    },
    Stop,
}

/// `run_id` echoes the `Start` that produced the event so the engine can
/// drop anything emitted by a run it has since stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickerEvent {
    Tick { run_id: u64, time_left: u64 },
    Complete { run_id: u64 },
}

struct Countdown {
    run_id: u64,
    time_left: u64,
    interval: Interval,
}

impl Countdown {
    fn new(run_id: u64, time_left: u64, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        // A suspended host resumes where it left off; missed seconds are not
        // replayed.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            run_id,
            time_left,
            interval,
        }
    }
}

#[derive(Clone)]
pub(crate) struct TickerHandle {
    commands: mpsc::UnboundedSender<TickerCommand>,
}

impl TickerHandle {
    pub(crate) fn start(&self, run_id: u64, time_left: u64, interval: Duration) {
        self.send(TickerCommand::Start {
            run_id,
            time_left,
            interval,
        });
    }

    pub(crate) fn stop(&self) {
        self.send(TickerCommand::Stop);
    }

    fn send(&self, command: TickerCommand) {
        if self.commands.send(command).is_err() {
            log_warn!("Ticker is gone; dropped {command:?}");
        }
    }
}

pub(crate) fn spawn_ticker(
    events: mpsc::UnboundedSender<TickerEvent>,
    cancel: CancellationToken,
) -> (TickerHandle, JoinHandle<()>) {
    let (commands_tx, mut commands) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut active: Option<Countdown> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(TickerCommand::Start { run_id, time_left, interval }) => {
                        log_debug!("ticker run {run_id} started at {time_left}s");
                        active = Some(Countdown::new(run_id, time_left, interval));
                    }
                    Some(TickerCommand::Stop) => {
                        if let Some(countdown) = active.take() {
                            log_debug!("ticker run {} stopped", countdown.run_id);
                        }
                    }
                    None => break,
                },
                _ = next_tick(&mut active) => {
                    let Some(countdown) = active.as_mut() else { continue };
                    countdown.time_left = countdown.time_left.saturating_sub(1);
                    let run_id = countdown.run_id;

                    let event = if countdown.time_left == 0 {
                        active = None;
                        TickerEvent::Complete { run_id }
                    } else {
                        TickerEvent::Tick { run_id, time_left: countdown.time_left }
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
            }
        }

        log_debug!("ticker exiting");
    });

    (
        TickerHandle {
            commands: commands_tx,
        },
        handle,
    )
}

async fn next_tick(active: &mut Option<Countdown>) {
    match active {
        Some(countdown) => {
            countdown.interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
