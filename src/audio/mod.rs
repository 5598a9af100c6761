pub mod alarm;
pub mod fade;

use alarm::AlarmTone;
use fade::FadeOut;

use log::{debug, warn};
use rodio::{OutputStream, Sink};
use std::sync::{
    mpsc::{self, RecvTimeoutError, Sender},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Fade-out begins this far into playback.
pub const ALARM_FADE_START: Duration = Duration::from_millis(3000);
pub const ALARM_FADE_LEN: Duration = Duration::from_millis(400);
/// Upper bound on how long the alarm can be audible.
pub const ALARM_HARD_STOP: Duration = Duration::from_millis(3400);

/// Anything that can sound the phase-complete alarm.
pub trait AlarmOutput: Send + Sync {
    /// `volume` is a gain in `0.0..=1.0`.
    fn play_alarm(&self, volume: f32) -> Result<(), String>;
}

enum AudioCommand {
    PlayAlarm { volume: f32 },
}

struct Playback {
    _stream: OutputStream,
    sink: Sink,
    deadline: Instant,
}

/// Handle to the dedicated audio thread. rodio's output objects are not
/// `Send`, so they live on that thread and are driven by commands.
pub struct AudioEngineHandle {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
}

impl AudioEngineHandle {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, String> {
        let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("audio-alarm".to_string())
            .spawn(move || {
                let mut playback: Option<Playback> = None;

                fn open_sink(volume: f32) -> Result<(OutputStream, Sink), String> {
                    let (stream, handle) = OutputStream::try_default()
                        .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                    let sink = Sink::try_new(&handle)
                        .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                    sink.set_volume(volume.clamp(0.0, 1.0));
                    Ok((stream, sink))
                }

                loop {
                    let next = match playback.as_ref() {
                        Some(active) => {
                            let wait = active.deadline.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(wait) {
                                Ok(cmd) => Some(cmd),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(cmd) => Some(cmd),
                            Err(_) => break,
                        },
                    };

                    match next {
                        // Deadline reached: cut the alarm whether or not the
                        // fade has drained from the sink yet.
                        None => {
                            if let Some(active) = playback.take() {
                                active.sink.stop();
                            }
                        }
                        Some(AudioCommand::PlayAlarm { volume }) => {
                            if let Some(active) = playback.take() {
                                active.sink.stop();
                            }
                            match open_sink(volume) {
                                Ok((stream, sink)) => {
                                    sink.append(FadeOut::new(
                                        AlarmTone::new(),
                                        ALARM_FADE_START,
                                        ALARM_FADE_LEN,
                                    ));
                                    playback = Some(Playback {
                                        _stream: stream,
                                        sink,
                                        deadline: Instant::now() + ALARM_HARD_STOP,
                                    });
                                }
                                Err(err) => warn!("Alarm skipped: {err}"),
                            }
                        }
                    }
                }

                debug!("audio thread exiting");
            })
            .map_err(|e| e.to_string())?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

impl Default for AudioEngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmOutput for AudioEngineHandle {
    fn play_alarm(&self, volume: f32) -> Result<(), String> {
        let tx = self.ensure_thread()?;
        tx.send(AudioCommand::PlayAlarm { volume })
            .map_err(|e| e.to_string())
    }
}
