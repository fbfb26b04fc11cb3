use crate::domain::models::AlarmSound;
use crate::infrastructure::error::InfraError;

pub trait AlarmPlayer: Send + Sync {
    /// Starts playback and returns without waiting for it to finish.
    fn play(&self, sound: AlarmSound, volume: u8) -> Result<(), InfraError>;
}

/// Used when no audio backend is compiled in; only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAlarmPlayer;

impl AlarmPlayer for SilentAlarmPlayer {
    fn play(&self, sound: AlarmSound, volume: u8) -> Result<(), InfraError> {
        if sound != AlarmSound::None {
            log::debug!("alarm {:?} at volume {} (no audio backend)", sound, volume);
        }
        Ok(())
    }
}

pub fn volume_gain(volume: u8) -> f32 {
    f32::from(volume.min(100)) / 100.0
}

#[cfg(feature = "audio")]
pub use rodio_player::RodioAlarmPlayer;

#[cfg(feature = "audio")]
mod rodio_player {
    use super::{AlarmPlayer, volume_gain};
    use crate::domain::models::AlarmSound;
    use crate::infrastructure::error::InfraError;
    use rodio::{OutputStream, Sink, Source};
    use std::f32::consts::PI;
    use std::sync::mpsc::{self, Sender};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    const SAMPLE_RATE: u32 = 44_100;
    const BEEP_MS: u64 = 180;
    const GAP_MS: u64 = 120;

    /// Short sine beep; the chime is a few of these with silence between.
    struct Beep {
        frequency: f32,
        num_sample: usize,
        total_samples: usize,
    }

    impl Beep {
        fn new(frequency: f32) -> Self {
            Self {
                frequency,
                num_sample: 0,
                total_samples: (SAMPLE_RATE as u64 * BEEP_MS / 1_000) as usize,
            }
        }
    }

    impl Iterator for Beep {
        type Item = f32;

        fn next(&mut self) -> Option<Self::Item> {
            if self.num_sample >= self.total_samples {
                return None;
            }
            self.num_sample += 1;
            let t = self.num_sample as f32 / SAMPLE_RATE as f32;
            Some((2.0 * PI * self.frequency * t).sin() * 0.3)
        }
    }

    impl Source for Beep {
        fn current_frame_len(&self) -> Option<usize> {
            Some(self.total_samples.saturating_sub(self.num_sample))
        }

        fn channels(&self) -> u16 {
            1
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn total_duration(&self) -> Option<Duration> {
            Some(Duration::from_millis(BEEP_MS))
        }
    }

    struct AlarmRequest {
        frequency: f32,
        beeps: u32,
        gain: f32,
    }

    /// Output streams are not `Send`, so playback lives on its own thread.
    pub struct RodioAlarmPlayer {
        tx: Mutex<Option<Sender<AlarmRequest>>>,
    }

    impl Default for RodioAlarmPlayer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RodioAlarmPlayer {
        pub fn new() -> Self {
            Self { tx: Mutex::new(None) }
        }

        fn ensure_thread(&self) -> Result<Sender<AlarmRequest>, InfraError> {
            let mut guard = self
                .tx
                .lock()
                .map_err(|error| InfraError::Audio(format!("alarm lock poisoned: {error}")))?;
            if let Some(tx) = guard.as_ref() {
                return Ok(tx.clone());
            }

            let (tx, rx) = mpsc::channel::<AlarmRequest>();
            thread::Builder::new()
                .name("alarm-player".to_string())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(output) => output,
                        Err(error) => {
                            log::error!("failed to open audio output: {}", error);
                            return;
                        }
                    };
                    while let Ok(request) = rx.recv() {
                        let sink = match Sink::try_new(&handle) {
                            Ok(sink) => sink,
                            Err(error) => {
                                log::error!("failed to create alarm sink: {}", error);
                                continue;
                            }
                        };
                        sink.set_volume(request.gain);
                        for _ in 0..request.beeps {
                            sink.append(Beep::new(request.frequency));
                            sink.append(
                                rodio::source::Zero::<f32>::new(1, SAMPLE_RATE)
                                    .take_duration(Duration::from_millis(GAP_MS)),
                            );
                        }
                        sink.sleep_until_end();
                    }
                })
                .map_err(|error| InfraError::Audio(error.to_string()))?;

            *guard = Some(tx.clone());
            Ok(tx)
        }
    }

    impl AlarmPlayer for RodioAlarmPlayer {
        fn play(&self, sound: AlarmSound, volume: u8) -> Result<(), InfraError> {
            let Some((frequency, beeps)) = sound.pattern() else {
                return Ok(());
            };
            let tx = self.ensure_thread()?;
            tx.send(AlarmRequest {
                frequency,
                beeps,
                gain: volume_gain(volume),
            })
            .map_err(|error| InfraError::Audio(format!("alarm thread stopped: {error}")))
        }
    }
}

/// Picks the compiled-in backend.
pub fn default_alarm_player() -> std::sync::Arc<dyn AlarmPlayer> {
    #[cfg(feature = "audio")]
    {
        std::sync::Arc::new(RodioAlarmPlayer::new())
    }
    #[cfg(not(feature = "audio"))]
    {
        std::sync::Arc::new(SilentAlarmPlayer)
    }
}
