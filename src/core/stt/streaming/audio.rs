//! Audio capture collaborators.
//!
//! Capture itself (microphones, format conversion) lives outside this crate.
//! An [`AudioSource`] only has to hand over raw PCM chunks and, optionally,
//! power-level samples.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, warn};

use super::config::SessionConfig;

/// One item produced by an audio source.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Raw PCM bytes, already encoded as configured
    Audio(Bytes),
    /// Input power level in dBFS
    Power(f32),
}

/// A producer of audio for a recognition session.
#[async_trait]
pub trait AudioSource: Send {
    /// Next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Option<CaptureEvent>;
}

/// Frames any `AsyncRead` of raw PCM into fixed-size chunks.
///
/// The final chunk may be shorter. With pacing enabled, chunks are released
/// no faster than real time.
pub struct ReaderAudioSource<R> {
    reader: R,
    chunk_bytes: usize,
    pacing: Option<Interval>,
    done: bool,
}

impl<R> ReaderAudioSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, chunk_bytes: usize) -> Self {
        Self {
            reader,
            chunk_bytes: chunk_bytes.max(1),
            pacing: None,
            done: false,
        }
    }

    /// Chunks of one configured frame each.
    pub fn for_config(reader: R, config: &SessionConfig) -> Self {
        Self::new(reader, config.frame_bytes())
    }

    /// Release one chunk per `period`.
    pub fn paced(mut self, period: Duration) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.pacing = Some(ticker);
        self
    }

    /// Pace at the real-time rate of `config` (frame size / sample rate).
    pub fn realtime(self, config: &SessionConfig) -> Self {
        let period =
            Duration::from_secs_f64(config.frame_size as f64 / config.sample_rate.max(1) as f64);
        self.paced(period)
    }

    async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = BytesMut::zeroed(self.chunk_bytes);
        let mut filled = 0;
        while filled < self.chunk_bytes {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf.freeze()))
    }
}

#[async_trait]
impl<R> AudioSource for ReaderAudioSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<CaptureEvent> {
        if self.done {
            return None;
        }
        if let Some(ref mut ticker) = self.pacing {
            ticker.tick().await;
        }

        match self.read_chunk().await {
            Ok(Some(chunk)) => Some(CaptureEvent::Audio(chunk)),
            Ok(None) => {
                debug!("Audio source exhausted");
                self.done = true;
                None
            }
            Err(e) => {
                warn!("Audio source read failed: {}", e);
                self.done = true;
                None
            }
        }
    }
}
