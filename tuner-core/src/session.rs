//! # Tuner Session Module
//!
//! A session owns everything a running tuner needs: the capture stream,
//! the analysis window and the tracker. It is created on start and
//! consumed by [`TunerSession::stop`], so no analysis can run afterwards.
//!
//! The display side calls [`TunerSession::poll`] once per refresh. Each poll
//! drains whatever audio has arrived and analyses the most recent frame.
//! A poll with no new audio counts as a miss, so a stalled device blanks
//! the display like silence does.

use std::collections::VecDeque;
use std::time::Instant;

use anyhow::Result;
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, TryRecvError};
use log::{error, info, warn};

use crate::Readout;
use crate::audio;
use crate::config::{Mode, TunerConfig};
use crate::error::ConfigError;
use crate::tracker::PitchTracker;

/// Blocks buffered between the capture callback and the poller.
const CHANNEL_CAPACITY: usize = 64;

/// Sliding window over the most recent `frame_size` samples of a block stream.
#[derive(Debug)]
pub struct FrameFeed {
    receiver: Receiver<Vec<f32>>,
    window: VecDeque<f32>,
    frame_size: usize,
    /// Samples received since the last frame was handed out
    fresh: usize,
    disconnected: bool,
}

impl FrameFeed {
    pub fn new(receiver: Receiver<Vec<f32>>, frame_size: usize) -> Self {
        Self {
            receiver,
            window: VecDeque::with_capacity(frame_size),
            frame_size,
            fresh: 0,
            disconnected: false,
        }
    }

    /// Moves all pending blocks into the window. Returns the number of
    /// samples received.
    pub fn pump(&mut self) -> usize {
        let mut received = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(block) => {
                    received += block.len();
                    self.window.extend(block);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        warn!("audio source disconnected");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
        self.fresh += received;
        self.trim();
        received
    }

    /// Copies the latest full frame into `out`.
    ///
    /// # Returns
    /// * `false` - Fewer than `frame_size` samples have arrived so far, or
    ///   nothing new arrived since the previous frame
    pub fn latest_frame(&mut self, out: &mut Vec<f32>) -> bool {
        self.pump();
        if !self.is_primed() || self.fresh == 0 {
            return false;
        }
        self.fresh = 0;
        out.clear();
        out.extend(self.window.iter().copied());
        true
    }

    /// A full frame has been buffered at least once.
    pub fn is_primed(&self) -> bool {
        self.window.len() >= self.frame_size
    }

    /// The buffered samples count as new for the resized frame.
    pub fn set_frame_size(&mut self, frame_size: usize) {
        self.frame_size = frame_size;
        self.trim();
        self.fresh = self.window.len();
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn trim(&mut self) {
        let excess = self.window.len().saturating_sub(self.frame_size);
        self.window.drain(..excess);
    }
}

/// A running tuner: capture stream, analysis window and tracker.
pub struct TunerSession {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    feed: FrameFeed,
    tracker: PitchTracker,
    frame: Vec<f32>,
}

impl TunerSession {
    /// Opens the default input device and starts tracking.
    pub fn start(config: TunerConfig) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (stream, sample_rate) = audio::start_audio_capture(sender)?;
        let mut session = Self::with_source(config, receiver, sample_rate)?;
        session.stream = Some(stream);
        info!(
            "tuner session started in {} mode at {sample_rate} Hz",
            session.tracker.mode()
        );
        Ok(session)
    }

    /// Tracks blocks from any mono source, e.g. a decoded file.
    pub fn with_source(
        config: TunerConfig,
        receiver: Receiver<Vec<f32>>,
        sample_rate: u32,
    ) -> Result<Self, ConfigError> {
        config.bass.validate_for_rate(sample_rate)?;
        config.voice.validate_for_rate(sample_rate)?;
        let tracker = PitchTracker::new(config)?;
        let frame_size = tracker.mode_config().buf;
        Ok(Self {
            stream: None,
            sample_rate,
            feed: FrameFeed::new(receiver, frame_size),
            tracker,
            frame: Vec::with_capacity(frame_size),
        })
    }

    /// Analyses the latest frame; call once per display refresh.
    pub fn poll(&mut self) -> Option<Readout> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Option<Readout> {
        if self.feed.latest_frame(&mut self.frame) {
            return self.tracker.process(&mut self.frame, self.sample_rate, now);
        }
        if self.feed.is_primed() {
            // stalled source: re-analysing the same window would keep a
            // stale note alive
            return self.tracker.miss(now);
        }
        self.tracker.readout()
    }

    /// Switches mode; tracker state and the analysis window restart.
    pub fn set_mode(&mut self, mode: Mode) {
        self.tracker.set_mode(mode);
        self.feed.set_frame_size(self.tracker.mode_config().buf);
    }

    pub fn set_frame_skip(&mut self, enabled: bool) {
        self.tracker.set_frame_skip(enabled);
    }

    pub fn tracker(&self) -> &PitchTracker {
        &self.tracker
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_source_disconnected(&self) -> bool {
        self.feed.is_disconnected()
    }

    /// Halts capture and releases the device.
    pub fn stop(self) {
        if let Some(stream) = self.stream {
            if let Err(e) = stream.pause() {
                error!("Error pausing stream: {e}");
            }
            drop(stream);
        }
        info!("tuner session stopped");
    }
}
