//! Source player: the looping test-tone node.
//!
//! The playback loop is an explicit Idle/Looping state plus a re-arm check,
//! not a chain of nested completion callbacks: the engine seeds passes,
//! `fill` consumes them on the audio thread and reports each completed pass
//! over a channel, and the completion pump re-schedules only while the
//! engine is still looping.

use crossbeam::channel::Sender;

use crate::asset::SourceAsset;
use crate::graph::StreamFormat;

/// Notifications emitted from the render side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayerEvent {
    /// One scheduled pass over the source buffer finished rendering.
    PassComplete,
    /// Engine teardown; stops the completion pump.
    Shutdown,
}

/// Plays the fixed source buffer, one scheduled pass at a time.
pub(crate) struct SourcePlayer {
    frames: Vec<f32>,
    format: StreamFormat,
    /// Sample index (not frame index) into `frames`.
    pos: usize,
    /// Scheduled passes, including the one currently draining.
    queued: u32,
    /// Started and not paused.
    rolling: bool,
    events: Sender<PlayerEvent>,
}

impl SourcePlayer {
    pub fn new(asset: SourceAsset, events: Sender<PlayerEvent>) -> Self {
        let channels = usize::from(asset.format.channels.max(1));
        let mut frames = asset.frames;
        // Drop a trailing partial frame so the playhead always lands on
        // frame boundaries.
        frames.truncate(frames.len() - frames.len() % channels);
        Self {
            frames,
            format: asset.format,
            pos: 0,
            queued: 0,
            rolling: false,
            events,
        }
    }

    /// Queues one more pass over the buffer.
    pub fn schedule_pass(&mut self) {
        self.queued += 1;
    }

    pub fn queued_passes(&self) -> u32 {
        self.queued
    }

    pub fn play(&mut self) {
        self.rolling = true;
    }

    /// Pauses in place: position and queued passes survive, so playback can
    /// resume across a rewire without an audible restart.
    pub fn pause(&mut self) {
        self.rolling = false;
    }

    /// Full stop: rewinds and discards scheduled passes.
    pub fn stop(&mut self) {
        self.rolling = false;
        self.pos = 0;
        self.queued = 0;
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling
    }

    /// Fills `out` (interleaved, `out_channels` wide) from the source
    /// buffer. Silent while not rolling or with nothing scheduled. Emits one
    /// `PassComplete` per drained pass; the receiver decides whether to
    /// re-arm.
    pub fn fill(&mut self, out: &mut [f32], out_channels: usize) {
        let src_channels = usize::from(self.format.channels.max(1));
        let out_frames = out.len() / out_channels;

        for frame in 0..out_frames {
            if !self.rolling || self.queued == 0 || self.frames.is_empty() {
                for ch in 0..out_channels {
                    out[frame * out_channels + ch] = 0.0;
                }
                continue;
            }
            for ch in 0..out_channels {
                // Map extra output channels onto the last source channel.
                let src_ch = ch.min(src_channels - 1);
                out[frame * out_channels + ch] = self.frames[self.pos + src_ch];
            }
            self.pos += src_channels;
            if self.pos >= self.frames.len() {
                self.pos = 0;
                self.queued -= 1;
                // Channel full/closed means the engine is gone; nothing to do.
                let _ = self.events.send(PlayerEvent::PassComplete);
            }
        }
    }
}
