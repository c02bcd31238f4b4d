//! Scheduled playback of one decoded stem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dasp_graph::{Buffer, Input};

use crate::decode::DecodedBuffer;
use crate::node::{silence, AudioNode, ProcessContext};

/// Messages to control a [`ClipPlayer`].
#[derive(Clone, Copy, Debug)]
pub enum ClipMessage {
    /// Stop for good. A stopped clip never restarts; schedule a new one instead.
    Stop,
    /// Set playback volume (linear, 0.0 to 4.0). Changes are smoothed.
    SetVolume(f32),
}

/// Plays a shared decoded buffer starting at an absolute graph frame.
///
/// The read position is derived from the block's graph frame on every call
/// (`offset + (frame - at_frame)`), so the clip stays locked to the bus clock
/// even when the graph skips blocks to catch up with the device.
///
/// Before `at_frame` the clip outputs silence. When the read position passes the
/// end of the buffer the clip raises its finished flag, which the scheduler polls
/// as a backup end-of-song trigger.
pub struct ClipPlayer {
    buffer: Arc<DecodedBuffer>,
    at_frame: u64,
    offset_frames: u64,
    volume: f32,
    smoothed_volume: f32,
    stopped: bool,
    finished: Arc<AtomicBool>,
}

impl ClipPlayer {
    /// Create a clip that starts playing `buffer` from `offset_frames` when the
    /// graph reaches `at_frame`.
    pub fn new(buffer: Arc<DecodedBuffer>, at_frame: u64, offset_frames: u64) -> Self {
        Self {
            buffer,
            at_frame,
            offset_frames,
            volume: 1.0,
            smoothed_volume: 1.0,
            stopped: false,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start at a volume other than unity.
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 4.0);
        self.smoothed_volume = self.volume;
        self
    }

    /// Flag raised once playback ran past the end of the buffer.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.buffer.channels.clamp(1, 2)
    }
}

impl AudioNode for ClipPlayer {
    type Message = ClipMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = ClipMessage>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for msg in messages {
            match msg {
                ClipMessage::Stop => self.stopped = true,
                ClipMessage::SetVolume(v) => self.volume = v.clamp(0.0, 4.0),
            }
        }

        if self.stopped || outputs.is_empty() {
            silence(outputs);
            return;
        }

        let src_channels = self.buffer.channels.max(1);
        let total_frames = self.buffer.frames() as u64;
        let buffer_len = outputs[0].len();
        let target = self.volume;
        let mut volume = self.smoothed_volume;
        let mut ran_out = false;

        for i in 0..buffer_len {
            volume = target + 0.995 * (volume - target);

            let frame = ctx.frame + i as u64;
            let read = if frame < self.at_frame {
                None
            } else {
                let index = self.offset_frames + (frame - self.at_frame);
                if index < total_frames {
                    Some(index as usize * src_channels)
                } else {
                    ran_out = true;
                    None
                }
            };

            for (ch, buffer) in outputs.iter_mut().enumerate() {
                buffer[i] = match read {
                    Some(base) => self.buffer.samples[base + ch % src_channels] * volume,
                    None => 0.0,
                };
            }
        }

        self.smoothed_volume = volume;
        if ran_out {
            self.finished.store(true, Ordering::Relaxed);
        }
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        self.channels()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Arc<DecodedBuffer> {
        Arc::new(DecodedBuffer {
            samples: (0..frames).map(|i| i as f32).collect(),
            channels: 1,
            sample_rate: 1000,
        })
    }

    fn render(clip: &mut ClipPlayer, frame: u64) -> Buffer {
        let ctx = ProcessContext { sample_rate: 1000, buffer_size: 64, frame };
        let mut out = [Buffer::default()];
        clip.process(&ctx, core::iter::empty(), &[], &mut out);
        let [b] = out;
        b
    }

    #[test]
    fn silent_until_start_frame() {
        let mut clip = ClipPlayer::new(ramp(500), 100, 0);
        let first = render(&mut clip, 64);
        assert!(first[..36].iter().all(|s| *s == 0.0));
        assert_eq!(first[36], 0.0);
        assert_eq!(first[37], 1.0);
    }

    #[test]
    fn reads_from_offset_by_absolute_frame() {
        let mut clip = ClipPlayer::new(ramp(500), 0, 200);
        // jump straight to frame 128 without rendering 0..128
        let block = render(&mut clip, 128);
        assert_eq!(block[0], 328.0);
        assert!(!clip.finished_flag().load(Ordering::Relaxed));
    }

    #[test]
    fn raises_finished_past_the_end() {
        let mut clip = ClipPlayer::new(ramp(100), 0, 0);
        let flag = clip.finished_flag();
        render(&mut clip, 0);
        assert!(!flag.load(Ordering::Relaxed));
        let tail = render(&mut clip, 64);
        assert_eq!(tail[35], 99.0);
        assert_eq!(tail[36], 0.0);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn stop_silences() {
        let mut clip = ClipPlayer::new(ramp(500), 0, 0);
        let ctx = ProcessContext { sample_rate: 1000, buffer_size: 64, frame: 0 };
        let mut out = [Buffer::default()];
        clip.process(&ctx, [ClipMessage::Stop].into_iter(), &[], &mut out);
        assert!(out[0].iter().all(|s| *s == 0.0));
    }
}
