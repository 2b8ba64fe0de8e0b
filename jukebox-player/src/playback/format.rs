//! Output PCM format

use std::time::Duration;

/// Interleaved signed 16-bit little-endian PCM, fixed rate and channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub blocks_per_second: u32,
}

impl OutputFormat {
    pub const SAMPLE_RATE: u32 = 48_000;
    pub const CHANNELS: u16 = 2;
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(blocks_per_second: u32) -> Self {
        Self {
            sample_rate: Self::SAMPLE_RATE,
            channels: Self::CHANNELS,
            blocks_per_second: blocks_per_second.max(1),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }

    /// Bytes per write, rounded down to whole frames
    pub fn block_size(&self) -> usize {
        let raw = self.bytes_per_second() / self.blocks_per_second as usize;
        let frames = (raw / self.frame_size()).max(1);
        frames * self.frame_size()
    }

    /// Playback time covered by one full block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size() as f64 / self.bytes_per_second() as f64)
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(60)
    }
}
