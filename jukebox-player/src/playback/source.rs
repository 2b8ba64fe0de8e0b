//! Decoded PCM sources
//!
//! A [`SourceOpener`] turns a cached asset into a [`PcmSource`] producing
//! interleaved s16le stereo at 48 kHz (see [`OutputFormat`]).
//!
//! Two decoders:
//! - [`FfmpegOpener`]: external ffmpeg process writing to a pipe
//! - [`NativeOpener`]: symphonia decode and rubato resample on a dedicated
//!   thread, handed to the async side through a bounded channel

use super::format::OutputFormat;
use crate::cache::Asset;
use crate::error::PlaybackError;
use async_trait::async_trait;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Stream of decoded output-format PCM bytes
#[async_trait]
pub trait PcmSource: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means end of data
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlaybackError>;
}

/// Opens a decoded stream for a cached asset
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, asset: &Asset) -> Result<Box<dyn PcmSource>, PlaybackError>;
}

/// Fill `buf` completely unless the source ends first
///
/// Returns the number of bytes filled; less than `buf.len()` only at end of data.
pub async fn read_block(source: &mut dyn PcmSource, buf: &mut [u8]) -> Result<usize, PlaybackError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ========================================
// ffmpeg pipe decoder
// ========================================

/// Decodes through an ffmpeg child process
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: PathBuf,
    volume: f32,
}

impl FfmpegOpener {
    pub fn new(ffmpeg: PathBuf, volume: f32) -> Self {
        Self { ffmpeg, volume }
    }

    fn command(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "panic", "-i"])
            .arg(input)
            .args(["-ac", &OutputFormat::CHANNELS.to_string()])
            .args(["-f", "s16le"])
            .args(["-ar", &OutputFormat::SAMPLE_RATE.to_string()]);
        if (self.volume - 1.0).abs() > f32::EPSILON {
            cmd.args(["-filter:a", &format!("volume={:.3}", self.volume)]);
        }
        cmd.arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SourceOpener for FfmpegOpener {
    async fn open(&self, asset: &Asset) -> Result<Box<dyn PcmSource>, PlaybackError> {
        let mut child = self.command(&asset.path).spawn().map_err(|e| {
            PlaybackError::Source(format!("failed to start {}: {}", self.ffmpeg.display(), e))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlaybackError::Source("ffmpeg stdout not captured".into()))?;

        debug!("Decoding {} via ffmpeg", asset.path.display());
        Ok(Box::new(FfmpegSource {
            child,
            stdout,
            bytes_read: 0,
        }))
    }
}

struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    bytes_read: u64,
}

#[async_trait]
impl PcmSource for FfmpegSource {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlaybackError> {
        let n = self.stdout.read(buf).await?;
        if n > 0 {
            self.bytes_read += n as u64;
            return Ok(n);
        }

        let status = self.child.wait().await?;
        if !status.success() && self.bytes_read == 0 {
            return Err(PlaybackError::Decode(format!("ffmpeg exited with {}", status)));
        }
        Ok(0)
    }
}

// ========================================
// Native decoder
// ========================================

/// Decodes in-process with symphonia and rubato
#[derive(Debug, Clone)]
pub struct NativeOpener {
    volume: f32,
}

impl NativeOpener {
    pub fn new(volume: f32) -> Self {
        Self { volume }
    }
}

#[async_trait]
impl SourceOpener for NativeOpener {
    async fn open(&self, asset: &Asset) -> Result<Box<dyn PcmSource>, PlaybackError> {
        let path = asset.path.clone();
        let volume = self.volume;
        let source = tokio::task::spawn_blocking(move || NativeSource::open(&path, volume))
            .await
            .map_err(|e| PlaybackError::Source(format!("decoder setup panicked: {}", e)))??;
        Ok(Box::new(source))
    }
}

type DecodedChunk = Result<Vec<u8>, PlaybackError>;

/// Decoded chunks buffered ahead of the reader
const DECODE_QUEUE_DEPTH: usize = 8;

/// PCM read from a native decode thread
///
/// The decoder runs on its own OS thread and blocks on the bounded channel
/// when the reader falls behind. Dropping the source closes the channel,
/// which stops the thread at its next send.
pub struct NativeSource {
    chunks: mpsc::Receiver<DecodedChunk>,
    current: Vec<u8>,
    offset: usize,
}

impl NativeSource {
    /// Probe `path` and start decoding it
    ///
    /// Probing happens on the calling thread so setup errors surface here.
    pub fn open(path: &Path, volume: f32) -> Result<Self, PlaybackError> {
        let decoder = NativeDecoder::open(path, volume)?;
        let (tx, rx) = mpsc::channel(DECODE_QUEUE_DEPTH);

        std::thread::Builder::new()
            .name("native-decode".to_string())
            .spawn(move || decoder.run(tx))
            .map_err(|e| PlaybackError::Source(format!("failed to start decode thread: {}", e)))?;

        Ok(Self {
            chunks: rx,
            current: Vec::new(),
            offset: 0,
        })
    }
}

/// Symphonia decoder feeding an optional resampler
///
/// Decoded audio is normalized to stereo f32, resampled to 48 kHz when the
/// file rate differs, scaled by `volume`, and queued as s16le bytes.
struct NativeDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    resampler: Option<FastFixedIn<f32>>,
    /// Planar stereo samples waiting for a full resampler chunk
    staged: [Vec<f32>; 2],
    pending: Vec<u8>,
    volume: f32,
    finished: bool,
}

const RESAMPLE_CHUNK_FRAMES: usize = 1024;

impl NativeDecoder {
    fn open(path: &Path, volume: f32) -> Result<Self, PlaybackError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| PlaybackError::Decode(format!("{}: {}", path.display(), e)))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| PlaybackError::Decode(format!("{}: no audio track", path.display())))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.unwrap_or(OutputFormat::SAMPLE_RATE);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| PlaybackError::Decode(format!("{}: {}", path.display(), e)))?;

        let resampler = if sample_rate != OutputFormat::SAMPLE_RATE {
            debug!(
                "Resampling {} from {}Hz to {}Hz",
                path.display(),
                sample_rate,
                OutputFormat::SAMPLE_RATE
            );
            let ratio = OutputFormat::SAMPLE_RATE as f64 / sample_rate as f64;
            let resampler = FastFixedIn::<f32>::new(
                ratio,
                1.0,
                PolynomialDegree::Septic,
                RESAMPLE_CHUNK_FRAMES,
                OutputFormat::CHANNELS as usize,
            )
            .map_err(|e| PlaybackError::Decode(format!("failed to create resampler: {}", e)))?;
            Some(resampler)
        } else {
            None
        };

        Ok(Self {
            format,
            decoder,
            track_id,
            resampler,
            staged: [Vec::new(), Vec::new()],
            pending: Vec::new(),
            volume,
            finished: false,
        })
    }

    /// Decode until the channel closes, the stream ends, or an error is sent
    fn run(mut self, tx: mpsc::Sender<DecodedChunk>) {
        loop {
            let chunk = match self.next_chunk() {
                Ok(Some(chunk)) => Ok(chunk),
                Ok(None) => break,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() {
                debug!("Decode reader went away, stopping");
                return;
            }
            if failed {
                return;
            }
        }
        debug!("Native decode finished");
    }

    /// Next run of output bytes; `None` at end of stream
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, PlaybackError> {
        while self.pending.is_empty() {
            if self.finished {
                return Ok(None);
            }
            if !self.decode_next()? {
                self.drain_staged()?;
                self.finished = true;
            }
        }
        Ok(Some(std::mem::take(&mut self.pending)))
    }

    /// Decode the next packet into `pending`; false at end of stream
    fn decode_next(&mut self) -> Result<bool, PlaybackError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(PlaybackError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(PlaybackError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if decoded.frames() == 0 || channels == 0 {
                continue;
            }
            let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            samples.copy_interleaved_ref(decoded);

            let (left, right) = to_stereo(samples.samples(), channels);
            self.stage(left, right)?;
            return Ok(true);
        }
    }

    fn stage(&mut self, left: Vec<f32>, right: Vec<f32>) -> Result<(), PlaybackError> {
        if self.resampler.is_none() {
            self.push_output(&left, &right);
            return Ok(());
        }

        self.staged[0].extend(left);
        self.staged[1].extend(right);

        while self.staged[0].len() >= RESAMPLE_CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .staged
                .iter_mut()
                .map(|ch| ch.drain(..RESAMPLE_CHUNK_FRAMES).collect())
                .collect();
            let out = self.resample(Some(chunk.as_slice()))?;
            self.push_output(&out[0], &out[1]);
        }
        Ok(())
    }

    /// Push the tail of the staged samples through the resampler
    fn drain_staged(&mut self) -> Result<(), PlaybackError> {
        if self.resampler.is_none() || self.staged[0].is_empty() {
            return Ok(());
        }
        let tail: Vec<Vec<f32>> = self.staged.iter_mut().map(std::mem::take).collect();
        let out = self.resample(Some(tail.as_slice()))?;
        self.push_output(&out[0], &out[1]);
        Ok(())
    }

    fn resample(&mut self, input: Option<&[Vec<f32>]>) -> Result<Vec<Vec<f32>>, PlaybackError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(vec![Vec::new(), Vec::new()]);
        };
        let frames = input.map_or(0, |i| i[0].len());
        let result = if frames == resampler.input_frames_next() {
            resampler.process(input.unwrap_or_default(), None)
        } else {
            resampler.process_partial(input, None)
        };
        result.map_err(|e| PlaybackError::Decode(format!("resampling failed: {}", e)))
    }

    fn push_output(&mut self, left: &[f32], right: &[f32]) {
        for (l, r) in left.iter().zip(right) {
            for sample in [*l, *r] {
                let scaled = (sample * self.volume).clamp(-1.0, 1.0);
                let value = (scaled * i16::MAX as f32) as i16;
                self.pending.extend(value.to_le_bytes());
            }
        }
    }
}

/// Split interleaved samples into stereo planes
///
/// Mono is duplicated; more than two channels are folded by averaging
/// even-indexed channels into left and odd-indexed into right.
fn to_stereo(interleaved: &[f32], channels: usize) -> (Vec<f32>, Vec<f32>) {
    let frames = interleaved.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);

    for frame in interleaved.chunks_exact(channels) {
        match channels {
            1 => {
                left.push(frame[0]);
                right.push(frame[0]);
            }
            2 => {
                left.push(frame[0]);
                right.push(frame[1]);
            }
            _ => {
                let (mut l, mut r, mut nl, mut nr) = (0.0f32, 0.0f32, 0usize, 0usize);
                for (idx, sample) in frame.iter().enumerate() {
                    if idx % 2 == 0 {
                        l += sample;
                        nl += 1;
                    } else {
                        r += sample;
                        nr += 1;
                    }
                }
                left.push(l / nl.max(1) as f32);
                right.push(r / nr.max(1) as f32);
            }
        }
    }
    (left, right)
}

#[async_trait]
impl PcmSource for NativeSource {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PlaybackError> {
        while self.offset >= self.current.len() {
            match self.chunks.recv().await {
                Some(Ok(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len() - self.offset);
        buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
