//! Playback subsystem
//!
//! - `format`: output PCM format and block sizing
//! - `signals`: pause/skip delivery between handlers and the stream
//! - `source`: decoders producing output-format PCM
//! - `sink`: output transports
//! - `pipeline`: the playback state machine

pub mod format;
pub mod pipeline;
pub mod signals;
pub mod sink;
pub mod source;

pub use format::OutputFormat;
pub use pipeline::{NowPlaying, PlaybackHandle, PlaybackPipeline, PlaybackReport};
pub use signals::ControlSignals;
pub use sink::{
    AudioSink, ChannelConnector, ChannelSink, SinkConnector, StreamConnector, StreamTarget,
    WriterSink,
};
pub use source::{FfmpegOpener, NativeOpener, NativeSource, PcmSource, SourceOpener};
