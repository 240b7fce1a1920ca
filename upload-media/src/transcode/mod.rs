//! Transcoding dispatcher: plan classification, operation selection, the
//! global throttle and the collaborator contracts.

mod engines;
mod ffmpeg;
mod operation;
mod plan;
mod throttle;

pub use engines::{
    AnalysisWorkers, EngineResult, Engines, HeifEngine, ImageEngine, MediaEngine, PdfEngine,
    SubtitleEngine, Unavailable,
};
pub use ffmpeg::FfmpegEngine;
pub use operation::{ImageEncode, TranscodeOperation, execute, select_operation};
pub use plan::classify;
pub use throttle::{ThrottlePermit, TranscodeThrottle};
