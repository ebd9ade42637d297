//! Media toolchain adapters.
//!
//! This crate wraps the external binaries the pipeline drives:
//! - `ffprobe` probing and track selection into a [`MediaContainer`]
//! - the pure ffmpeg argument planner
//! - a cancellable subprocess driver with incremental output sinks
//! - `mkvextract` for pulling image subtitles out of the source
//! - ffmpeg stderr progress parsing

pub mod error;
pub mod extract;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod subprocess;

pub use error::{MediaError, MediaResult};
pub use extract::extract_subtitles;
pub use plan::FfmpegPlan;
pub use probe::{probe_media, ProbedMedia};
pub use progress::{EncodeProgress, ProgressParser};
pub use subprocess::Subprocess;
