//! Playback engine
//!
//! - [`track`]: per-stream decode pipelines
//! - [`time_provider`]: master clock and frame release scheduling
//! - [`transport`]: state machine and worker thread

pub mod frame_release;
pub mod gate;
pub mod slots;
pub mod time_provider;
pub mod track;
pub mod transport;

pub use frame_release::{FrameReleaseAdjuster, IdentityAdjuster};
pub use gate::{gate_video_frame, FrameDecision};
pub use slots::{InputSlotQueue, OutputSlotQueue};
pub use time_provider::{MasterAudio, MediaTimeProvider, PlaybackClock, SessionTiming};
pub use track::{PipelineEnv, TrackPipeline, TrackStats};
pub use transport::{Player, PlayerStats, StartOutcome};
