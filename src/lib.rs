pub mod error;
pub mod signature;
pub mod frame_source;
pub mod scene;
pub mod scene_detector;
pub mod editor;
pub mod subtitle;
pub mod video_processor;
pub mod enrichment;
pub mod processor;
pub mod handler;
pub mod config;

pub use error::{Result, SceneSyncError};
pub use signature::{DistanceWeights, FrameSignature};
pub use frame_source::{FrameGate, FrameSource};
pub use scene::{Edge, Enrichment, Scene, SceneRecord, Thumbnail};
pub use scene_detector::{DetectorConfig, SceneDetector};
pub use editor::{Direction, SceneEditor};
pub use subtitle::Subtitle;
pub use video_processor::{FfmpegFrameSource, VideoInfo};
pub use enrichment::{AnalysisClient, AnalysisConfig};
pub use processor::{ProcessConfig, ProcessOutput, process_video};
pub use config::{ConfigLoader, ExtendedConfig};
