pub mod config;
pub mod logging;
pub mod asset_stager;

// Pose inference and the video pipeline
pub mod engine;
pub mod frame_sampler;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_decoder;
pub mod landmark_extractor;
pub mod preview_encoder;
pub mod result_assembler;
pub mod pose_pipeline;

#[cfg(test)]
pub mod test_support;
