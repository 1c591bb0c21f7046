// Data models for video frames, pose landmarks and host-facing errors

pub mod capture;
pub mod host;
pub mod pose;
