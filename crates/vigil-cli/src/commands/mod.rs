pub mod config;
pub mod helpers;
pub mod init;
pub mod notify;
pub mod replay_gaze;
pub mod scan_audio;
