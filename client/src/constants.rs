pub const LOCAL_WS_URL: &str = "ws://localhost:3005/ws";

/// Video shown before anything else has been chosen or synced
pub const DEFAULT_VIDEO_ID: &str = "XIMLoLxmTDw";

/// Assumed length of videos played by the headless player
pub const HEADLESS_VIDEO_SECS: f64 = 3600.0;

pub const KEEPALIVE_INTERVAL_SECS: u64 = 12;

pub const CATCH_UP_WARN_SECS: u64 = 10;

/// Current application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
