use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::constants::{CATCH_UP_WARN_SECS, DEFAULT_VIDEO_ID, LOCAL_WS_URL};
use crate::invite::parse_room_link;
use crate::player::Quality;
use crate::youtube::{extract_video_id, VideoId};

/// Settings for one viewer process
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub server_url: String,
    pub room_id: String,
    pub joined: bool,
    pub default_video: VideoId,
    pub catch_up_warn_after: Duration,
    pub quality: Quality,
}

impl ViewerConfig {
    /// Parse command line arguments (without the program name), then apply
    /// `COWATCH_SERVER` and `COWATCH_CATCH_UP_WARN_SECS` from the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_args(std::env::args().skip(1))?;
        if let Ok(url) = std::env::var("COWATCH_SERVER") {
            config.server_url = url;
        }
        if let Ok(secs) = std::env::var("COWATCH_CATCH_UP_WARN_SECS") {
            let secs: u64 = secs
                .parse()
                .context("COWATCH_CATCH_UP_WARN_SECS must be a number of seconds")?;
            config.catch_up_warn_after = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut room = None;
        let mut watch_only = false;
        let mut server_url = LOCAL_WS_URL.to_string();
        let mut video = None;
        let mut quality = Quality::Default;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--watch-only" => watch_only = true,
                "--server" => {
                    server_url = args.next().context("--server needs a url")?;
                }
                "--video" => {
                    let raw = args.next().context("--video needs a url or id")?;
                    video = Some(
                        extract_video_id(&raw)
                            .with_context(|| format!("Not a recognized video: {raw}"))?,
                    );
                }
                "--quality" => {
                    let raw = args.next().context("--quality needs a level")?;
                    quality = raw.parse()?;
                }
                other if other.starts_with("--") => bail!("Unknown option {other}"),
                other => room = Some(other.to_string()),
            }
        }

        let room = room.context("Missing room id or room link")?;
        let (room_id, joined) = match parse_room_link(&room) {
            Some(link) => (link.room_id, link.joined && !watch_only),
            None => (room, !watch_only),
        };

        let default_video = match video {
            Some(video) => video,
            None => DEFAULT_VIDEO_ID
                .parse()
                .context("Built-in default video id is invalid")?,
        };

        Ok(Self {
            server_url,
            room_id,
            joined,
            default_video,
            catch_up_warn_after: Duration::from_secs(CATCH_UP_WARN_SECS),
            quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bare_room_defaults() {
        let config = ViewerConfig::from_args(args(&["movie-night"])).unwrap();
        assert_eq!(config.room_id, "movie-night");
        assert!(config.joined);
        assert_eq!(config.server_url, LOCAL_WS_URL);
        assert_eq!(config.default_video.as_str(), DEFAULT_VIDEO_ID);
        assert_eq!(config.quality, Quality::Default);
    }

    #[test]
    fn test_watch_only_link_and_flags() {
        let config = ViewerConfig::from_args(args(&[
            "cowatch://room?room=abc&sync=0",
            "--server",
            "ws://relay:3005/ws",
            "--video",
            "https://youtu.be/dQw4w9WgXcQ",
            "--quality",
            "hd720",
        ]))
        .unwrap();
        assert_eq!(config.quality, Quality::Hd720);
        assert_eq!(config.room_id, "abc");
        assert!(!config.joined);
        assert_eq!(config.server_url, "ws://relay:3005/ws");
        assert_eq!(config.default_video.as_str(), "dQw4w9WgXcQ");

        let config = ViewerConfig::from_args(args(&["abc", "--watch-only"])).unwrap();
        assert!(!config.joined);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(ViewerConfig::from_args(args(&[])).is_err());
        assert!(ViewerConfig::from_args(args(&["abc", "--video", "nope"])).is_err());
        assert!(ViewerConfig::from_args(args(&["abc", "--loud"])).is_err());
        assert!(ViewerConfig::from_args(args(&["abc", "--quality", "8k"])).is_err());
    }
}
