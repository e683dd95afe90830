use url::Url;
use urlencoding::encode;

/// A room reference parsed from a shared link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub room_id: String,
    /// `false` when the link asks to watch without syncing.
    pub joined: bool,
}

pub fn build_room_link(room_id: &str, watch_only: bool) -> String {
    let mut params = vec![format!("room={}", encode(room_id))];
    if watch_only {
        params.push("sync=0".to_string());
    }
    format!("cowatch://room?{}", params.join("&"))
}

/// Accepts `cowatch://` links, web links carrying the same query, or a bare query.
pub fn parse_room_link(input: &str) -> Option<RoomLink> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if trimmed.starts_with("cowatch://")
        || trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
    {
        trimmed.to_string()
    } else {
        format!("cowatch://room?{}", trimmed)
    };

    let url = Url::parse(&normalized).ok()?;
    let mut room_id = None;
    let mut joined = true;

    // query_pairs already percent-decodes
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "room" => room_id = Some(value.into_owned()),
            "sync" => joined = !matches!(value.as_ref(), "0" | "false" | "no"),
            _ => {}
        }
    }

    let room_id = room_id.filter(|id| !id.trim().is_empty())?;
    Some(RoomLink { room_id, joined })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_round_trip() {
        let link = build_room_link("movie night", true);
        assert_eq!(link, "cowatch://room?room=movie%20night&sync=0");
        assert_eq!(
            parse_room_link(&link),
            Some(RoomLink {
                room_id: "movie night".into(),
                joined: false,
            })
        );
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            parse_room_link("https://cowatch.example/join?room=abc"),
            Some(RoomLink {
                room_id: "abc".into(),
                joined: true,
            })
        );
        assert_eq!(
            parse_room_link("room=abc&sync=false").map(|l| l.joined),
            Some(false)
        );
        assert_eq!(parse_room_link("sync=0"), None);
        assert_eq!(parse_room_link("   "), None);
    }
}
