//! Season/episode extraction from scene-style release paths
//!
//! Parses paths like:
//! - "Chicago.Fire.S14E08.1080p.WEB.h264-ETHEL.mkv"
//! - "Corner Gas 6x12 Super Sensitive.mkv"
//! - "Show/Season 2/Episode 05 - Title.mkv"

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static SXXEXX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)s(\d{1,2})[\s._-]*e(\d{1,3})(?:\D|$)").unwrap());

static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^0-9a-z])(\d{1,2})x(\d{2,3})(?:\D|$)").unwrap());

static VERBOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)season[\s._-]*(\d{1,2}).*?episode[\s._-]*(\d{1,3})(?:\D|$)").unwrap()
});

static SEASON_DIR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[/\\])(?:season|s)[\s._-]*(\d{1,2})(?:[^/\\0-9][^/\\]*)?[/\\]").unwrap()
});

static EPISODE_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z])(?:e|ep|episode)[\s._-]*(\d{1,3})(?:\D|$)").unwrap()
});

static SEASON_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(?:season|s)[\s._-]*(\d+)").unwrap()
});

/// Season and episode parsed from a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedEpisode {
    pub season: u32,
    pub episode: u32,
}

fn captures_pair(re: &Regex, text: &str) -> Option<ParsedEpisode> {
    let caps = re.captures(text)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some(ParsedEpisode { season, episode })
}

/// Parse a file path into a (season, episode) pair.
///
/// Patterns are tried from most to least specific; a season directory
/// ("Season 2/") combined with an episode token in the file name is the last
/// resort.
pub fn parse_season_episode(path: &str) -> Option<ParsedEpisode> {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);

    let parsed = captures_pair(&SXXEXX_RE, file_name)
        .or_else(|| captures_pair(&NXNN_RE, file_name))
        .or_else(|| captures_pair(&VERBOSE_RE, file_name))
        .or_else(|| captures_pair(&SXXEXX_RE, path))
        .or_else(|| captures_pair(&VERBOSE_RE, path))
        .or_else(|| {
            let season = SEASON_DIR_RE
                .captures(path)?
                .get(1)?
                .as_str()
                .parse()
                .ok()?;
            let episode = EPISODE_TOKEN_RE
                .captures(file_name)?
                .get(1)?
                .as_str()
                .parse()
                .ok()?;
            Some(ParsedEpisode { season, episode })
        });

    debug!(path = path, parsed = ?parsed, "Parsed season/episode");
    parsed
}

/// Every season number named anywhere in the path ("Anime.S01/", "Season 2",
/// "S01-S03"), in order of appearance
pub fn season_markers(path: &str) -> Vec<u32> {
    SEASON_MARKER_RE
        .captures_iter(path)
        .filter_map(|caps| caps.get(1))
        .filter(|digits| digits.as_str().len() <= 2)
        .filter_map(|digits| digits.as_str().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pe(season: u32, episode: u32) -> Option<ParsedEpisode> {
        Some(ParsedEpisode { season, episode })
    }

    #[test]
    fn test_sxxexx() {
        assert_eq!(
            parse_season_episode("Chicago.Fire.S14E08.1080p.WEB.h264-ETHEL.mkv"),
            pe(14, 8)
        );
        assert_eq!(parse_season_episode("show s01 e02.mkv"), pe(1, 2));
    }

    #[test]
    fn test_nxnn() {
        assert_eq!(
            parse_season_episode("Corner Gas 6x12 Super Sensitive.mkv"),
            pe(6, 12)
        );
        // resolution tokens are not episodes
        assert_eq!(parse_season_episode("Movie.1920x1080.mkv"), None);
    }

    #[test]
    fn test_verbose() {
        assert_eq!(
            parse_season_episode("Show Season 2 Episode 5.mkv"),
            pe(2, 5)
        );
    }

    #[test]
    fn test_season_directory_with_episode_token() {
        assert_eq!(
            parse_season_episode("Show/Season 2/Ep 05 - The Return.mkv"),
            pe(2, 5)
        );
        assert_eq!(
            parse_season_episode("Show/S03/E07.mkv"),
            pe(3, 7)
        );
    }

    #[test]
    fn test_season_markers() {
        assert_eq!(season_markers("Anime.S01/[Grp] Anime S01 - 03 [1080p].mkv"), vec![1, 1]);
        assert_eq!(season_markers("Show/Season 2/Episode 05.mkv"), vec![2]);
        assert_eq!(season_markers("Show.Complete.S01-S03/Show.S02E04.mkv"), vec![1, 3, 2]);
        assert!(season_markers("[Group] Anime - 05 [1080p].mkv").is_empty());
        assert!(season_markers("Shows/Seasonal.1080p.mkv").is_empty());
    }

    #[test]
    fn test_unparseable() {
        assert_eq!(parse_season_episode("Movie.2020.1080p.BluRay.mkv"), None);
        assert_eq!(parse_season_episode("[Group] Anime - 05 [1080p].mkv"), None);
    }
}
