//! File matcher: picks the one file in a torrent that represents the target
//!
//! Everything here is pure and deterministic. Results are always references
//! into the input slice, so a match can never be fabricated, and "no match"
//! is `None` rather than a sentinel id (file ids may legitimately be `0`).

use regex::Regex;
use tracing::debug;

use crate::services::debrid::RemoteFile;
use crate::services::file_utils::{is_playable_video, is_sample_file, is_trailer_file, is_video_file};
use crate::services::filename_parser::{parse_season_episode, season_markers};
use crate::services::text_utils::{contains_word, title_similarity, word_overlap_ratio};

/// Minimum score a movie-pack file needs to be accepted
pub const MOVIE_SCORE_THRESHOLD: i32 = 60;

/// Weight of the title word-overlap ratio when a year is known
const TITLE_WEIGHT: f64 = 50.0;

/// Bonus for the release year appearing in the file name
const YEAR_BONUS: i32 = 50;

/// Penalty for trailers and samples
const EXTRA_PENALTY: i32 = 100;

/// Which rule produced a series match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePattern {
    /// S01E02, s1.e2, S01 - E02
    SeasonEpisode,
    /// 1x02
    Cross,
    /// 102 (season 1, episode 02)
    Compact,
    /// ep 2, episode 02
    EpisodeWord,
    /// " - 02 " anime-style bare number
    BareNumber,
}

impl EpisodePattern {
    pub const ALL: [EpisodePattern; 5] = [
        EpisodePattern::SeasonEpisode,
        EpisodePattern::Cross,
        EpisodePattern::Compact,
        EpisodePattern::EpisodeWord,
        EpisodePattern::BareNumber,
    ];

    /// Build the regex for this pattern, or `None` when the pattern does not
    /// apply to the target (compact form is skipped for seasons >= 100)
    fn regex(self, season: u32, episode: u32) -> Option<Regex> {
        let source = match self {
            EpisodePattern::SeasonEpisode => format!(
                r"(?i)(?:^|[^a-z])s0*{season}(?:\D.*?)?e0*{episode}(?:\D|$)"
            ),
            EpisodePattern::Cross => format!(r"(?i)(?:^|\D)0*{season}x0*{episode}(?:\D|$)"),
            EpisodePattern::Compact => {
                if season >= 100 {
                    return None;
                }
                format!(r"(?:^|\D){season}{episode:02}(?:[^0-9pPiI]|$)")
            }
            EpisodePattern::EpisodeWord => {
                format!(r"(?i)(?:^|[^a-z])(?:ep|episode)[\s._-]*0*{episode}(?:\D|$)")
            }
            EpisodePattern::BareNumber => {
                format!(r"(?i)(?:^|[\s._\-\[\(])0*{episode}(?:v\d)?(?:[\s._\-\]\)]|$)")
            }
        };
        Regex::new(&source).ok()
    }
}

/// Video, non-sample files; falls back to the full list when that is empty
pub fn candidate_files(files: &[RemoteFile]) -> Vec<&RemoteFile> {
    let videos: Vec<&RemoteFile> = files.iter().filter(|f| is_playable_video(&f.path)).collect();
    if videos.is_empty() {
        files.iter().collect()
    } else {
        videos
    }
}

/// Largest file; the earliest one wins on equal sizes
pub fn largest<'a>(files: &[&'a RemoteFile]) -> Option<&'a RemoteFile> {
    files
        .iter()
        .copied()
        .reduce(|best, f| if f.size_bytes > best.size_bytes { f } else { best })
}

/// Match a season/episode against file names without any size fallback.
///
/// Returns the matching file together with the pattern that found it.
pub fn match_episode(
    files: &[RemoteFile],
    season: u32,
    episode: u32,
) -> Option<(&RemoteFile, EpisodePattern)> {
    match_candidates(&candidate_files(files), season, episode)
}

/// Like [`match_episode`], skipping files whose name or folders place them
/// in another season or episode. Season-less patterns ("Episode 3", " - 03 ")
/// cannot then answer for a season the pack does not hold.
pub fn match_episode_in_season(
    files: &[RemoteFile],
    season: u32,
    episode: u32,
) -> Option<(&RemoteFile, EpisodePattern)> {
    let candidates: Vec<&RemoteFile> = candidate_files(files)
        .into_iter()
        .filter(|f| belongs_to(&f.path, season, episode))
        .collect();
    match_candidates(&candidates, season, episode)
}

fn belongs_to(path: &str, season: u32, episode: u32) -> bool {
    if let Some(parsed) = parse_season_episode(path) {
        return parsed.season == season && parsed.episode == episode;
    }
    let markers = season_markers(path);
    markers.is_empty() || markers.contains(&season)
}

fn match_candidates<'a>(
    candidates: &[&'a RemoteFile],
    season: u32,
    episode: u32,
) -> Option<(&'a RemoteFile, EpisodePattern)> {
    for pattern in EpisodePattern::ALL {
        let Some(re) = pattern.regex(season, episode) else {
            continue;
        };
        if let Some(file) = candidates.iter().copied().find(|f| re.is_match(&f.path)) {
            debug!(
                season = season,
                episode = episode,
                pattern = ?pattern,
                file = %file.file_name(),
                "Episode pattern matched"
            );
            return Some((file, pattern));
        }
    }
    None
}

/// Pick the file representing the target content.
///
/// Movie case (no season/episode): the largest candidate. Series case: the
/// first file hit by the highest-priority episode pattern, falling back to the
/// largest candidate when no pattern hits.
pub fn match_file(
    files: &[RemoteFile],
    season: Option<u32>,
    episode: Option<u32>,
) -> Option<&RemoteFile> {
    if let (Some(season), Some(episode)) = (season, episode) {
        if let Some((file, _)) = match_episode(files, season, episode) {
            return Some(file);
        }
        debug!(
            season = season,
            episode = episode,
            "No episode pattern matched, using largest file"
        );
    }
    largest(&candidate_files(files))
}

/// Score a file name against movie title candidates and year
pub fn score_movie_file(path: &str, titles: &[String], year: Option<u32>) -> i32 {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let title_weight = if year.is_some() {
        TITLE_WEIGHT
    } else {
        TITLE_WEIGHT + YEAR_BONUS as f64
    };

    let overlap = titles
        .iter()
        .map(|t| word_overlap_ratio(t, name))
        .fold(0.0_f64, f64::max);
    let mut score = (overlap * title_weight).round() as i32;

    if let Some(year) = year {
        if contains_word(name, &year.to_string()) {
            score += YEAR_BONUS;
        }
    }
    if is_trailer_file(path) || is_sample_file(path) {
        score -= EXTRA_PENALTY;
    }
    score
}

/// Select the movie file from a multi-file pack.
///
/// Only video files of at least `min_size_bytes` are considered; a single
/// such file is returned directly, otherwise the best scorer at or above
/// [`MOVIE_SCORE_THRESHOLD`] wins (ties go to the closer title, then the
/// larger file).
pub fn select_movie_file<'a>(
    files: &'a [RemoteFile],
    titles: &[String],
    year: Option<u32>,
    min_size_bytes: u64,
) -> Option<&'a RemoteFile> {
    let videos: Vec<&RemoteFile> = files
        .iter()
        .filter(|f| is_video_file(&f.path))
        .filter(|f| f.size_bytes >= min_size_bytes)
        .collect();

    if videos.len() == 1 {
        return videos.first().copied();
    }

    let similarity = |f: &RemoteFile| {
        titles
            .iter()
            .map(|t| title_similarity(t, f.file_name()))
            .fold(0.0_f64, f64::max)
    };

    let mut best: Option<(&RemoteFile, i32, f64)> = None;
    for file in videos {
        let score = score_movie_file(&file.path, titles, year);
        let sim = similarity(file);
        let better = match best {
            None => true,
            Some((current, best_score, best_sim)) => {
                score > best_score
                    || (score == best_score && sim > best_sim)
                    || (score == best_score && sim == best_sim && file.size_bytes > current.size_bytes)
            }
        };
        if better {
            best = Some((file, score, sim));
        }
    }

    match best {
        Some((file, score, _)) if score >= MOVIE_SCORE_THRESHOLD => {
            debug!(file = %file.path, score = score, "Movie pack file selected");
            Some(file)
        }
        Some((file, score, _)) => {
            debug!(
                file = %file.path,
                score = score,
                threshold = MOVIE_SCORE_THRESHOLD,
                "Best movie pack file below threshold"
            );
            None
        }
        None => None,
    }
}
