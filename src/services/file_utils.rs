//! Shared file utility functions
//!
//! Extension checks and size formatting used by the matcher and the pack
//! cache.

/// Video file extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".ts", ".m2ts", ".mpg",
    ".mpeg",
];

/// Whether the path ends in a known video extension (case-insensitive)
///
/// ```
/// use debrid_resolver::services::file_utils::is_video_file;
/// assert!(is_video_file("Show/Show.S01E01.MKV"));
/// assert!(!is_video_file("Show/Show.S01E01.srt"));
/// ```
pub fn is_video_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Check if a path looks like a sample clip
pub fn is_sample_file(path: &str) -> bool {
    path.to_lowercase().contains("sample")
}

/// Check if a path looks like a trailer or other promo extra
pub fn is_trailer_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.contains("trailer") || lower.contains("teaser")
}

/// Video files that are not samples
pub fn is_playable_video(path: &str) -> bool {
    is_video_file(path) && !is_sample_file(path)
}

/// Binary-unit size for log lines
///
/// ```
/// use debrid_resolver::services::file_utils::format_bytes;
/// assert_eq!(format_bytes(50 * 1024 * 1024), "50.0 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_extensions() {
        assert!(is_video_file("Pack/Show.S01E01.1080p.ts"));
        assert!(is_video_file("movie.M2TS"));
        assert!(!is_video_file("Pack/cover.jpg"));
        assert!(!is_video_file("Pack/Show.S01E01.nfo"));
        assert!(!is_video_file("mkv"));
    }

    #[test]
    fn test_sample_and_trailer_detection() {
        assert!(is_sample_file("Movie.2020/Sample/movie-sample.mkv"));
        assert!(is_sample_file("SAMPLE.mkv"));
        assert!(!is_sample_file("Movie.2020.1080p.mkv"));
        assert!(is_trailer_file("Extras/Trailer.mp4"));
        assert!(!is_trailer_file("Movie.2020.mkv"));
        assert!(!is_playable_video("sample.mkv"));
        assert!(is_playable_video("Movie.mkv"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(700 * 1024 * 1024), "700.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 * 1024), "3.0 TB");
    }
}
