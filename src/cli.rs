//! Minimal CLI parsing for one-shot resolutions.

use std::env;

use anyhow::{Context, Result, bail};

pub const USAGE: &str = "usage:
  debrid-resolver stream <magnet-or-hash> [<season> <episode>]
  debrid-resolver series <hash> <series-id> <season> <episode>
  debrid-resolver movie <hash> [--year <year>] [--refresh] <title>...";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Stream {
        target: String,
        episode: Option<(u32, u32)>,
    },
    Series {
        info_hash: String,
        series_id: String,
        season: u32,
        episode: u32,
    },
    Movie {
        info_hash: String,
        titles: Vec<String>,
        year: Option<u32>,
        force_refresh: bool,
    },
}

impl Command {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let command = args.next().context("missing command")?;
        match command.as_str() {
            "stream" => {
                let target = args.next().context("missing magnet or hash")?;
                let episode = match (args.next(), args.next()) {
                    (Some(s), Some(e)) => Some((number(&s, "season")?, number(&e, "episode")?)),
                    (None, None) => None,
                    _ => bail!("season and episode must be given together"),
                };
                Ok(Command::Stream { target, episode })
            }
            "series" => {
                let info_hash = args.next().context("missing hash")?;
                let series_id = args.next().context("missing series id")?;
                let season = number(&args.next().context("missing season")?, "season")?;
                let episode = number(&args.next().context("missing episode")?, "episode")?;
                Ok(Command::Series {
                    info_hash,
                    series_id,
                    season,
                    episode,
                })
            }
            "movie" => {
                let info_hash = args.next().context("missing hash")?;
                let mut titles = Vec::new();
                let mut year = None;
                let mut force_refresh = false;
                while let Some(arg) = args.next() {
                    match arg.as_str() {
                        "--refresh" => force_refresh = true,
                        "--year" => {
                            let value = args.next().context("missing value for --year")?;
                            year = Some(number(&value, "year")?);
                        }
                        _ if arg.starts_with("--year=") => {
                            if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                                year = Some(number(value, "year")?);
                            }
                        }
                        _ => titles.push(arg),
                    }
                }
                if titles.is_empty() {
                    bail!("at least one title is required");
                }
                Ok(Command::Movie {
                    info_hash,
                    titles,
                    year,
                    force_refresh,
                })
            }
            other => bail!("unknown command: {}", other),
        }
    }
}

fn number(value: &str, what: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("invalid {}: {}", what, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command> {
        Command::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_stream_with_episode() {
        let cmd = parse(&["stream", "abc", "1", "5"]).unwrap();
        assert_eq!(
            cmd,
            Command::Stream {
                target: "abc".into(),
                episode: Some((1, 5))
            }
        );
        assert!(parse(&["stream", "abc", "1"]).is_err());
    }

    #[test]
    fn test_movie_flags() {
        let cmd = parse(&["movie", "abc", "--year=1999", "The Matrix", "--refresh"]).unwrap();
        assert_eq!(
            cmd,
            Command::Movie {
                info_hash: "abc".into(),
                titles: vec!["The Matrix".into()],
                year: Some(1999),
                force_refresh: true,
            }
        );
        assert!(parse(&["movie", "abc", "--year", "1999"]).is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse(&["serve"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
