// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! Configuration file format and the compiled runtime [`Config`].
//!
//! The on-disk shape ([`ConfigFile`] and friends) is deserialized with
//! `serde`/`serde_json`, then [`compile`] turns it into the form the
//! scheduler and station workers actually use: recurrence strings are
//! parsed into [`recur::Predicate`] trees up front, so a malformed DSL
//! string is a fatal configuration error rather than a surprise at the
//! programme's first occurrence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base::{bail, Error, ErrorKind, ResultExt};
use serde::Deserialize;

/// Top-level configuration file object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub destination_path: PathBuf,
    pub timeout_direct: u64,
    pub timeout_playlist: u64,
    pub schedule: Vec<StationConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    pub identifier: String,
    pub strategy: StrategyConfig,
    pub url: String,
    #[serde(default)]
    pub programmes: Vec<ProgrammeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgrammeConfig {
    pub identifier: String,
    pub recurrence: String,
    pub duration_minutes: u64,
}

/// `"direct"` or `"m3u"`; deserialized through a custom string match (rather
/// than serde's default enum representation) so an unrecognized value
/// produces an [`ErrorKind::InvalidArgument`] naming the bad string, instead
/// of serde's generic "unknown variant" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyConfig {
    Direct,
    M3u,
}

impl<'de> Deserialize<'de> for StrategyConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "direct" => Ok(StrategyConfig::Direct),
            "m3u" => Ok(StrategyConfig::M3u),
            _ => Err(serde::de::Error::custom(format!(
                "strategy must be \"direct\" or \"m3u\", got {s:?}"
            ))),
        }
    }
}

/// A station's fetch strategy, compiled from [`StrategyConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Playlist,
}

/// A station: a long-lived HTTP stream, optionally reached through a
/// playlist indirection.
#[derive(Debug, Clone)]
pub struct Station {
    pub name: String,
    pub source_url: String,
    pub strategy: Strategy,
    pub timeout_direct: Duration,
    pub timeout_playlist: Duration,
}

/// A named recurring recording window: which station, how often, how long.
#[derive(Debug)]
pub struct Programme {
    pub station_index: usize,
    pub name: String,
    pub recurrence: recur::Predicate,
    pub duration: Duration,
}

/// The compiled, validated configuration the scheduler and station workers
/// run from. Stations and programmes retain declaration order; programme
/// indices are assigned densely across the whole file, so a
/// `ScheduledEvent.programme_index` is a stable global identifier.
#[derive(Debug)]
pub struct Config {
    pub destination_path: PathBuf,
    pub stations: Vec<Station>,
    pub programmes: Vec<Programme>,
}

/// Reads and parses the configuration file at `path`, then compiles it.
pub fn load(path: &Path) -> Result<Config, Error> {
    let bytes = std::fs::read(path).err_kind(ErrorKind::NotFound)?;
    let file: ConfigFile = serde_json::from_slice(&bytes).err_kind(ErrorKind::InvalidArgument)?;
    compile(file)
}

/// Compiles a deserialized [`ConfigFile`] into a runtime [`Config`], parsing
/// every programme's recurrence string and rejecting unknown strategies.
pub fn compile(file: ConfigFile) -> Result<Config, Error> {
    if file.schedule.is_empty() {
        bail!(InvalidArgument, msg("configuration declares no stations"));
    }

    let mut stations = Vec::with_capacity(file.schedule.len());
    let mut programmes = Vec::new();
    for station_cfg in file.schedule {
        let station_index = stations.len();
        for programme_cfg in station_cfg.programmes {
            let recurrence = recur::parse(&programme_cfg.recurrence).map_err(|e| {
                base::err!(
                    InvalidArgument,
                    msg(
                        "station {:?} programme {:?}: {}",
                        station_cfg.identifier, programme_cfg.identifier, e
                    )
                )
            })?;
            programmes.push(Programme {
                station_index,
                name: programme_cfg.identifier,
                recurrence,
                duration: Duration::from_secs(programme_cfg.duration_minutes * 60),
            });
        }
        stations.push(Station {
            name: station_cfg.identifier,
            source_url: station_cfg.url,
            strategy: match station_cfg.strategy {
                StrategyConfig::Direct => Strategy::Direct,
                StrategyConfig::M3u => Strategy::Playlist,
            },
            timeout_direct: Duration::from_secs(file.timeout_direct),
            timeout_playlist: Duration::from_secs(file.timeout_playlist),
        });
    }

    Ok(Config { destination_path: file.destination_path, stations, programmes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "destinationPath": "/tmp/wavevault",
            "timeoutDirect": 30,
            "timeoutPlaylist": 10,
            "schedule": [
                {
                    "identifier": "wdr5",
                    "strategy": "direct",
                    "url": "http://example.invalid/stream.mp3",
                    "programmes": [
                        {"identifier": "morning", "recurrence": "(8H & 0M)", "durationMinutes": 60}
                    ]
                },
                {
                    "identifier": "bbc",
                    "strategy": "m3u",
                    "url": "http://example.invalid/playlist.m3u",
                    "programmes": [
                        {"identifier": "news", "recurrence": "16:30", "durationMinutes": 15}
                    ]
                }
            ]
        }"#
    }

    #[test]
    fn compiles_stations_and_programmes_in_order() {
        let file: ConfigFile = serde_json::from_str(sample_json()).unwrap();
        let config = compile(file).unwrap();
        assert_eq!(config.stations.len(), 2);
        assert_eq!(config.programmes.len(), 2);
        assert_eq!(config.stations[0].name, "wdr5");
        assert_eq!(config.stations[0].strategy, Strategy::Direct);
        assert_eq!(config.stations[1].strategy, Strategy::Playlist);
        assert_eq!(config.programmes[0].station_index, 0);
        assert_eq!(config.programmes[1].station_index, 1);
        assert_eq!(config.programmes[1].duration, Duration::from_secs(15 * 60));
    }

    #[test]
    fn rejects_bad_strategy() {
        let json = sample_json().replace("\"m3u\"", "\"carrier-pigeon\"");
        let err = serde_json::from_str::<ConfigFile>(&json).unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn rejects_bad_recurrence() {
        let json = sample_json().replace("(8H & 0M)", "not a recurrence");
        let file: ConfigFile = serde_json::from_str(&json).unwrap();
        let err = compile(file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("wdr5"));
    }

    #[test]
    fn rejects_empty_schedule() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"destinationPath":"/tmp","timeoutDirect":1,"timeoutPlaylist":1,"schedule":[]}"#,
        )
        .unwrap();
        compile(file).unwrap_err();
    }
}
