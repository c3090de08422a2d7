//! Rendition model and the deterministic preference mapping.
//!
//! Quality labels vary wildly between hosting platforms ("1080p60", "720p",
//! "source", "audio_only", ...). A [`Rendition`] normalizes a label into an
//! optional numeric resolution plus an audio-only flag, and
//! [`select_rendition`] maps a user preference onto whatever is actually
//! available.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Reference resolution for the `high` preference.
const HIGH_REFERENCE: u32 = 720;
/// Reference resolution for the `medium` preference.
const MEDIUM_REFERENCE: u32 = 480;
/// Reference resolution for the `low` preference.
const LOW_REFERENCE: u32 = 240;

/// One concrete quality variant of a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    /// Platform-facing label, e.g. `1080p60` or `audio_only`.
    pub label: String,
    /// Where the rendition's byte stream can be opened.
    pub url: Url,
    /// Numeric vertical resolution, when the label carries one.
    pub resolution: Option<u32>,
    /// Whether this rendition is audio without video.
    pub audio_only: bool,
}

impl Rendition {
    /// Create a rendition, inferring `resolution` and `audio_only` from the
    /// label.
    pub fn new(label: impl Into<String>, url: Url) -> Self {
        let label = label.into();
        let lower = label.to_lowercase();
        let audio_only = lower.contains("audio");
        let resolution = if audio_only {
            None
        } else {
            parse_resolution(&lower)
        };
        Self {
            label,
            url,
            resolution,
            audio_only,
        }
    }

    /// Create the single passthrough rendition used when a platform exposes
    /// no quality ladder.
    pub fn source(url: Url) -> Self {
        Self {
            label: "source".to_string(),
            url,
            resolution: None,
            audio_only: false,
        }
    }
}

/// Extract the leading numeric resolution from a quality label.
///
/// `"1080p60"` -> 1080, `"720p"` -> 720, `"480"` -> 480, `"source"` -> None.
fn parse_resolution(label: &str) -> Option<u32> {
    let digits: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// User-facing quality selector for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RenditionPreference {
    /// Highest numeric resolution available.
    #[default]
    Best,
    /// Lowest numeric resolution available.
    Worst,
    /// Nearest rendition at or below 720.
    High,
    /// Nearest rendition at or below 480.
    Medium,
    /// Nearest rendition at or below 240.
    Low,
    /// The audio-only rendition, falling back to `Worst`.
    AudioOnly,
    /// An explicit resolution target: exact match, else nearest below.
    Exact(u32),
}

impl FromStr for RenditionPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best" => Ok(Self::Best),
            "worst" => Ok(Self::Worst),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "audio-only" | "audio_only" | "audio" => Ok(Self::AudioOnly),
            other => {
                let digits = other.strip_suffix('p').unwrap_or(other);
                digits
                    .parse::<u32>()
                    .map(Self::Exact)
                    .map_err(|_| format!("unknown rendition preference: {s}"))
            }
        }
    }
}

impl fmt::Display for RenditionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => write!(f, "best"),
            Self::Worst => write!(f, "worst"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::AudioOnly => write!(f, "audio-only"),
            Self::Exact(n) => write!(f, "{n}p"),
        }
    }
}

impl TryFrom<String> for RenditionPreference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RenditionPreference> for String {
    fn from(value: RenditionPreference) -> Self {
        value.to_string()
    }
}

/// Map a preference onto the available renditions.
///
/// The mapping is deterministic given a fixed rendition list; ties between
/// equal resolutions keep the first listed rendition. When no video
/// rendition satisfies the rule, the first listed rendition is the final
/// fallback, so a probe that returned anything at all always yields a
/// selection. Returns `None` only for an empty list.
pub fn select_rendition<'a>(
    renditions: &'a [Rendition],
    pref: RenditionPreference,
) -> Option<&'a Rendition> {
    let chosen = match pref {
        RenditionPreference::Best => highest(renditions),
        RenditionPreference::Worst => lowest(renditions),
        RenditionPreference::AudioOnly => renditions
            .iter()
            .find(|r| r.audio_only)
            .or_else(|| lowest(renditions)),
        RenditionPreference::High => tiered(renditions, HIGH_REFERENCE),
        RenditionPreference::Medium => tiered(renditions, MEDIUM_REFERENCE),
        RenditionPreference::Low => tiered(renditions, LOW_REFERENCE),
        RenditionPreference::Exact(target) => {
            at_or_below(renditions, target).or_else(|| lowest(renditions))
        }
    };

    chosen.or_else(|| renditions.first())
}

fn videos(renditions: &[Rendition]) -> impl Iterator<Item = &Rendition> {
    renditions
        .iter()
        .filter(|r| !r.audio_only && r.resolution.is_some())
}

/// Highest-resolution video rendition, first listed wins ties.
fn highest(renditions: &[Rendition]) -> Option<&Rendition> {
    videos(renditions).fold(None, |acc: Option<&Rendition>, r| match acc {
        Some(a) if a.resolution >= r.resolution => Some(a),
        _ => Some(r),
    })
}

/// Lowest-resolution video rendition, first listed wins ties.
fn lowest(renditions: &[Rendition]) -> Option<&Rendition> {
    videos(renditions).fold(None, |acc: Option<&Rendition>, r| match acc {
        Some(a) if a.resolution <= r.resolution => Some(a),
        _ => Some(r),
    })
}

/// Nearest video rendition at or below `cap`, first listed wins ties.
fn at_or_below(renditions: &[Rendition], cap: u32) -> Option<&Rendition> {
    videos(renditions)
        .filter(|r| r.resolution.is_some_and(|res| res <= cap))
        .fold(None, |acc: Option<&Rendition>, r| match acc {
            Some(a) if a.resolution >= r.resolution => Some(a),
            _ => Some(r),
        })
}

/// `high`/`medium`/`low` rule: nearest at or below the reference; if none
/// qualifies, the highest available resolution is the fallback tier.
fn tiered(renditions: &[Rendition], reference: u32) -> Option<&Rendition> {
    at_or_below(renditions, reference).or_else(|| highest(renditions))
}
