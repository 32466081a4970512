//! Tag parsing and classification

use semver::{Prerelease, Version};

/// Prerelease markers recognised after the numeric version
const PRERELEASE_MARKERS: &[&str] = &["alpha", "beta", "rc", "dev", "pre", "preview", "snapshot"];

/// Words that mark a tag as an unstable channel wherever they appear
const CHANNEL_WORDS: &[&str] = &["nightly", "edge", "canary", "unstable", "develop", "master", "main"];

/// First segments that mark a branch build
const BRANCH_PREFIXES: &[&str] = &["pr", "pull", "feat", "fix"];

/// Canonical CPU architecture of a tag suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    I386,
}

impl Arch {
    /// Canonicalise an architecture word
    pub fn from_word(word: &str) -> Option<Arch> {
        match word {
            "amd64" | "x86_64" => Some(Arch::Amd64),
            "arm64" | "aarch64" => Some(Arch::Arm64),
            "armv7" | "armhf" | "arm" => Some(Arch::Arm),
            "i386" | "386" => Some(Arch::I386),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
            Arch::I386 => "386",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system family implied by a tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OsFamily {
    #[default]
    Linux,
    Windows,
}

fn is_windows_word(word: &str) -> bool {
    matches!(word, "windowsservercore" | "nanoserver" | "windows") || word.starts_with("ltsc")
}

/// Split a prerelease marker such as `rc1` into `("rc", Some(1))`
fn split_marker(word: &str) -> Option<(&str, Option<u64>)> {
    let digits_at = word.find(|c: char| c.is_ascii_digit()).unwrap_or(word.len());
    let (marker, number) = word.split_at(digits_at);
    if !PRERELEASE_MARKERS.contains(&marker) {
        return None;
    }
    if number.is_empty() {
        return Some((marker, None));
    }
    number.parse().ok().map(|n| (marker, Some(n)))
}

/// Whether a tag names an unstable build.
///
/// True when a segment (split on `. - _ +`) is a channel word or a
/// prerelease marker, or the first segment is a branch prefix. Whole
/// segments only.
pub fn is_prerelease_tag(tag: &str) -> bool {
    let lowered = tag.to_ascii_lowercase();
    let mut segments = lowered
        .split(['.', '-', '_', '+'])
        .filter(|s| !s.is_empty())
        .peekable();

    if segments.peek().is_some_and(|first| BRANCH_PREFIXES.contains(first)) {
        return true;
    }
    segments.any(|segment| CHANNEL_WORDS.contains(&segment) || split_marker(segment).is_some())
}

/// A tag that parsed as a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTag {
    pub raw: String,
    pub version: Version,

    /// Leading `v` or `V`
    pub v_prefix: bool,

    /// Numeric components written in the tag (1 to 3)
    pub components: usize,

    pub prerelease: bool,
    pub arch: Option<Arch>,
    pub os: OsFamily,

    /// Remaining suffix words, e.g. `alpine` or `slim-bookworm`
    pub variant: Option<String>,
}

impl ParsedTag {
    /// Parse a tag; `None` when it carries no usable version
    pub fn parse(tag: &str) -> Option<ParsedTag> {
        let raw = tag.trim();
        let without_build = raw.split_once('+').map_or(raw, |(head, _)| head);

        let (v_prefix, body) = match without_build.strip_prefix(['v', 'V']) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => (true, rest),
            _ => (false, without_build),
        };

        let (numbers, rest) = split_numeric(body)?;
        let mut padded = [0u64; 3];
        padded[..numbers.len()].copy_from_slice(&numbers);

        let suffix = classify_suffix(rest);
        let mut version = Version::new(padded[0], padded[1], padded[2]);
        if let Some(pre) = &suffix.prerelease_id {
            version.pre = Prerelease::new(pre).unwrap_or_else(|_| Prerelease::new("pre").unwrap_or(Prerelease::EMPTY));
        }

        let prerelease = suffix.prerelease_id.is_some() || is_prerelease_tag(raw);
        if prerelease && version.pre.is_empty() {
            // Channel builds sort below the matching release
            version.pre = Prerelease::new(suffix.channel.unwrap_or("pre")).unwrap_or(Prerelease::EMPTY);
        }

        Some(ParsedTag {
            raw: raw.to_string(),
            version,
            v_prefix,
            components: numbers.len(),
            prerelease,
            arch: suffix.arch,
            os: suffix.os,
            variant: suffix.variant,
        })
    }
}

/// Leading `N[.N[.N]]`; more than three components does not parse
fn split_numeric(body: &str) -> Option<(Vec<u64>, &str)> {
    let mut numbers = Vec::new();
    let mut rest = body;
    loop {
        let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        numbers.push(rest[..end].parse::<u64>().ok()?);
        rest = &rest[end..];

        match rest.strip_prefix('.') {
            Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => rest = next,
            _ => break,
        }
    }

    if numbers.len() > 3 {
        return None;
    }
    Some((numbers, rest))
}

#[derive(Debug, Default)]
struct Suffix {
    prerelease_id: Option<String>,
    channel: Option<&'static str>,
    arch: Option<Arch>,
    os: OsFamily,
    variant: Option<String>,
}

fn classify_suffix(rest: &str) -> Suffix {
    let lowered = rest.to_ascii_lowercase().replace("x86_64", "amd64");
    let segments: Vec<&str> = lowered
        .split(['.', '-', '_'])
        .filter(|s| !s.is_empty())
        .collect();

    let mut suffix = Suffix::default();
    let mut variant_words: Vec<String> = Vec::new();
    let mut i = 0;
    while i < segments.len() {
        let segment = segments[i];

        if let Some(arch) = Arch::from_word(segment) {
            suffix.arch = Some(arch);
        } else if is_windows_word(segment) {
            suffix.os = OsFamily::Windows;
        } else if let Some((marker, number)) = split_marker(segment) {
            // `rc.1` keeps its number in the following segment
            let number = number.or_else(|| {
                let next = segments.get(i + 1)?.parse::<u64>().ok()?;
                i += 1;
                Some(next)
            });
            if suffix.prerelease_id.is_none() {
                suffix.prerelease_id = Some(match number {
                    Some(n) => format!("{}.{}", marker, n),
                    None => marker.to_string(),
                });
            }
        } else if let Some(channel) = CHANNEL_WORDS.iter().find(|w| **w == segment) {
            suffix.channel = Some(channel);
        } else {
            let word = segment.trim_end_matches(|c: char| c.is_ascii_digit());
            if !word.is_empty() && !variant_words.iter().any(|w| w == word) {
                variant_words.push(word.to_string());
            }
        }
        i += 1;
    }

    if !variant_words.is_empty() {
        suffix.variant = Some(variant_words.join("-"));
    }
    suffix
}
