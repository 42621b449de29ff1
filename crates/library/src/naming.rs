use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};

use crate::LibraryError;

/// Edition label and its sort rank among same-title variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cut {
    pub label: Option<String>,
    pub rank: u32,
}

#[derive(Debug, Clone)]
struct CutPattern {
    regex: Regex,
    label: &'static str,
    rank: u32,
}

const CUTS: [(&str, &str, u32); 7] = [
    (r"director'?s[ ._-]*cut", "Director's Cut", 1),
    (r"final[ ._-]*cut", "Final Cut", 2),
    (r"extended([ ._-]*(cut|edition))?", "Extended Cut", 3),
    (r"international[ ._-]*theatrical", "International Theatrical", 4),
    (r"special[ ._-]*edition", "Special Edition", 5),
    (r"unrated", "Unrated", 6),
    (r"theatrical([ ._-]*cut)?", "Theatrical Cut", 7),
];

/// Filename patterns, compiled once per rebuild.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    annotated_cut: Regex,
    cuts: Vec<CutPattern>,
    episode: Regex,
    special: Regex,
    season_dir: Regex,
    token_3d: Regex,
}

impl NamePatterns {
    pub fn new() -> Result<Self, LibraryError> {
        let mut cuts = Vec::with_capacity(CUTS.len());
        for (pattern, label, rank) in CUTS {
            let regex = RegexBuilder::new(&format!(r"\b{}\b", pattern))
                .case_insensitive(true)
                .build()?;
            cuts.push(CutPattern { regex, label, rank });
        }
        Ok(Self {
            annotated_cut: Regex::new(r"\((\d+)#([^)]+)\)")?,
            cuts,
            episode: RegexBuilder::new(r"S(\d{1,2})E(\d{1,3})")
                .case_insensitive(true)
                .build()?,
            special: Regex::new(r"-M(\d{1,3})-")?,
            season_dir: RegexBuilder::new(
                r"^((season|series|staffel|saison)[ ._-]*\d+|s\d{1,2}|specials)$",
            )
            .case_insensitive(true)
            .build()?,
            token_3d: Regex::new(r"(^|[^A-Za-z0-9])3D([^A-Za-z0-9]|$)")?,
        })
    }

    /// First matching edition tag wins; an explicit `(n#label)` annotation is
    /// checked before the known names.
    pub fn parse_cut(&self, name: &str) -> Cut {
        if let Some(caps) = self.annotated_cut.captures(name) {
            if let Ok(rank) = caps[1].parse::<u32>() {
                return Cut {
                    label: Some(caps[2].trim().to_string()),
                    rank,
                };
            }
        }
        for pattern in &self.cuts {
            if pattern.regex.is_match(name) {
                return Cut {
                    label: Some(pattern.label.to_string()),
                    rank: pattern.rank,
                };
            }
        }
        Cut {
            label: None,
            rank: 0,
        }
    }

    /// `(season, episode)` from an `SxxEyy` tag, or `(0, n)` for `-Mnn-`
    /// specials.
    pub fn parse_episode(&self, text: &str) -> Option<(u32, u32)> {
        if let Some(caps) = self.episode.captures(text) {
            let season = caps[1].parse().ok()?;
            let episode = caps[2].parse().ok()?;
            return Some((season, episode));
        }
        let caps = self.special.captures(text)?;
        Some((0, caps[1].parse().ok()?))
    }

    pub fn is_season_dir(&self, name: &str) -> bool {
        self.season_dir.is_match(name.trim())
    }

    pub fn has_3d_token(&self, name: &str) -> bool {
        self.token_3d.is_match(name)
    }
}

pub const STREAM_SUFFIX_LIMIT: u32 = 10;

/// Rendition file names to probe for a source stem, in order.
pub fn stream_candidates(stem: &str) -> Vec<String> {
    let mut variants: Vec<String> = vec![stem.to_string()];
    for (from, to) in [("4K", "2K"), ("3D", "2D")] {
        if stem.contains(from) {
            let variant = stem.replace(from, to);
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }

    let mut candidates = Vec::new();
    for variant in &variants {
        candidates.push(format!("{}.mpd", variant));
        for n in 1..=STREAM_SUFFIX_LIMIT {
            candidates.push(format!("{}-{}.mpd", variant, n));
        }
    }
    candidates
}

pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Sort key with a leading article removed, lowercased.
pub fn title_sort_key(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    for article in ["the ", "a ", "an "] {
        if let Some(rest) = lower.strip_prefix(article) {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    lower
}

/// Natural ordering: digit runs compare by value.
pub fn compare_titles(a: &str, b: &str) -> Ordering {
    let left = title_sort_key(a);
    let right = title_sort_key(b);
    let mut lhs = left.chars().peekable();
    let mut rhs = right.chars().peekable();
    loop {
        match (lhs.peek().copied(), rhs.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let first = take_number(&mut lhs);
                let second = take_number(&mut rhs);
                let ordering = compare_digit_runs(&first, &second);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(x), Some(y)) => {
                let ordering = x.cmp(&y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
                lhs.next();
                rhs.next();
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(ch) = chars.peek().copied() {
        if !ch.is_ascii_digit() {
            break;
        }
        digits.push(ch);
        chars.next();
    }
    digits
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
