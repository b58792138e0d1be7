use std::fs::File;
use std::io::Write;
use std::path::Path;

use regex::Regex;

use crate::error::Result;

const MIN_CAPTION_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct CaptionSettings {
    pub words_per_caption: usize,
    pub max_line_chars: usize,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            words_per_caption: 8,
            max_line_chars: 50,
        }
    }
}

/// Allocates caption timing proportional to character count. This is a
/// deliberate approximation: without a forced-alignment signal there is no
/// way to account for speech-rate variation, so longer captions simply get
/// proportionally more screen time. Pure function, safe for dry previews.
pub fn time_captions(
    text: &str,
    total_duration: f64,
    settings: &CaptionSettings,
) -> Vec<CaptionSegment> {
    let cleaned = normalize_text(text);
    let pieces = split_into_captions(&cleaned, settings);
    if pieces.is_empty() || total_duration <= 0.0 {
        return Vec::new();
    }

    let total_chars: usize = pieces.iter().map(|p| p.chars().count()).sum();
    let mut segments = Vec::with_capacity(pieces.len());
    let mut current = 0.0_f64;
    for piece in &pieces {
        if current >= total_duration {
            // Out of audio; remaining captions are dropped by design.
            break;
        }
        let ratio = if total_chars > 0 {
            piece.chars().count() as f64 / total_chars as f64
        } else {
            1.0 / pieces.len() as f64
        };
        let duration = (total_duration * ratio).max(MIN_CAPTION_SECONDS);
        let end = (current + duration).min(total_duration);
        segments.push(CaptionSegment {
            start: current,
            end,
            text: piece.clone(),
        });
        current = end;
    }
    segments
}

fn normalize_text(text: &str) -> String {
    let bold = Regex::new(r"\*\*([^*]+)\*\*").unwrap();
    let italic = Regex::new(r"\*([^*]+)\*").unwrap();
    let underscore = Regex::new(r"_([^_]+)_").unwrap();
    let bracketed = Regex::new(r"\[.*?\]|\(.*?\)").unwrap();
    let whitespace = Regex::new(r"\s+").unwrap();

    let text = bold.replace_all(text, "$1");
    let text = italic.replace_all(&text, "$1");
    let text = underscore.replace_all(&text, "$1");
    let text = bracketed.replace_all(&text, "");
    whitespace.replace_all(&text, " ").trim().to_string()
}

fn split_into_captions(text: &str, settings: &CaptionSettings) -> Vec<String> {
    let sentence_end = Regex::new(r"[.!?]+").unwrap();
    let mut captions = Vec::new();
    for sentence in sentence_end.split(text) {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        for group in words.chunks(settings.words_per_caption.max(1)) {
            let caption = group.join(" ");
            if caption.is_empty() {
                continue;
            }
            if caption.len() > settings.max_line_chars {
                captions.push(wrap_lines(&caption, settings.max_line_chars).join("\n"));
            } else {
                captions.push(caption);
            }
        }
    }
    captions
}

fn wrap_lines(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(current.clone());
            current.clear();
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub fn write_srt(path: &Path, segments: &[CaptionSegment]) -> Result<()> {
    let mut f = File::create(path)?;
    for (i, segment) in segments.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(
            f,
            "{} --> {}",
            format_srt_time(segment.start),
            format_srt_time(segment.end)
        )?;
        for line in segment.text.lines() {
            writeln!(f, "{line}")?;
        }
        writeln!(f)?;
    }
    Ok(())
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}
