// LRC lyric parsing and "which line is active right now" lookup

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    pub time: f64, // seconds from start
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lyric {
    lines: Vec<LyricLine>,
}

fn time_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\[(\d{1,3}):(\d{1,2}(?:[.:]\d{1,3})?)\]").expect("static regex"))
}

fn offset_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?i)^\[offset:\s*([+-]?\d+)\s*\]").expect("static regex"))
}

impl Lyric {
    /// Parse LRC text. Lines may carry several time tags (`[00:12.30][01:40.00]chorus`);
    /// metadata tags other than `[offset:...]` are ignored, as are untimed lines.
    pub fn parse(raw: &str) -> Self {
        let mut offset = 0.0;
        let mut lines = Vec::new();

        for line in raw.lines() {
            let line = line.trim();
            if let Some(caps) = offset_tag().captures(line) {
                // positive offset means lyrics show up earlier
                offset = caps[1].parse::<f64>().unwrap_or(0.0) / 1000.0;
                continue;
            }

            let mut times = Vec::new();
            let mut text_start = 0;
            for caps in time_tag().captures_iter(line) {
                let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                // tags only count while they are contiguous at the start of the line
                if whole.start != text_start {
                    break;
                }
                text_start = whole.end;
                let minutes: f64 = caps[1].parse().unwrap_or(0.0);
                let seconds: f64 = caps[2].replace(':', ".").parse().unwrap_or(0.0);
                times.push(minutes * 60.0 + seconds);
            }

            let text = line[text_start..].trim();
            for time in times {
                lines.push(LyricLine {
                    time: (time - offset).max(0.0),
                    text: text.to_string(),
                });
            }
        }

        lines.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn line(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    /// Index of the last line whose timestamp has been reached
    pub fn index_at(&self, seconds: f64) -> Option<usize> {
        let reached = self.lines.partition_point(|l| l.time <= seconds);
        reached.checked_sub(1)
    }
}
