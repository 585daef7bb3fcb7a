//! Line model of a live media playlist.
//!
//! Every original line is kept, line endings included, so a playlist that is
//! not modified renders back byte-for-byte. Segments are indexes into the
//! line list plus the few values splicing needs.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

pub const TAG_EXTINF: &str = "EXTINF";
pub const TAG_PROGRAM_DATE_TIME: &str = "EXT-X-PROGRAM-DATE-TIME";
pub const TAG_DISCONTINUITY: &str = "EXT-X-DISCONTINUITY";
pub const TAG_TARGET_DURATION: &str = "EXT-X-TARGETDURATION";

/// Playlist-level tags. They never open a segment block.
const HEADER_TAGS: &[&str] = &[
    "EXTM3U",
    "EXT-X-VERSION",
    TAG_TARGET_DURATION,
    "EXT-X-MEDIA-SEQUENCE",
    "EXT-X-DISCONTINUITY-SEQUENCE",
    "EXT-X-PLAYLIST-TYPE",
    "EXT-X-INDEPENDENT-SEGMENTS",
    "EXT-X-START",
    "EXT-X-SERVER-CONTROL",
    "EXT-X-PART-INF",
    "EXT-X-ALLOW-CACHE",
    "EXT-X-ENDLIST",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Segment<'a> {
    /// First line of the segment's tag block.
    pub first_line: usize,
    pub uri_line: usize,
    pub pdt_line: Option<usize>,
    pub uri: &'a str,
    /// Declared `#EXTINF` duration in seconds.
    pub duration: Option<f64>,
    /// Explicit `#EXT-X-PROGRAM-DATE-TIME`.
    pub program_date_time: Option<DateTime<Utc>>,
    /// Explicit PDT, else the previous segment's start plus its duration.
    pub start: Option<DateTime<Utc>>,
    pub discontinuity: bool,
}

impl Segment<'_> {
    pub fn end(&self) -> Option<DateTime<Utc>> {
        Some(self.start? + secs_to_duration(self.duration?))
    }
}

#[derive(Debug, Clone)]
pub struct Playlist<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    segments: Vec<Segment<'a>>,
}

impl<'a> Playlist<'a> {
    pub fn parse(source: &'a str) -> Self {
        let lines: Vec<&'a str> = source.split_inclusive('\n').collect();
        let mut segments = Vec::new();

        let mut block_start: Option<usize> = None;
        let mut pdt_line = None;
        let mut duration = None;
        let mut program_date_time = None;
        let mut discontinuity = false;

        for (idx, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(tag) = line.strip_prefix('#') {
                let (name, value) = tag.split_once(':').unwrap_or((tag, ""));
                if HEADER_TAGS.contains(&name) {
                    continue;
                }
                block_start.get_or_insert(idx);
                match name {
                    TAG_EXTINF => duration = parse_extinf(value),
                    TAG_PROGRAM_DATE_TIME => {
                        pdt_line = Some(idx);
                        program_date_time = parse_pdt(value);
                    }
                    TAG_DISCONTINUITY => discontinuity = true,
                    _ => {}
                }
                continue;
            }

            segments.push(Segment {
                first_line: block_start.take().unwrap_or(idx),
                uri_line: idx,
                pdt_line: pdt_line.take(),
                uri: line,
                duration: duration.take(),
                program_date_time: program_date_time.take(),
                start: None,
                discontinuity: std::mem::take(&mut discontinuity),
            });
        }

        let mut prev_end: Option<DateTime<Utc>> = None;
        for seg in &mut segments {
            seg.start = seg.program_date_time.or(prev_end);
            prev_end = seg.end();
        }

        Self {
            source,
            lines,
            segments,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Raw lines, line endings included.
    pub fn lines(&self) -> &[&'a str] {
        &self.lines
    }

    pub fn segments(&self) -> &[Segment<'a>] {
        &self.segments
    }

    pub fn target_duration(&self) -> Option<u64> {
        self.lines.iter().find_map(|l| {
            l.trim()
                .strip_prefix("#EXT-X-TARGETDURATION:")
                .and_then(|v| v.trim().parse().ok())
        })
    }

    pub fn has_program_date_time(&self) -> bool {
        self.segments.iter().any(|s| s.program_date_time.is_some())
    }

    /// Line terminator to use for inserted lines.
    pub fn newline(&self) -> &'static str {
        if self.source.contains("\r\n") { "\r\n" } else { "\n" }
    }

    pub fn render(&self) -> String {
        self.lines.concat()
    }
}

fn parse_extinf(value: &str) -> Option<f64> {
    let secs: f64 = value.split(',').next()?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Parse a program-date-time value: RFC 3339 with fractional seconds and
/// any offset, or the `+hhmm` offset form.
pub fn parse_pdt(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Millisecond precision, `Z` suffix.
pub fn format_pdt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

pub fn duration_to_secs(d: Duration) -> f64 {
    d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}
