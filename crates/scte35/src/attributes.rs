//! Cue recovery from HLS playlist tags.
//!
//! Tags that embed a binary section are decoded through the binary path first.
//! `EXT-X-DATERANGE` falls back to its own attributes when that fails; the
//! other tags only carry what their attributes say.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::signal::{
    AttributeCue, CommandType, CueCore, CueKind, CueSignal, parse_payload, random_signal_id,
};
use crate::time::seconds_to_ticks;
use crate::{ParseError, Result};

pub const TAG_CUE_OUT: &str = "EXT-X-CUE-OUT";
pub const TAG_CUE_OUT_CONT: &str = "EXT-X-CUE-OUT-CONT";
pub const TAG_CUE_IN: &str = "EXT-X-CUE-IN";
pub const TAG_DATERANGE: &str = "EXT-X-DATERANGE";
pub const TAG_OATCLS: &str = "EXT-OATCLS-SCTE35";
pub const TAG_SCTE35: &str = "EXT-X-SCTE35";

/// Whether a playlist line is one of the cue tags understood here.
pub fn is_cue_tag(line: &str) -> bool {
    let Some(name) = tag_name(line) else {
        return false;
    };
    match name {
        TAG_CUE_OUT | TAG_CUE_OUT_CONT | TAG_CUE_IN | TAG_OATCLS | TAG_SCTE35 => true,
        // Only SCTE-35 bearing date ranges are cues.
        TAG_DATERANGE => line.contains("SCTE35-"),
        _ => false,
    }
}

fn tag_name(line: &str) -> Option<&str> {
    let body = line.trim().strip_prefix('#')?;
    Some(body.split_once(':').map_or(body, |(name, _)| name))
}

/// Split an attribute list on commas outside quotes.
///
/// Keys are trimmed and values lose their surrounding quotes. Entries without
/// `=` keep an empty key so positional values (`#EXT-X-CUE-OUT:30`) survive.
pub fn split_attributes(rest: &str) -> Vec<(&str, &str)> {
    let mut parts: Vec<&str> = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < rest.len() {
        parts.push(rest[start..].trim());
    }

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|part| {
            let (key, val) = part.split_once('=').unwrap_or(("", part));
            let mut val = val.trim();
            if let Some(stripped) = val.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                val = stripped;
            }
            (key.trim(), val)
        })
        .collect()
}

fn find_attr<'a>(attrs: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

fn parse_seconds(name: &str, value: &str) -> Result<f64> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| ParseError::attribute(name, format!("not a number: {value:?}")))?;
    if !secs.is_finite() {
        return Err(ParseError::attribute(name, "not finite"));
    }
    Ok(secs)
}

/// Decode a section written as `0x`-prefixed hex, bare hex or base64.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    let payload = payload.trim().trim_matches('"');
    if let Some(hex_part) = payload
        .strip_prefix("0x")
        .or_else(|| payload.strip_prefix("0X"))
    {
        return hex::decode(hex_part).map_err(|e| ParseError::InvalidPayloadEncoding(e.to_string()));
    }
    // A section always starts with table_id 0xFC, which base64 never spells.
    if payload.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("fc"))
        && let Ok(bytes) = hex::decode(payload)
    {
        return Ok(bytes);
    }
    STANDARD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|e| ParseError::InvalidPayloadEncoding(e.to_string()))
}

/// Parse an `EXT-X-PROGRAM-DATE-TIME` / `START-DATE` value.
///
/// Accepts RFC 3339 with fractional seconds and any UTC offset, plus the
/// `+hhmm` offset form some packagers write.
pub fn parse_program_date_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn attribute_cue(tag: &str, command_type: CommandType, kind: CueKind) -> AttributeCue {
    let mut core = CueCore::new(random_signal_id(), command_type, kind);
    core.out_of_network = match kind {
        CueKind::BreakStart | CueKind::Continuation => Some(true),
        CueKind::BreakEnd => Some(false),
        CueKind::Other => None,
    };
    AttributeCue {
        core,
        tag: tag.to_string(),
        line: String::new(),
        planned_duration_used: false,
        start_date_raw: None,
    }
}

/// Decode one cue-bearing playlist line.
pub fn parse_tag_line(line: &str) -> Result<CueSignal> {
    let line = line.trim();
    let body = line
        .strip_prefix('#')
        .ok_or_else(|| ParseError::UnrecognizedTag(line.to_string()))?;
    let (name, rest) = body.split_once(':').unwrap_or((body, ""));

    let mut signal = match name {
        TAG_CUE_OUT => parse_cue_out(rest),
        TAG_CUE_IN => Ok(CueSignal::Attribute(attribute_cue(
            TAG_CUE_IN,
            CommandType::SpliceInsert,
            CueKind::BreakEnd,
        ))),
        TAG_CUE_OUT_CONT => parse_cue_out_cont(rest),
        TAG_DATERANGE => parse_daterange(rest),
        TAG_OATCLS => parse_payload(rest),
        TAG_SCTE35 => {
            let attrs = split_attributes(rest);
            let cue = find_attr(&attrs, "CUE")
                .ok_or_else(|| ParseError::attribute("CUE", "missing"))?;
            parse_payload(cue)
        }
        _ => Err(ParseError::UnrecognizedTag(name.to_string())),
    }?;
    if let CueSignal::Attribute(cue) = &mut signal {
        cue.line = line.to_string();
    }
    Ok(signal)
}

fn parse_cue_out(rest: &str) -> Result<CueSignal> {
    let mut cue = attribute_cue(TAG_CUE_OUT, CommandType::SpliceInsert, CueKind::BreakStart);
    let attrs = split_attributes(rest);
    let duration = find_attr(&attrs, "DURATION").or_else(|| find_attr(&attrs, ""));
    if let Some(value) = duration {
        cue.core.break_duration_ticks = Some(seconds_to_ticks(parse_seconds("DURATION", value)?));
    }
    Ok(CueSignal::Attribute(cue))
}

fn parse_cue_out_cont(rest: &str) -> Result<CueSignal> {
    let mut cue = attribute_cue(
        TAG_CUE_OUT_CONT,
        CommandType::SpliceInsert,
        CueKind::Continuation,
    );
    let attrs = split_attributes(rest);
    // Either `ElapsedTime=5,Duration=30` or the short `5/30` form.
    let duration = find_attr(&attrs, "Duration").or_else(|| {
        find_attr(&attrs, "")
            .and_then(|v| v.split_once('/'))
            .map(|(_, total)| total)
    });
    if let Some(value) = duration {
        cue.core.break_duration_ticks = Some(seconds_to_ticks(parse_seconds("Duration", value)?));
    }
    Ok(CueSignal::Attribute(cue))
}

fn parse_daterange(rest: &str) -> Result<CueSignal> {
    let attrs = split_attributes(rest);
    let (attr, command_type, kind) = if let Some(v) = find_attr(&attrs, "SCTE35-OUT") {
        (v, CommandType::SpliceInsert, CueKind::BreakStart)
    } else if let Some(v) = find_attr(&attrs, "SCTE35-IN") {
        (v, CommandType::SpliceInsert, CueKind::BreakEnd)
    } else if let Some(v) = find_attr(&attrs, "SCTE35-CMD") {
        (v, CommandType::TimeSignal, CueKind::Other)
    } else {
        return Err(ParseError::UnrecognizedTag(TAG_DATERANGE.to_string()));
    };

    let start_raw = find_attr(&attrs, "START-DATE");
    let start_pdt = start_raw.and_then(parse_program_date_time);

    match parse_payload(attr) {
        Ok(signal) => {
            return Ok(match start_pdt {
                Some(pdt) => signal.with_start_pdt(pdt),
                None => signal,
            });
        }
        Err(e) if e.allows_attribute_fallback() => {
            debug!(error = %e, "DATERANGE payload undecodable, using attributes");
        }
        Err(e) => return Err(e),
    }

    let mut cue = attribute_cue(TAG_DATERANGE, command_type, kind);
    if let Some(value) = find_attr(&attrs, "DURATION") {
        cue.core.break_duration_ticks = Some(seconds_to_ticks(parse_seconds("DURATION", value)?));
    } else if let Some(value) = find_attr(&attrs, "PLANNED-DURATION") {
        cue.core.break_duration_ticks =
            Some(seconds_to_ticks(parse_seconds("PLANNED-DURATION", value)?));
        cue.planned_duration_used = true;
    }
    cue.core.start_pdt = start_pdt;
    if start_pdt.is_none() {
        cue.start_date_raw = start_raw.map(str::to_string);
    }
    Ok(CueSignal::Attribute(cue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CueSource;

    const SPLICE_INSERT_B64: &str =
        "/DAvAAAAAAAA///wFAVIAACPf+/+c2nALv4AUsz1AAAAAAAKAAhDVUVJAAABNWLbowo=";

    fn attribute(signal: &CueSignal) -> &AttributeCue {
        match signal {
            CueSignal::Attribute(a) => a,
            other => panic!("expected attribute cue, got {other:?}"),
        }
    }

    #[test]
    fn splitter_keeps_quoted_commas() {
        let attrs = split_attributes(r#"ID="a,b",DURATION=30.5, CLASS="x""#);
        assert_eq!(
            attrs,
            vec![("ID", "a,b"), ("DURATION", "30.5"), ("CLASS", "x")]
        );
        assert_eq!(split_attributes("30"), vec![("", "30")]);
    }

    #[test]
    fn cue_out_positional_and_named() {
        for line in ["#EXT-X-CUE-OUT:30", "#EXT-X-CUE-OUT:DURATION=30.000"] {
            let signal = parse_tag_line(line).unwrap();
            assert_eq!(signal.source(), CueSource::AttributeDecoded);
            assert!(signal.is_break_start());
            assert_eq!(signal.duration_ticks(), Some(2_700_000), "{line}");
            assert_eq!(signal.event_id(), None);
            assert_eq!(signal.crc_valid(), None);
            assert!(signal.id().starts_with("sig-"));
        }
    }

    #[test]
    fn cue_out_without_duration_is_kept_for_validation() {
        let signal = parse_tag_line("#EXT-X-CUE-OUT").unwrap();
        assert!(signal.is_break_start());
        assert_eq!(signal.duration_ticks(), None);
    }

    #[test]
    fn attribute_cue_keeps_trimmed_line() {
        let signal = parse_tag_line("  #EXT-X-CUE-OUT:30\r\n").unwrap();
        assert_eq!(attribute(&signal).line, "#EXT-X-CUE-OUT:30");
    }

    #[test]
    fn day_long_cue_out_does_not_wrap() {
        let signal = parse_tag_line("#EXT-X-CUE-OUT:108000").unwrap();
        assert_eq!(signal.duration_ticks(), Some(crate::PTS_MODULUS - 1));
    }

    #[test]
    fn cue_out_with_garbage_duration_fails() {
        let err = parse_tag_line("#EXT-X-CUE-OUT:soon").unwrap_err();
        assert!(matches!(err, ParseError::InvalidAttribute { .. }));
        assert!(!err.allows_attribute_fallback());
    }

    #[test]
    fn cue_in_and_continuation() {
        assert!(parse_tag_line("#EXT-X-CUE-IN").unwrap().is_break_end());

        let cont = parse_tag_line("#EXT-X-CUE-OUT-CONT:ElapsedTime=10.0,Duration=30").unwrap();
        assert_eq!(cont.kind(), CueKind::Continuation);
        assert_eq!(cont.duration_seconds(), Some(30.0));

        let short = parse_tag_line("#EXT-X-CUE-OUT-CONT:10/30").unwrap();
        assert_eq!(short.duration_seconds(), Some(30.0));
    }

    #[test]
    fn daterange_prefers_binary_payload() {
        let hex = "0xfc302f000000000000fffff014054800008f7feffe7369c02efe0052ccf500000000000a0008435545490000013562dba30a";
        let line = format!(
            r#"#EXT-X-DATERANGE:ID="1",START-DATE="2026-03-01T12:00:00.000Z",DURATION=10,SCTE35-OUT={hex}"#
        );
        let signal = parse_tag_line(&line).unwrap();
        assert_eq!(signal.source(), CueSource::BinaryDecoded);
        assert_eq!(signal.event_id(), Some(0x4800_008F));
        assert_eq!(
            signal.start_pdt(),
            parse_program_date_time("2026-03-01T12:00:00Z")
        );
    }

    #[test]
    fn daterange_falls_back_to_planned_duration() {
        let line = r#"#EXT-X-DATERANGE:ID="b",START-DATE="2026-03-01T12:00:00.5+01:00",PLANNED-DURATION=15,SCTE35-OUT=0xFC00"#;
        let signal = parse_tag_line(line).unwrap();
        let cue = attribute(&signal);
        assert!(cue.planned_duration_used);
        assert_eq!(signal.duration_ticks(), Some(1_350_000));
        assert!(signal.is_break_start());
        assert_eq!(
            signal.start_pdt(),
            parse_program_date_time("2026-03-01T11:00:00.5Z")
        );
    }

    #[test]
    fn daterange_duration_beats_planned() {
        let line = r#"#EXT-X-DATERANGE:ID="c",DURATION=20,PLANNED-DURATION=15,SCTE35-IN=0xFC00"#;
        let signal = parse_tag_line(line).unwrap();
        assert!(!attribute(&signal).planned_duration_used);
        assert_eq!(signal.duration_seconds(), Some(20.0));
        assert!(signal.is_break_end());
    }

    #[test]
    fn daterange_keeps_unparseable_start_date() {
        let line = r#"#EXT-X-DATERANGE:ID="d",START-DATE="yesterday",DURATION=20,SCTE35-OUT=0xFC00"#;
        let signal = parse_tag_line(line).unwrap();
        assert_eq!(signal.start_pdt(), None);
        assert_eq!(attribute(&signal).start_date_raw.as_deref(), Some("yesterday"));
    }

    #[test]
    fn daterange_without_scte35_is_not_a_cue() {
        let line = r#"#EXT-X-DATERANGE:ID="e",CLASS="com.apple.hls.interstitial",START-DATE="2026-03-01T12:00:00Z""#;
        assert!(matches!(parse_tag_line(line), Err(ParseError::UnrecognizedTag(_))));
        assert!(!is_cue_tag(line));
    }

    #[test]
    fn oatcls_and_scte35_tags_decode_base64() {
        let a = parse_tag_line(&format!("#EXT-OATCLS-SCTE35:{SPLICE_INSERT_B64}")).unwrap();
        let b = parse_tag_line(&format!(r#"#EXT-X-SCTE35:CUE="{SPLICE_INSERT_B64}",ID="1""#)).unwrap();
        assert_eq!(a.event_id(), Some(0x4800_008F));
        assert_eq!(a, b);
    }

    #[test]
    fn oatcls_with_bad_payload_is_an_error() {
        assert!(matches!(
            parse_tag_line("#EXT-OATCLS-SCTE35:@@@"),
            Err(ParseError::InvalidPayloadEncoding(_))
        ));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(matches!(
            parse_tag_line("#EXTINF:6.0,"),
            Err(ParseError::UnrecognizedTag(_))
        ));
        assert!(is_cue_tag("#EXT-X-CUE-OUT:30"));
        assert!(!is_cue_tag("#EXTINF:6.0,"));
    }

    #[test]
    fn program_date_time_forms() {
        let expected = parse_program_date_time("2026-03-01T12:00:00Z").unwrap();
        assert_eq!(parse_program_date_time("2026-03-01T12:00:00.000+00:00"), Some(expected));
        assert_eq!(parse_program_date_time("2026-03-01T14:00:00+0200"), Some(expected));
        assert_eq!(parse_program_date_time("not a date"), None);
    }
}
