//! The normalized cue handed to the rest of the system.
//!
//! A [`CueSignal`] is either decoded from a binary splice_info_section or
//! recovered from playlist tag attributes. The attribute form has no event id
//! and no CRC, so callers that need those branch on the variant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::descriptor::{DeliveryRestrictions, SegmentationDescriptor, SpliceDescriptor};
use crate::section::{SpliceCommand, SpliceInfoSection, SpliceInsertFlags};
use crate::segmentation::SegmentationType;
use crate::time::ticks_to_seconds;
use crate::upid::Upid;
use crate::{ParseError, Result};

/// Commands that can describe an ad break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    SpliceInsert,
    TimeSignal,
    BandwidthReservation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CueSource {
    BinaryDecoded,
    AttributeDecoded,
}

/// What a cue asks the channel to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    BreakStart,
    BreakEnd,
    /// `#EXT-X-CUE-OUT-CONT`: restates a break already in progress.
    Continuation,
    Other,
}

/// Fields shared by both cue forms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CueCore {
    pub id: String,
    pub command_type: CommandType,
    pub kind: CueKind,
    /// Splice point with pts_adjustment applied.
    pub pts_ticks: Option<u64>,
    pub break_duration_ticks: Option<u64>,
    pub auto_return: Option<bool>,
    pub out_of_network: Option<bool>,
    pub segmentation_type: Option<SegmentationType>,
    pub upid: Option<Upid>,
    pub tier: Option<u16>,
    pub delivery_restrictions: Option<DeliveryRestrictions>,
    /// Wall-clock start, from the tag or the segment that carried the cue.
    pub start_pdt: Option<DateTime<Utc>>,
}

impl CueCore {
    pub(crate) fn new(id: String, command_type: CommandType, kind: CueKind) -> Self {
        Self {
            id,
            command_type,
            kind,
            pts_ticks: None,
            break_duration_ticks: None,
            auto_return: None,
            out_of_network: None,
            segmentation_type: None,
            upid: None,
            tier: None,
            delivery_restrictions: None,
            start_pdt: None,
        }
    }
}

pub(crate) fn random_signal_id() -> String {
    format!("sig-{}", Uuid::new_v4())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryCue {
    pub core: CueCore,
    /// splice_event_id, else the segmentation_event_id.
    pub event_id: Option<u32>,
    pub crc_valid: bool,
    pub pts_adjustment: u64,
    pub splice_flags: Option<SpliceInsertFlags>,
    pub descriptors: Vec<SpliceDescriptor>,
}

impl BinaryCue {
    /// Normalize a decoded section.
    ///
    /// Only splice_insert, time_signal and bandwidth_reservation survive;
    /// anything else is [`ParseError::UnsupportedCommand`].
    pub fn from_section(section: SpliceInfoSection) -> Result<Self> {
        let segmentation = primary_segmentation(&section.descriptors).cloned();

        let (command_type, kind, pts, duration, auto_return, oon, splice_event, flags) =
            match &section.command {
                SpliceCommand::SpliceInsert(insert) => {
                    let kind = if insert.cancel || !insert.flags.out_of_network {
                        CueKind::BreakEnd
                    } else {
                        CueKind::BreakStart
                    };
                    (
                        CommandType::SpliceInsert,
                        kind,
                        insert.splice_point(),
                        insert.break_duration.map(|d| d.duration_ticks),
                        insert.break_duration.map(|d| d.auto_return),
                        Some(!insert.cancel && insert.flags.out_of_network),
                        Some(insert.event_id),
                        (!insert.cancel).then_some(insert.flags),
                    )
                }
                SpliceCommand::TimeSignal(ts) => {
                    let kind = segmentation.as_ref().map_or(CueKind::Other, |seg| {
                        if seg.cancel || seg.segmentation_type.is_break_end() {
                            CueKind::BreakEnd
                        } else if seg.segmentation_type.is_break_start() {
                            CueKind::BreakStart
                        } else {
                            CueKind::Other
                        }
                    });
                    (
                        CommandType::TimeSignal,
                        kind,
                        ts.splice_time,
                        segmentation.as_ref().and_then(|s| s.duration_ticks),
                        None,
                        None,
                        None,
                        None,
                    )
                }
                SpliceCommand::BandwidthReservation => (
                    CommandType::BandwidthReservation,
                    CueKind::Other,
                    None,
                    None,
                    None,
                    None,
                    None,
                    None,
                ),
                other => {
                    return Err(ParseError::UnsupportedCommand(other.command_type().code()));
                }
            };

        let event_id = splice_event.or_else(|| segmentation.as_ref().map(|s| s.event_id));
        let id = match event_id {
            Some(id) => format!("evt-{id}"),
            None => random_signal_id(),
        };

        let mut core = CueCore::new(id, command_type, kind);
        core.pts_ticks = pts.map(|p| section.adjusted(p));
        core.break_duration_ticks = duration;
        core.auto_return = auto_return;
        core.out_of_network = oon;
        core.tier = section.tier;
        if let Some(seg) = &segmentation {
            core.segmentation_type = Some(seg.segmentation_type);
            core.delivery_restrictions = seg.delivery_restrictions;
            if seg.upid != Upid::NotUsed {
                core.upid = Some(seg.upid.clone());
            }
        }

        Ok(BinaryCue {
            core,
            event_id,
            crc_valid: section.crc_valid,
            pts_adjustment: section.pts_adjustment,
            splice_flags: flags,
            descriptors: section.descriptors,
        })
    }

    pub fn segmentation(&self) -> Option<&SegmentationDescriptor> {
        primary_segmentation(&self.descriptors)
    }

    pub fn segmentation_descriptors(&self) -> impl Iterator<Item = &SegmentationDescriptor> {
        self.descriptors.iter().filter_map(SpliceDescriptor::as_segmentation)
    }
}

/// The descriptor that decides the cue: the first break boundary, else the
/// first segmentation descriptor of any type.
fn primary_segmentation(descriptors: &[SpliceDescriptor]) -> Option<&SegmentationDescriptor> {
    let mut segs = descriptors.iter().filter_map(SpliceDescriptor::as_segmentation);
    let first = segs.clone().next();
    segs.find(|s| {
        s.cancel || s.segmentation_type.is_break_start() || s.segmentation_type.is_break_end()
    })
    .or(first)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeCue {
    pub core: CueCore,
    /// Tag name without the leading `#`.
    pub tag: String,
    /// The whole tag line, trimmed.
    pub line: String,
    /// Duration came from PLANNED-DURATION because DURATION was absent.
    pub planned_duration_used: bool,
    /// START-DATE as written, kept when it failed to parse.
    pub start_date_raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CueSignal {
    Binary(BinaryCue),
    Attribute(AttributeCue),
}

impl CueSignal {
    pub fn core(&self) -> &CueCore {
        match self {
            CueSignal::Binary(b) => &b.core,
            CueSignal::Attribute(a) => &a.core,
        }
    }

    fn core_mut(&mut self) -> &mut CueCore {
        match self {
            CueSignal::Binary(b) => &mut b.core,
            CueSignal::Attribute(a) => &mut a.core,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn source(&self) -> CueSource {
        match self {
            CueSignal::Binary(_) => CueSource::BinaryDecoded,
            CueSignal::Attribute(_) => CueSource::AttributeDecoded,
        }
    }

    pub fn kind(&self) -> CueKind {
        self.core().kind
    }

    pub fn command_type(&self) -> CommandType {
        self.core().command_type
    }

    pub fn is_break_start(&self) -> bool {
        self.kind() == CueKind::BreakStart
    }

    pub fn is_break_end(&self) -> bool {
        self.kind() == CueKind::BreakEnd
    }

    /// Only binary cues carry an event id.
    pub fn event_id(&self) -> Option<u32> {
        match self {
            CueSignal::Binary(b) => b.event_id,
            CueSignal::Attribute(_) => None,
        }
    }

    /// `None` for attribute cues, which have no CRC to check.
    pub fn crc_valid(&self) -> Option<bool> {
        match self {
            CueSignal::Binary(b) => Some(b.crc_valid),
            CueSignal::Attribute(_) => None,
        }
    }

    pub fn pts_ticks(&self) -> Option<u64> {
        self.core().pts_ticks
    }

    pub fn duration_ticks(&self) -> Option<u64> {
        self.core().break_duration_ticks
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_ticks().map(ticks_to_seconds)
    }

    pub fn tier(&self) -> Option<u16> {
        self.core().tier
    }

    pub fn upid(&self) -> Option<&Upid> {
        self.core().upid.as_ref()
    }

    pub fn start_pdt(&self) -> Option<DateTime<Utc>> {
        self.core().start_pdt
    }

    /// Fill in the wall-clock start if the cue did not carry one.
    pub fn with_start_pdt(mut self, pdt: DateTime<Utc>) -> Self {
        let core = self.core_mut();
        if core.start_pdt.is_none() {
            core.start_pdt = Some(pdt);
        }
        self
    }
}

/// Decode raw splice_info_section bytes.
pub fn parse_section(data: &[u8]) -> Result<CueSignal> {
    let section = SpliceInfoSection::parse(data)?;
    BinaryCue::from_section(section).map(CueSignal::Binary)
}

/// Decode a hex (`0xFC...` or bare) or base64 section.
pub fn parse_payload(payload: &str) -> Result<CueSignal> {
    let bytes = crate::attributes::decode_payload(payload)?;
    parse_section(&bytes)
}

/// Decode either a playlist tag line or an encoded section.
pub fn parse(raw: &str) -> Result<CueSignal> {
    let raw = raw.trim();
    if raw.starts_with('#') {
        crate::attributes::parse_tag_line(raw)
    } else {
        parse_payload(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::segmentation_descriptor;
    use crate::section::tests::{
        SPLICE_INSERT_HEX, TIME_SIGNAL_HEX, build_section, splice_time_bytes,
    };
    use crate::section::NO_TIER;

    const SPLICE_INSERT_B64: &str =
        "/DAvAAAAAAAA///wFAVIAACPf+/+c2nALv4AUsz1AAAAAAAKAAhDVUVJAAABNWLbowo=";

    #[test]
    fn binary_splice_insert_normalizes() {
        let signal = parse_payload(SPLICE_INSERT_B64).unwrap();
        assert_eq!(signal.source(), CueSource::BinaryDecoded);
        assert_eq!(signal.id(), "evt-1207959695");
        assert_eq!(signal.event_id(), Some(0x4800_008F));
        assert_eq!(signal.kind(), CueKind::BreakStart);
        assert_eq!(signal.command_type(), CommandType::SpliceInsert);
        assert_eq!(signal.crc_valid(), Some(true));
        assert_eq!(signal.pts_ticks(), Some(1_936_310_318));
        assert_eq!(signal.duration_ticks(), Some(5_426_421));
        assert_eq!(signal.tier(), None);
        assert_eq!(signal.core().out_of_network, Some(true));
        assert_eq!(signal.core().auto_return, Some(true));
    }

    #[test]
    fn hex_and_base64_forms_agree() {
        let from_b64 = parse_payload(SPLICE_INSERT_B64).unwrap();
        let from_hex = parse_payload(&format!("0x{SPLICE_INSERT_HEX}")).unwrap();
        let from_bare = parse(SPLICE_INSERT_HEX).unwrap();
        assert_eq!(from_b64, from_hex);
        assert_eq!(from_b64, from_bare);
    }

    #[test]
    fn time_signal_takes_segmentation_fields() {
        let signal = parse(TIME_SIGNAL_HEX).unwrap();
        assert_eq!(signal.command_type(), CommandType::TimeSignal);
        assert_eq!(signal.kind(), CueKind::BreakStart);
        assert_eq!(signal.event_id(), Some(0x4800_008E));
        assert_eq!(signal.pts_ticks(), Some(1_924_989_008));
        assert_eq!(signal.duration_seconds(), Some(307.0));
        assert_eq!(
            signal.core().segmentation_type,
            Some(SegmentationType::ProviderPlacementOpportunityStart)
        );
        assert_eq!(signal.upid(), Some(&Upid::AiringId(0x2CA0_A18A)));
        let restrictions = signal.core().delivery_restrictions.unwrap();
        assert!(restrictions.archive_allowed);
    }

    #[test]
    fn pts_adjustment_is_applied_to_splice_point() {
        let cmd = splice_time_bytes(crate::time::PTS_MODULUS - 100);
        let desc = segmentation_descriptor(3, 0x30, Some(2_700_000), None);
        let data = build_section(NO_TIER, 250, 0x06, &cmd, &desc);
        let signal = parse_section(&data).unwrap();
        assert_eq!(signal.pts_ticks(), Some(150));
    }

    #[test]
    fn end_types_and_cancel_are_break_end() {
        let cmd = splice_time_bytes(0);
        let desc = segmentation_descriptor(3, 0x35, None, None);
        let data = build_section(NO_TIER, 0, 0x06, &cmd, &desc);
        assert_eq!(parse_section(&data).unwrap().kind(), CueKind::BreakEnd);

        let mut cancel = 5u32.to_be_bytes().to_vec();
        cancel.push(0xFF);
        let data = build_section(NO_TIER, 0, 0x05, &cancel, &[]);
        let signal = parse_section(&data).unwrap();
        assert_eq!(signal.kind(), CueKind::BreakEnd);
        assert_eq!(signal.core().out_of_network, Some(false));
    }

    #[test]
    fn time_signal_without_segmentation_gets_random_id() {
        let data = build_section(NO_TIER, 0, 0x06, &splice_time_bytes(9), &[]);
        let signal = parse_section(&data).unwrap();
        assert!(signal.id().starts_with("sig-"));
        assert_eq!(signal.kind(), CueKind::Other);
        assert_eq!(signal.event_id(), None);
    }

    #[test]
    fn non_break_commands_are_unsupported() {
        let data = build_section(NO_TIER, 0, 0x00, &[], &[]);
        assert_eq!(parse_section(&data), Err(ParseError::UnsupportedCommand(0x00)));

        let data = build_section(NO_TIER, 0, 0x07, &[], &[]);
        let signal = parse_section(&data).unwrap();
        assert_eq!(signal.command_type(), CommandType::BandwidthReservation);
    }

    #[test]
    fn section_tier_is_carried() {
        let desc = segmentation_descriptor(3, 0x30, Some(90_000), None);
        let data = build_section(2, 0, 0x06, &splice_time_bytes(0), &desc);
        assert_eq!(parse_section(&data).unwrap().tier(), Some(2));
    }

    #[test]
    fn start_pdt_only_fills_gaps() {
        let t1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t2 = t1 + chrono::Duration::seconds(10);
        let signal = parse(SPLICE_INSERT_HEX).unwrap().with_start_pdt(t1);
        assert_eq!(signal.with_start_pdt(t2).start_pdt(), Some(t1));
    }
}
