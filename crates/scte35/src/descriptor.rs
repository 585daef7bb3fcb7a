use bytes::Buf;
use serde::Serialize;
use tracing::debug;

use crate::section::{need, read_33_bits};
use crate::segmentation::SegmentationType;
use crate::upid::Upid;
use crate::{ParseError, Result};

/// avail_descriptor (tag 0x00)
pub const TAG_AVAIL: u8 = 0x00;
/// DTMF_descriptor (tag 0x01)
pub const TAG_DTMF: u8 = 0x01;
/// segmentation_descriptor (tag 0x02)
pub const TAG_SEGMENTATION: u8 = 0x02;
/// time_descriptor (tag 0x03)
pub const TAG_TIME: u8 = 0x03;
/// audio_descriptor (tag 0x04)
pub const TAG_AUDIO: u8 = 0x04;

/// "CUEI", the identifier every SCTE-35 splice descriptor carries.
pub const CUEI_IDENTIFIER: u32 = u32::from_be_bytes(*b"CUEI");

const SEGMENTATION_EVENT_CANCEL_MASK: u8 = 0x80;
const PROGRAM_SEGMENTATION_MASK: u8 = 0x80;
const SEGMENTATION_DURATION_MASK: u8 = 0x40;
const DELIVERY_NOT_RESTRICTED_MASK: u8 = 0x20;
const WEB_DELIVERY_ALLOWED_MASK: u8 = 0x10;
const NO_REGIONAL_BLACKOUT_MASK: u8 = 0x08;
const ARCHIVE_ALLOWED_MASK: u8 = 0x04;
const DEVICE_RESTRICTIONS_MASK: u8 = 0x03;

/// Borrowed splice descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorRef<'a> {
    pub tag: u8,
    pub identifier: u32,
    pub data: &'a [u8],
}

/// Iterator over a splice_descriptor loop.
///
/// Each descriptor is `[tag: u8][length: u8][identifier: u32][data]`, where
/// `length` covers the identifier and the data.
#[derive(Debug, Clone)]
pub struct DescriptorIterator<'a> {
    data: &'a [u8],
}

impl<'a> DescriptorIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        DescriptorIterator { data }
    }
}

impl<'a> Iterator for DescriptorIterator<'a> {
    type Item = Result<DescriptorRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.data.has_remaining() {
            return None;
        }
        if self.data.remaining() < 2 {
            let err = ParseError::MalformedDescriptor("dangling descriptor header".to_string());
            self.data = &[];
            return Some(Err(err));
        }
        let tag = self.data.get_u8();
        let length = self.data.get_u8() as usize;

        if length < 4 || self.data.remaining() < length {
            let err = ParseError::MalformedDescriptor(format!(
                "descriptor {tag:#04x} declares {length} bytes, {} available",
                self.data.remaining()
            ));
            self.data = &[];
            return Some(Err(err));
        }

        let (body, rest) = self.data.split_at(length);
        self.data = rest;
        let mut body = body;
        let identifier = body.get_u32();
        Some(Ok(DescriptorRef {
            tag,
            identifier,
            data: body,
        }))
    }
}

/// 2-bit device_restrictions field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRestrictions {
    RestrictGroup0,
    RestrictGroup1,
    RestrictGroup2,
    None,
}

impl From<u8> for DeviceRestrictions {
    fn from(bits: u8) -> Self {
        match bits & DEVICE_RESTRICTIONS_MASK {
            0 => DeviceRestrictions::RestrictGroup0,
            1 => DeviceRestrictions::RestrictGroup1,
            2 => DeviceRestrictions::RestrictGroup2,
            _ => DeviceRestrictions::None,
        }
    }
}

/// Present only when delivery_not_restricted_flag is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryRestrictions {
    pub web_delivery_allowed: bool,
    pub no_regional_blackout: bool,
    pub archive_allowed: bool,
    pub device_restrictions: DeviceRestrictions,
}

impl DeliveryRestrictions {
    fn from_byte(byte: u8) -> Self {
        Self {
            web_delivery_allowed: byte & WEB_DELIVERY_ALLOWED_MASK != 0,
            no_regional_blackout: byte & NO_REGIONAL_BLACKOUT_MASK != 0,
            archive_allowed: byte & ARCHIVE_ALLOWED_MASK != 0,
            device_restrictions: DeviceRestrictions::from(byte),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentationComponent {
    pub tag: u8,
    pub pts_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentationDescriptor {
    pub event_id: u32,
    pub cancel: bool,
    pub program_segmentation: bool,
    pub components: Vec<SegmentationComponent>,
    /// 40-bit duration in 90kHz ticks.
    pub duration_ticks: Option<u64>,
    pub delivery_restrictions: Option<DeliveryRestrictions>,
    pub upid: Upid,
    pub segmentation_type: SegmentationType,
    pub segment_num: u8,
    pub segments_expected: u8,
    pub sub_segment_num: Option<u8>,
    pub sub_segments_expected: Option<u8>,
}

impl SegmentationDescriptor {
    /// Parse the bytes following the CUEI identifier.
    pub fn parse(mut buf: &[u8]) -> Result<Self> {
        need(buf, 5)?;
        let event_id = buf.get_u32();
        let cancel = buf.get_u8() & SEGMENTATION_EVENT_CANCEL_MASK != 0;

        let mut desc = SegmentationDescriptor {
            event_id,
            cancel,
            program_segmentation: true,
            components: Vec::new(),
            duration_ticks: None,
            delivery_restrictions: None,
            upid: Upid::NotUsed,
            segmentation_type: SegmentationType::NotIndicated,
            segment_num: 0,
            segments_expected: 0,
            sub_segment_num: None,
            sub_segments_expected: None,
        };
        if cancel {
            return Ok(desc);
        }

        need(buf, 1)?;
        let flags = buf.get_u8();
        desc.program_segmentation = flags & PROGRAM_SEGMENTATION_MASK != 0;
        if flags & DELIVERY_NOT_RESTRICTED_MASK == 0 {
            desc.delivery_restrictions = Some(DeliveryRestrictions::from_byte(flags));
        }

        if !desc.program_segmentation {
            need(buf, 1)?;
            let count = buf.get_u8() as usize;
            need(buf, count * 6)?;
            for _ in 0..count {
                let tag = buf.get_u8();
                let pts_offset = read_33_bits(&mut buf);
                desc.components.push(SegmentationComponent { tag, pts_offset });
            }
        }

        if flags & SEGMENTATION_DURATION_MASK != 0 {
            need(buf, 5)?;
            desc.duration_ticks = Some(buf.get_uint(5));
        }

        need(buf, 2)?;
        let upid_type = buf.get_u8();
        let upid_len = buf.get_u8() as usize;
        need(buf, upid_len)?;
        desc.upid = Upid::decode_lossy(upid_type, &buf[..upid_len]);
        if let Upid::Malformed { reason, .. } = &desc.upid {
            debug!(upid_type, %reason, "Keeping undecodable segmentation UPID");
        }
        buf.advance(upid_len);

        need(buf, 3)?;
        desc.segmentation_type = SegmentationType::from(buf.get_u8());
        desc.segment_num = buf.get_u8();
        desc.segments_expected = buf.get_u8();

        // Older encoders omit the sub-segment pair even for types that allow it.
        if desc.segmentation_type.carries_sub_segments() && buf.remaining() >= 2 {
            desc.sub_segment_num = Some(buf.get_u8());
            desc.sub_segments_expected = Some(buf.get_u8());
        }

        Ok(desc)
    }
}

/// A decoded splice descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpliceDescriptor {
    Avail { provider_avail_id: u32 },
    Segmentation(SegmentationDescriptor),
    /// DTMF, time and audio descriptors, kept raw.
    Other { tag: u8, data: Vec<u8> },
}

impl SpliceDescriptor {
    pub fn as_segmentation(&self) -> Option<&SegmentationDescriptor> {
        match self {
            SpliceDescriptor::Segmentation(seg) => Some(seg),
            _ => None,
        }
    }
}

/// Decode a descriptor loop. Descriptors from other registrations are skipped.
pub fn parse_descriptor_loop(data: &[u8]) -> Result<Vec<SpliceDescriptor>> {
    let mut out = Vec::new();
    for desc in DescriptorIterator::new(data) {
        let desc = desc?;
        if desc.identifier != CUEI_IDENTIFIER {
            debug!(
                tag = desc.tag,
                identifier = %format!("{:#010x}", desc.identifier),
                "Skipping non-CUEI splice descriptor"
            );
            continue;
        }
        let decoded = match desc.tag {
            TAG_AVAIL => {
                need(desc.data, 4)?;
                SpliceDescriptor::Avail {
                    provider_avail_id: (&desc.data[..4]).get_u32(),
                }
            }
            TAG_SEGMENTATION => {
                SpliceDescriptor::Segmentation(SegmentationDescriptor::parse(desc.data)?)
            }
            tag => SpliceDescriptor::Other {
                tag,
                data: desc.data.to_vec(),
            },
        };
        out.push(decoded);
    }
    Ok(out)
}
