//! splice_info_section decoding.
//!
//! Fields are read straight off the wire with [`bytes::Buf`]; every read is
//! preceded by a length check so truncated input turns into
//! [`ParseError::InsufficientData`] rather than a panic.

use bytes::Buf;
use serde::Serialize;
use tracing::warn;

use crate::crc32::section_crc_ok;
use crate::descriptor::{SpliceDescriptor, parse_descriptor_loop};
use crate::time::apply_pts_adjustment;
use crate::{ParseError, Result};

/// SCTE-35 table ID
pub const SCTE35_TABLE_ID: u8 = 0xFC;

/// Bytes before the splice command: table_id .. splice_command_type.
const HEADER_LEN: usize = 14;
/// Smallest possible section: header, descriptor_loop_length and CRC_32.
const MIN_SECTION_LEN: usize = HEADER_LEN + 2 + 4;

const SECTION_SYNTAX_INDICATOR_MASK: u8 = 0x80;
const PRIVATE_INDICATOR_MASK: u8 = 0x40;
const ENCRYPTED_PACKET_MASK: u8 = 0x80;

/// splice_command_length value meaning "not signalled".
pub const UNKNOWN_COMMAND_LENGTH: u16 = 0x0FFF;
/// Section tier value meaning "no tier".
pub const NO_TIER: u16 = 0x0FFF;

// splice_insert flag byte, 2016+ layout.
pub const OUT_OF_NETWORK_MASK: u8 = 0x80;
pub const PROGRAM_SPLICE_MASK: u8 = 0x40;
pub const DURATION_FLAG_MASK: u8 = 0x20;
pub const SPLICE_IMMEDIATE_MASK: u8 = 0x10;
pub const EVENT_ID_COMPLIANCE_MASK: u8 = 0x08;

/// Top bit of the byte following splice_event_id.
pub const SPLICE_EVENT_CANCEL_MASK: u8 = 0x80;
/// First bit of splice_time().
pub const TIME_SPECIFIED_MASK: u8 = 0x80;
/// First bit of break_duration().
pub const AUTO_RETURN_MASK: u8 = 0x80;

/// SCTE-35 splice command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceCommandType {
    SpliceNull,
    SpliceSchedule,
    SpliceInsert,
    TimeSignal,
    BandwidthReservation,
    PrivateCommand,
}

impl TryFrom<u8> for SpliceCommandType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(SpliceCommandType::SpliceNull),
            0x04 => Ok(SpliceCommandType::SpliceSchedule),
            0x05 => Ok(SpliceCommandType::SpliceInsert),
            0x06 => Ok(SpliceCommandType::TimeSignal),
            0x07 => Ok(SpliceCommandType::BandwidthReservation),
            0xFF => Ok(SpliceCommandType::PrivateCommand),
            v => Err(ParseError::UnknownCommand(v)),
        }
    }
}

impl SpliceCommandType {
    pub fn code(self) -> u8 {
        match self {
            SpliceCommandType::SpliceNull => 0x00,
            SpliceCommandType::SpliceSchedule => 0x04,
            SpliceCommandType::SpliceInsert => 0x05,
            SpliceCommandType::TimeSignal => 0x06,
            SpliceCommandType::BandwidthReservation => 0x07,
            SpliceCommandType::PrivateCommand => 0xFF,
        }
    }
}

/// The five single-bit flags of a splice_insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpliceInsertFlags {
    pub out_of_network: bool,
    pub program_splice: bool,
    pub duration: bool,
    pub splice_immediate: bool,
    pub event_id_compliance: bool,
}

impl SpliceInsertFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            out_of_network: byte & OUT_OF_NETWORK_MASK != 0,
            program_splice: byte & PROGRAM_SPLICE_MASK != 0,
            duration: byte & DURATION_FLAG_MASK != 0,
            splice_immediate: byte & SPLICE_IMMEDIATE_MASK != 0,
            event_id_compliance: byte & EVENT_ID_COMPLIANCE_MASK != 0,
        }
    }
}

/// Break duration in a splice insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakDuration {
    pub auto_return: bool,
    /// Duration in 90kHz ticks (33-bit)
    pub duration_ticks: u64,
}

/// One component of a component-mode splice_insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpliceComponent {
    pub tag: u8,
    pub splice_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpliceInsert {
    pub event_id: u32,
    pub cancel: bool,
    pub flags: SpliceInsertFlags,
    /// Program-mode splice time, unadjusted.
    pub splice_time: Option<u64>,
    pub components: Vec<SpliceComponent>,
    pub break_duration: Option<BreakDuration>,
    pub unique_program_id: u16,
    pub avail_num: u8,
    pub avails_expected: u8,
}

impl SpliceInsert {
    /// The splice point: program time, or the first timed component.
    pub fn splice_point(&self) -> Option<u64> {
        self.splice_time
            .or_else(|| self.components.iter().find_map(|c| c.splice_time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSignal {
    pub splice_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivateCommand {
    pub identifier: u32,
    pub data: Vec<u8>,
}

/// Parsed splice command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpliceCommand {
    SpliceNull,
    /// Kept undecoded; schedules are not used for live insertion.
    SpliceSchedule { data: Vec<u8> },
    SpliceInsert(SpliceInsert),
    TimeSignal(TimeSignal),
    BandwidthReservation,
    PrivateCommand(PrivateCommand),
}

impl SpliceCommand {
    pub fn command_type(&self) -> SpliceCommandType {
        match self {
            SpliceCommand::SpliceNull => SpliceCommandType::SpliceNull,
            SpliceCommand::SpliceSchedule { .. } => SpliceCommandType::SpliceSchedule,
            SpliceCommand::SpliceInsert(_) => SpliceCommandType::SpliceInsert,
            SpliceCommand::TimeSignal(_) => SpliceCommandType::TimeSignal,
            SpliceCommand::BandwidthReservation => SpliceCommandType::BandwidthReservation,
            SpliceCommand::PrivateCommand(_) => SpliceCommandType::PrivateCommand,
        }
    }
}

/// Top-level SCTE-35 splice info section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpliceInfoSection {
    pub private_indicator: bool,
    pub sap_type: u8,
    pub protocol_version: u8,
    pub pts_adjustment: u64,
    pub cw_index: u8,
    /// 12-bit authorization tier, `None` when 0xFFF.
    pub tier: Option<u16>,
    pub command: SpliceCommand,
    pub descriptors: Vec<SpliceDescriptor>,
    pub crc32: u32,
    pub crc_valid: bool,
}

impl SpliceInfoSection {
    /// Parse a splice_info_section. Bytes past `3 + section_length` are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        need(data, 3)?;
        if data[0] != SCTE35_TABLE_ID {
            return Err(ParseError::InvalidTableId(data[0]));
        }
        if data[1] & SECTION_SYNTAX_INDICATOR_MASK != 0 {
            return Err(ParseError::SectionSyntaxIndicatorSet);
        }
        let private_indicator = data[1] & PRIVATE_INDICATOR_MASK != 0;
        let sap_type = (data[1] >> 4) & 0x03;
        let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
        let total = 3 + section_length;
        need(data, total)?;
        if total < MIN_SECTION_LEN {
            return Err(ParseError::short(MIN_SECTION_LEN, total));
        }
        let section = &data[..total];

        let mut buf = &section[3..];
        let protocol_version = buf.get_u8();
        if protocol_version != 0 {
            return Err(ParseError::UnsupportedProtocolVersion(protocol_version));
        }

        let b = buf.get_u8();
        if b & ENCRYPTED_PACKET_MASK != 0 {
            return Err(ParseError::Encrypted {
                algorithm: (b >> 1) & 0x3F,
            });
        }
        let pts_adjustment = (((b & 0x01) as u64) << 32) | buf.get_u32() as u64;
        let cw_index = buf.get_u8();

        let tier_and_len = buf.get_uint(3) as u32;
        let tier = ((tier_and_len >> 12) & 0x0FFF) as u16;
        let command_length = (tier_and_len & 0x0FFF) as u16;
        let command_type = SpliceCommandType::try_from(buf.get_u8())?;

        // Everything between the command type and the CRC.
        let mut body = &section[HEADER_LEN..total - 4];
        let command = if command_length == UNKNOWN_COMMAND_LENGTH {
            parse_command(command_type, &mut body, None)?
        } else {
            let len = command_length as usize;
            need(body, len)?;
            let mut cmd = &body[..len];
            body.advance(len);
            parse_command(command_type, &mut cmd, Some(len))?
        };

        need(body, 2)?;
        let loop_len = body.get_u16() as usize;
        need(body, loop_len)?;
        let descriptors = parse_descriptor_loop(&body[..loop_len])?;

        let crc32 = (&section[total - 4..]).get_u32();
        let crc_valid = section_crc_ok(section);
        if !crc_valid {
            warn!(crc32, "SCTE-35 CRC mismatch, keeping decoded fields");
        }

        Ok(SpliceInfoSection {
            private_indicator,
            sap_type,
            protocol_version,
            pts_adjustment,
            cw_index,
            tier: (tier != NO_TIER).then_some(tier),
            command,
            descriptors,
            crc32,
            crc_valid,
        })
    }

    /// Apply this section's pts_adjustment to an embedded PTS.
    pub fn adjusted(&self, pts: u64) -> u64 {
        apply_pts_adjustment(pts, self.pts_adjustment)
    }
}

pub(crate) fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.len() < n {
        return Err(ParseError::short(n, buf.len()));
    }
    Ok(())
}

/// Parse a splice_time() structure.
pub(crate) fn read_splice_time(buf: &mut &[u8]) -> Result<Option<u64>> {
    need(buf, 1)?;
    if buf[0] & TIME_SPECIFIED_MASK == 0 {
        buf.advance(1);
        return Ok(None);
    }
    need(buf, 5)?;
    Ok(Some(read_33_bits(buf)))
}

/// One byte whose low bit is bit 32, then four bytes.
pub(crate) fn read_33_bits(buf: &mut &[u8]) -> u64 {
    let hi = (buf.get_u8() & 0x01) as u64;
    (hi << 32) | buf.get_u32() as u64
}

fn read_break_duration(buf: &mut &[u8]) -> Result<BreakDuration> {
    need(buf, 5)?;
    let auto_return = buf[0] & AUTO_RETURN_MASK != 0;
    Ok(BreakDuration {
        auto_return,
        duration_ticks: read_33_bits(buf),
    })
}

fn parse_command(
    command_type: SpliceCommandType,
    buf: &mut &[u8],
    declared_len: Option<usize>,
) -> Result<SpliceCommand> {
    match command_type {
        SpliceCommandType::SpliceNull => Ok(SpliceCommand::SpliceNull),
        SpliceCommandType::BandwidthReservation => Ok(SpliceCommand::BandwidthReservation),
        SpliceCommandType::SpliceInsert => parse_splice_insert(buf).map(SpliceCommand::SpliceInsert),
        SpliceCommandType::TimeSignal => Ok(SpliceCommand::TimeSignal(TimeSignal {
            splice_time: read_splice_time(buf)?,
        })),
        SpliceCommandType::SpliceSchedule => {
            let len = declared_len.ok_or_else(|| {
                ParseError::MalformedCommand("splice_schedule without a command length".to_string())
            })?;
            let data = buf[..len].to_vec();
            buf.advance(len);
            Ok(SpliceCommand::SpliceSchedule { data })
        }
        SpliceCommandType::PrivateCommand => {
            let len = declared_len.ok_or_else(|| {
                ParseError::MalformedCommand("private_command without a command length".to_string())
            })?;
            if len < 4 {
                return Err(ParseError::MalformedCommand(
                    "private_command shorter than its identifier".to_string(),
                ));
            }
            let identifier = buf.get_u32();
            let data = buf[..len - 4].to_vec();
            buf.advance(len - 4);
            Ok(SpliceCommand::PrivateCommand(PrivateCommand { identifier, data }))
        }
    }
}

fn parse_splice_insert(buf: &mut &[u8]) -> Result<SpliceInsert> {
    need(buf, 5)?;
    let event_id = buf.get_u32();
    let cancel = buf.get_u8() & SPLICE_EVENT_CANCEL_MASK != 0;

    let mut insert = SpliceInsert {
        event_id,
        cancel,
        flags: SpliceInsertFlags::default(),
        splice_time: None,
        components: Vec::new(),
        break_duration: None,
        unique_program_id: 0,
        avail_num: 0,
        avails_expected: 0,
    };
    if cancel {
        return Ok(insert);
    }

    need(buf, 1)?;
    let flags = SpliceInsertFlags::from_byte(buf.get_u8());
    insert.flags = flags;

    if flags.program_splice {
        if !flags.splice_immediate {
            insert.splice_time = read_splice_time(buf)?;
        }
    } else {
        need(buf, 1)?;
        let count = buf.get_u8();
        for _ in 0..count {
            need(buf, 1)?;
            let tag = buf.get_u8();
            let splice_time = if flags.splice_immediate {
                None
            } else {
                read_splice_time(buf)?
            };
            insert.components.push(SpliceComponent { tag, splice_time });
        }
    }

    if flags.duration {
        insert.break_duration = Some(read_break_duration(buf)?);
    }

    need(buf, 4)?;
    insert.unique_program_id = buf.get_u16();
    insert.avail_num = buf.get_u8();
    insert.avails_expected = buf.get_u8();
    Ok(insert)
}
