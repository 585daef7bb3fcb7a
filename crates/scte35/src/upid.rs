//! segmentation_upid decoding.
//!
//! Every defined type code has its own byte layout. [`Upid::decode`] fails on
//! unknown codes and wrong lengths; the descriptor parser keeps such values
//! as [`Upid::Malformed`] so they never turn into a plausible-looking
//! identifier. A signalled type with no bytes decodes to [`Upid::Empty`].

use std::fmt::Write as _;

use bytes::Buf;
use serde::Serialize;

use crate::{ParseError, Result};

/// segmentation_upid_type values 0x00..=0x0F.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpidType {
    NotUsed,
    UserDefined,
    Isci,
    AdId,
    Umid,
    IsanDeprecated,
    Isan,
    Tid,
    Ti,
    Adi,
    Eidr,
    AtscContentId,
    Mpu,
    Mid,
    AdsInformation,
    Uri,
}

impl TryFrom<u8> for UpidType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => UpidType::NotUsed,
            0x01 => UpidType::UserDefined,
            0x02 => UpidType::Isci,
            0x03 => UpidType::AdId,
            0x04 => UpidType::Umid,
            0x05 => UpidType::IsanDeprecated,
            0x06 => UpidType::Isan,
            0x07 => UpidType::Tid,
            0x08 => UpidType::Ti,
            0x09 => UpidType::Adi,
            0x0A => UpidType::Eidr,
            0x0B => UpidType::AtscContentId,
            0x0C => UpidType::Mpu,
            0x0D => UpidType::Mid,
            0x0E => UpidType::AdsInformation,
            0x0F => UpidType::Uri,
            other => return Err(ParseError::UnknownUpidType(other)),
        })
    }
}

impl UpidType {
    pub fn code(self) -> u8 {
        match self {
            UpidType::NotUsed => 0x00,
            UpidType::UserDefined => 0x01,
            UpidType::Isci => 0x02,
            UpidType::AdId => 0x03,
            UpidType::Umid => 0x04,
            UpidType::IsanDeprecated => 0x05,
            UpidType::Isan => 0x06,
            UpidType::Tid => 0x07,
            UpidType::Ti => 0x08,
            UpidType::Adi => 0x09,
            UpidType::Eidr => 0x0A,
            UpidType::AtscContentId => 0x0B,
            UpidType::Mpu => 0x0C,
            UpidType::Mid => 0x0D,
            UpidType::AdsInformation => 0x0E,
            UpidType::Uri => 0x0F,
        }
    }

    /// Fixed payload length mandated for this type, if any.
    fn fixed_len(self) -> Option<usize> {
        match self {
            UpidType::NotUsed => Some(0),
            UpidType::Isci => Some(8),
            UpidType::AdId => Some(12),
            UpidType::Umid => Some(32),
            UpidType::IsanDeprecated => Some(8),
            UpidType::Isan => Some(12),
            UpidType::Tid => Some(12),
            UpidType::Ti => Some(8),
            UpidType::Eidr => Some(12),
            _ => None,
        }
    }
}

/// A decoded segmentation_upid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Upid {
    NotUsed,
    /// ISCI, Ad-ID, TID, ADI, ADS information, URI and legacy user-defined ids.
    Text { upid_type: UpidType, value: String },
    /// UMID and both ISAN forms, rendered as grouped hex.
    Hex { upid_type: UpidType, value: String },
    /// Turner identifier (TI), a 64-bit airing id.
    AiringId(u64),
    Eidr(String),
    AtscContentId {
        tsid: u16,
        end_of_day: u8,
        unique_for: u16,
        content_id: String,
    },
    Mpu {
        format_identifier: u32,
        private_data: Vec<u8>,
    },
    Mid(Vec<Upid>),
    /// A type was signalled with a zero-length value.
    Empty(UpidType),
    /// Bytes that do not fit the signalled type, kept as hex.
    Malformed {
        upid_type: u8,
        reason: String,
        raw: String,
    },
}

impl Upid {
    /// Decode `data` according to `upid_type`.
    pub fn decode(upid_type: u8, data: &[u8]) -> Result<Self> {
        let ty = UpidType::try_from(upid_type)?;
        if data.is_empty() && ty != UpidType::NotUsed {
            return Ok(Upid::Empty(ty));
        }
        if let Some(len) = ty.fixed_len()
            && data.len() != len
        {
            return Err(ParseError::InvalidUpid {
                upid_type,
                reason: format!("expected {len} bytes, got {}", data.len()),
            });
        }

        Ok(match ty {
            UpidType::NotUsed => Upid::NotUsed,
            UpidType::UserDefined
            | UpidType::Isci
            | UpidType::AdId
            | UpidType::Tid
            | UpidType::Adi
            | UpidType::AdsInformation
            | UpidType::Uri => Upid::Text {
                upid_type: ty,
                value: ascii(upid_type, data)?,
            },
            UpidType::Umid => Upid::Hex {
                upid_type: ty,
                value: grouped_hex(data, 4, '.'),
            },
            UpidType::IsanDeprecated | UpidType::Isan => Upid::Hex {
                upid_type: ty,
                value: grouped_hex(data, 2, '-'),
            },
            UpidType::Ti => {
                let mut buf = data;
                Upid::AiringId(buf.get_u64())
            }
            UpidType::Eidr => {
                let mut buf = data;
                let prefix = buf.get_u16();
                Upid::Eidr(format!("10.{prefix}/{}", grouped_hex(buf, 2, '-')))
            }
            UpidType::AtscContentId => {
                if data.len() < 4 {
                    return Err(ParseError::InvalidUpid {
                        upid_type,
                        reason: "ATSC content identifier shorter than 4 bytes".to_string(),
                    });
                }
                let mut buf = data;
                let tsid = buf.get_u16();
                let packed = buf.get_u16();
                Upid::AtscContentId {
                    tsid,
                    end_of_day: ((packed >> 9) & 0x1F) as u8,
                    unique_for: packed & 0x01FF,
                    content_id: ascii(upid_type, buf)?,
                }
            }
            UpidType::Mpu => {
                if data.len() < 4 {
                    return Err(ParseError::InvalidUpid {
                        upid_type,
                        reason: "MPU shorter than format_identifier".to_string(),
                    });
                }
                let mut buf = data;
                Upid::Mpu {
                    format_identifier: buf.get_u32(),
                    private_data: buf.to_vec(),
                }
            }
            UpidType::Mid => Upid::Mid(decode_mid(data)?),
        })
    }

    /// Keeps undecodable bytes instead of failing the surrounding descriptor.
    pub fn decode_lossy(upid_type: u8, data: &[u8]) -> Self {
        Self::decode(upid_type, data).unwrap_or_else(|err| Upid::Malformed {
            upid_type,
            reason: err.to_string(),
            raw: hex::encode(data),
        })
    }

    /// `None` for a malformed value whose code is outside the defined range.
    pub fn upid_type(&self) -> Option<UpidType> {
        Some(match self {
            Upid::NotUsed => UpidType::NotUsed,
            Upid::Text { upid_type, .. } | Upid::Hex { upid_type, .. } => *upid_type,
            Upid::AiringId(_) => UpidType::Ti,
            Upid::Eidr(_) => UpidType::Eidr,
            Upid::AtscContentId { .. } => UpidType::AtscContentId,
            Upid::Mpu { .. } => UpidType::Mpu,
            Upid::Mid(_) => UpidType::Mid,
            Upid::Empty(ty) => *ty,
            Upid::Malformed { upid_type, .. } => return UpidType::try_from(*upid_type).ok(),
        })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Upid::Malformed { .. })
    }

    /// True when a UPID type was signalled but its value is the empty string.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Upid::Text { value, .. } => value.is_empty(),
            Upid::Mid(items) => items.is_empty(),
            Upid::Empty(_) => true,
            _ => false,
        }
    }

    /// Single-line rendering for logs and events.
    pub fn as_display(&self) -> String {
        match self {
            Upid::NotUsed | Upid::Empty(_) => String::new(),
            Upid::Malformed { raw, .. } => raw.clone(),
            Upid::Text { value, .. } | Upid::Hex { value, .. } | Upid::Eidr(value) => value.clone(),
            Upid::AiringId(id) => format!("{id:#018x}"),
            Upid::AtscContentId {
                tsid, content_id, ..
            } => format!("{tsid}:{content_id}"),
            Upid::Mpu {
                format_identifier,
                private_data,
            } => format!("{format_identifier:08x}:{}", hex::encode(private_data)),
            Upid::Mid(items) => items
                .iter()
                .map(Upid::as_display)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

fn decode_mid(mut data: &[u8]) -> Result<Vec<Upid>> {
    let mut items = Vec::new();
    while data.has_remaining() {
        if data.remaining() < 2 {
            return Err(ParseError::InvalidUpid {
                upid_type: UpidType::Mid.code(),
                reason: "truncated MID entry header".to_string(),
            });
        }
        let ty = data.get_u8();
        let len = data.get_u8() as usize;
        if data.remaining() < len {
            return Err(ParseError::InvalidUpid {
                upid_type: UpidType::Mid.code(),
                reason: format!("MID entry wants {len} bytes, {} left", data.remaining()),
            });
        }
        if ty == UpidType::Mid.code() {
            return Err(ParseError::InvalidUpid {
                upid_type: ty,
                reason: "nested MID".to_string(),
            });
        }
        items.push(Upid::decode(ty, &data[..len])?);
        data.advance(len);
    }
    Ok(items)
}

fn ascii(upid_type: u8, data: &[u8]) -> Result<String> {
    if !data.is_ascii() {
        return Err(ParseError::InvalidUpid {
            upid_type,
            reason: "non-ASCII bytes in text identifier".to_string(),
        });
    }
    // Some encoders pad fixed-width fields with NULs.
    Ok(String::from_utf8_lossy(data)
        .trim_end_matches('\0')
        .to_string())
}

fn grouped_hex(data: &[u8], group: usize, sep: char) -> String {
    let mut out = String::with_capacity(data.len() * 2 + data.len() / group);
    for (i, chunk) in data.chunks(group).enumerate() {
        if i > 0 {
            out.push(sep);
        }
        for byte in chunk {
            let _ = write!(out, "{byte:02X}");
        }
    }
    out
}
