//! SCTE-35 cue decoding for live HLS ad insertion.
//!
//! This crate decodes binary splice_info_sections (splice_insert, time_signal,
//! segmentation descriptors and UPIDs), recovers cues from HLS playlist tags
//! when no usable binary payload is present, and validates the result before
//! it is allowed to drive an ad break.

pub mod attributes;
pub mod crc32;
pub mod descriptor;
pub mod error;
pub mod section;
pub mod segmentation;
pub mod signal;
pub mod time;
pub mod upid;
pub mod validate;

pub use attributes::{
    decode_payload, is_cue_tag, parse_program_date_time, parse_tag_line, split_attributes,
};
pub use crc32::{mpeg2_crc32, section_crc_ok};
pub use descriptor::{
    DeliveryRestrictions, DescriptorIterator, DescriptorRef, DeviceRestrictions,
    SegmentationDescriptor, SpliceDescriptor,
};
pub use error::ParseError;
pub use section::{
    BreakDuration, SpliceCommand, SpliceCommandType, SpliceInfoSection, SpliceInsert,
    SpliceInsertFlags, TimeSignal,
};
pub use segmentation::SegmentationType;
pub use signal::{
    AttributeCue, BinaryCue, CommandType, CueCore, CueKind, CueSignal, CueSource, parse,
    parse_payload, parse_section,
};
pub use time::{PTS_MODULUS, TICKS_PER_SECOND, seconds_to_ticks, ticks_to_seconds};
pub use upid::{Upid, UpidType};
pub use validate::{
    TierFilter, ValidationContext, ValidationError, ValidationReport, ValidationWarning, validate,
};

/// Result type for cue parsing operations
pub type Result<T> = std::result::Result<T, ParseError>;
