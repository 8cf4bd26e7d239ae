//! The header cascade: MZ header, extended header, then whichever secondary header follows.
//!
//! Decoding runs as a small state machine. Each [`Stage`] reads one thing, stores what it found in
//! the [`Decoded`] record and names the stage that comes next. A read failure ends the cascade,
//! but everything decoded up to that point is kept.

use std::io::{Read, Seek};

use display_bytes::DisplayBytes;
use tracing::debug;

use crate::{le, ne, w3, ByteSource, DecodeError};
use crate::mz::{ExtendedHeader, FarPointer, PrimaryHeader, MagicCheck};


#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Options {
    /// Start at this secondary header instead of the one named by the MZ extended header.
    pub next_header_override: Option<u64>,
    pub walk: ne::WalkOptions,
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OffsetOrigin {
    ExtendedHeader,
    Override,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NextHeader {
    pub offset: u64,
    pub origin: OffsetOrigin,
}


#[derive(Debug)]
pub struct Primary {
    pub header: PrimaryHeader,
    pub relocations: Result<Vec<FarPointer>, DecodeError>,
    pub extended: Option<ExtendedHeader>,
}


#[derive(Debug)]
pub enum Secondary {
    Ne(ne::Image),
    Le(le::Header),
    W3(w3::Container),

    /// Recognized by its signature; not decoded any further.
    Pe { offset: u64 },

    Unknown { offset: u64, tag: DisplayBytes<2>, value: u16 },
}


#[derive(Debug)]
pub enum Outcome {
    /// The cascade ran to its end.
    Complete,

    /// The file does not start with an MZ signature.
    NotMz { magic: DisplayBytes<2> },

    /// The MZ header leaves no room for an extended header, so there is nothing to follow.
    NoExtendedHeader,

    /// Reading failed; the cascade stopped there.
    Failed(DecodeError),
}


#[derive(Debug)]
pub struct Decoded {
    pub primary: Option<Primary>,
    pub next_header: Option<NextHeader>,
    pub secondary: Option<Secondary>,
    pub outcome: Outcome,
}
impl Default for Decoded {
    fn default() -> Self {
        Self {
            primary: None,
            next_header: None,
            secondary: None,
            outcome: Outcome::Complete,
        }
    }
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
enum Stage {
    Primary,
    Dispatch { offset: u64 },
    Ne { offset: u64 },
    Le { offset: u64 },
    W3 { offset: u64 },
    Pe { offset: u64 },
    Unknown { offset: u64, tag: [u8; 2] },
    Done,
}


/// Runs the cascade over one file.
pub fn decode<R: Read + Seek>(source: &mut ByteSource<R>, options: &Options) -> Decoded {
    let mut decoded = Decoded::default();

    let mut stage = match options.next_header_override {
        Some(offset) => {
            debug!("skipping MZ detection; next header at {:#010X} as requested", offset);
            decoded.next_header = Some(NextHeader { offset, origin: OffsetOrigin::Override });
            Stage::Dispatch { offset }
        },
        None => Stage::Primary,
    };

    while stage != Stage::Done {
        stage = match step(source, options, stage, &mut decoded) {
            Ok(next) => next,
            Err(e) => {
                debug!("cascade stopped: {}", e);
                decoded.outcome = Outcome::Failed(e);
                Stage::Done
            },
        };
    }
    decoded
}


fn step<R: Read + Seek>(source: &mut ByteSource<R>, options: &Options, stage: Stage, decoded: &mut Decoded) -> Result<Stage, DecodeError> {
    match stage {
        Stage::Primary => {
            let header = match PrimaryHeader::read(source)? {
                MagicCheck::Mz(header) => header,
                MagicCheck::NotMz { magic } => {
                    decoded.outcome = Outcome::NotMz { magic };
                    return Ok(Stage::Done);
                },
            };
            let relocations = header.read_relocations(source);
            decoded.primary = Some(Primary { header, relocations, extended: None });

            if !header.has_extended_header() {
                decoded.outcome = Outcome::NoExtendedHeader;
                return Ok(Stage::Done);
            }

            let extended = ExtendedHeader::read(source)?;
            let offset = u64::from(extended.next_header_offset);
            if let Some(primary) = decoded.primary.as_mut() {
                primary.extended = Some(extended);
            }
            decoded.next_header = Some(NextHeader { offset, origin: OffsetOrigin::ExtendedHeader });
            Ok(Stage::Dispatch { offset })
        },
        Stage::Dispatch { offset } => {
            if offset >= source.len() {
                return Err(DecodeError::OffsetOutOfRange { offset, file_length: source.len() });
            }
            let tag: [u8; 2] = source.read_array_at(offset)?;
            debug!("next header tag at {:#010X}: {:02X} {:02X}", offset, tag[0], tag[1]);
            Ok(match &tag {
                b"NE" => Stage::Ne { offset },
                b"LE" | b"LX" => Stage::Le { offset },
                b"W3" => Stage::W3 { offset },
                b"PE" => Stage::Pe { offset },
                _ => Stage::Unknown { offset, tag },
            })
        },
        Stage::Ne { offset } => {
            let image = ne::Image::read(source, offset, &options.walk)?;
            decoded.secondary = Some(Secondary::Ne(image));
            Ok(Stage::Done)
        },
        Stage::Le { offset } => {
            let header = le::Header::read(source, offset)?;
            decoded.secondary = Some(Secondary::Le(header));
            Ok(Stage::Done)
        },
        Stage::W3 { offset } => {
            let container = w3::Container::read(source, offset)?;
            decoded.secondary = Some(Secondary::W3(container));
            Ok(Stage::Done)
        },
        Stage::Pe { offset } => {
            decoded.secondary = Some(Secondary::Pe { offset });
            Ok(Stage::Done)
        },
        Stage::Unknown { offset, tag } => {
            decoded.secondary = Some(Secondary::Unknown {
                offset,
                tag: tag.into(),
                value: u16::from_le_bytes(tag),
            });
            Ok(Stage::Done)
        },
        Stage::Done => Ok(Stage::Done),
    }
}
