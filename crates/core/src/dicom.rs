use crate::error::{EngineError, EngineResult};
use crate::metadata::{MetadataSource, TagMap, TagValue, FAMILY_NAME, GIVEN_NAME};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
/// Values longer than this are never naming material.
const MAX_VALUE_LEN: u32 = 64 * 1024;
const MAX_SEQUENCE_DEPTH: usize = 64;

const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";

const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);
const ITEM: Tag = Tag(0xFFFE, 0xE000);
const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

/// VRs whose explicit encoding uses two reserved bytes and a 32-bit length.
const LONG_VRS: &[&[u8; 2]] = &[
    b"OB", b"OD", b"OF", b"OL", b"OV", b"OW", b"SQ", b"SV", b"UC", b"UN", b"UR", b"UT", b"UV",
];

/// Tags kept by the reader: (group, element, VR, keyword).
const DICTIONARY: &[(u16, u16, &[u8; 2], &str)] = &[
    (0x0002, 0x0003, b"UI", "MediaStorageSOPInstanceUID"),
    (0x0002, 0x0010, b"UI", "TransferSyntaxUID"),
    (0x0008, 0x0008, b"CS", "ImageType"),
    (0x0008, 0x0016, b"UI", "SOPClassUID"),
    (0x0008, 0x0018, b"UI", "SOPInstanceUID"),
    (0x0008, 0x0020, b"DA", "StudyDate"),
    (0x0008, 0x0021, b"DA", "SeriesDate"),
    (0x0008, 0x0022, b"DA", "AcquisitionDate"),
    (0x0008, 0x0023, b"DA", "ContentDate"),
    (0x0008, 0x0030, b"TM", "StudyTime"),
    (0x0008, 0x0031, b"TM", "SeriesTime"),
    (0x0008, 0x0050, b"SH", "AccessionNumber"),
    (0x0008, 0x0060, b"CS", "Modality"),
    (0x0008, 0x0070, b"LO", "Manufacturer"),
    (0x0008, 0x0080, b"LO", "InstitutionName"),
    (0x0008, 0x0090, b"PN", "ReferringPhysicianName"),
    (0x0008, 0x1010, b"SH", "StationName"),
    (0x0008, 0x1030, b"LO", "StudyDescription"),
    (0x0008, 0x103E, b"LO", "SeriesDescription"),
    (0x0008, 0x1040, b"LO", "InstitutionalDepartmentName"),
    (0x0008, 0x1050, b"PN", "PerformingPhysicianName"),
    (0x0008, 0x1070, b"PN", "OperatorName"),
    (0x0008, 0x1090, b"LO", "ManufacturerModelName"),
    (0x0010, 0x0010, b"PN", "PatientName"),
    (0x0010, 0x0020, b"LO", "PatientID"),
    (0x0010, 0x0030, b"DA", "PatientBirthDate"),
    (0x0010, 0x0040, b"CS", "PatientSex"),
    (0x0010, 0x1010, b"AS", "PatientAge"),
    (0x0010, 0x1030, b"DS", "PatientWeight"),
    (0x0018, 0x0015, b"CS", "BodyPartExamined"),
    (0x0018, 0x0050, b"DS", "SliceThickness"),
    (0x0018, 0x0087, b"DS", "MagneticFieldStrength"),
    (0x0018, 0x1030, b"LO", "ProtocolName"),
    (0x0020, 0x000D, b"UI", "StudyInstanceUID"),
    (0x0020, 0x000E, b"UI", "SeriesInstanceUID"),
    (0x0020, 0x0010, b"SH", "StudyID"),
    (0x0020, 0x0011, b"IS", "SeriesNumber"),
    (0x0020, 0x0012, b"IS", "AcquisitionNumber"),
    (0x0020, 0x0013, b"IS", "InstanceNumber"),
    (0x0020, 0x4000, b"LT", "ImageComments"),
    (0x0028, 0x0010, b"US", "Rows"),
    (0x0028, 0x0011, b"US", "Columns"),
    (0x0032, 0x1032, b"PN", "RequestingPhysician"),
    (0x0032, 0x1060, b"LO", "RequestedProcedureDescription"),
    (0x0032, 0x4000, b"LT", "StudyComments"),
];

const PERSON_NAME_PARTS: [&str; 5] = [FAMILY_NAME, GIVEN_NAME, "MiddleName", "NamePrefix", "NameSuffix"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tag(u16, u16);

impl Tag {
    fn dictionary_entry(self) -> Option<(&'static [u8; 2], &'static str)> {
        DICTIONARY
            .iter()
            .find(|(group, element, _, _)| *group == self.0 && *element == self.1)
            .map(|(_, _, vr, keyword)| (*vr, *keyword))
    }
}

/// Reads DICOM Part 10 files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomFileSource;

impl MetadataSource for DicomFileSource {
    fn is_image_file(&self, path: &Path) -> bool {
        has_dicom_magic(path).unwrap_or(false)
    }

    fn read_tags(&self, path: &Path) -> EngineResult<TagMap> {
        let file = File::open(path).map_err(|err| EngineError::unreadable(path, err))?;
        read_dicom_tags(BufReader::new(file))
            .map_err(|err| EngineError::unreadable(path, format!("{err:#}")))
    }
}

fn has_dicom_magic(path: &Path) -> io::Result<bool> {
    let mut header = [0u8; PREAMBLE_LEN + 4];
    match File::open(path)?.read_exact(&mut header) {
        Ok(()) => Ok(&header[PREAMBLE_LEN..] == MAGIC),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}

/// Parses the file meta group and the data set up to the pixel data.
pub fn read_dicom_tags<R: Read + Seek>(reader: R) -> Result<TagMap> {
    let mut parser = Parser {
        inner: reader,
        explicit: true,
    };
    let mut header = [0u8; PREAMBLE_LEN + 4];
    parser
        .inner
        .read_exact(&mut header)
        .context("file is shorter than the DICOM preamble")?;
    if &header[PREAMBLE_LEN..] != MAGIC {
        bail!("missing DICM marker");
    }

    let mut tags = TagMap::new();
    parser.read_meta_group(&mut tags)?;

    let transfer_syntax = tags.scalar("TransferSyntaxUID").unwrap_or_default();
    match transfer_syntax.as_str() {
        IMPLICIT_VR_LITTLE_ENDIAN => parser.explicit = false,
        EXPLICIT_VR_BIG_ENDIAN => bail!("big endian transfer syntax is not supported"),
        DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => bail!("deflated transfer syntax is not supported"),
        _ => parser.explicit = true,
    }

    parser.read_data_set(&mut tags)?;
    Ok(tags)
}

struct Parser<R> {
    inner: R,
    explicit: bool,
}

impl<R: Read + Seek> Parser<R> {
    fn read_meta_group(&mut self, tags: &mut TagMap) -> Result<()> {
        loop {
            let position = self.inner.stream_position()?;
            let Some(tag) = self.read_tag()? else {
                return Ok(());
            };
            if tag.0 != 0x0002 {
                self.inner.seek(SeekFrom::Start(position))?;
                return Ok(());
            }
            let (vr, len) = self.read_explicit_header()?;
            self.read_value(tag, vr, len, tags)?;
            if tag == TRANSFER_SYNTAX_UID {
                log::trace!("transfer syntax {:?}", tags.scalar("TransferSyntaxUID"));
            }
        }
    }

    fn read_data_set(&mut self, tags: &mut TagMap) -> Result<()> {
        while let Some(tag) = self.read_tag()? {
            if tag == PIXEL_DATA {
                break;
            }
            let (vr, len) = self.read_header(tag)?;
            if &vr == b"SQ" || len == UNDEFINED_LENGTH {
                self.skip_sequence(len, 1)?;
                continue;
            }
            self.read_value(tag, vr, len, tags)?;
        }
        Ok(())
    }

    fn read_value(&mut self, tag: Tag, vr: [u8; 2], len: u32, tags: &mut TagMap) -> Result<()> {
        match tag.dictionary_entry() {
            Some((_, keyword)) if len <= MAX_VALUE_LEN => {
                let mut bytes = vec![0u8; len as usize];
                self.inner
                    .read_exact(&mut bytes)
                    .with_context(|| format!("truncated value for {keyword}"))?;
                let value = decode_value(&vr, &bytes);
                log::trace!("{keyword} = {value:?}");
                tags.insert(keyword, value);
            }
            _ => self.skip(len)?,
        }
        Ok(())
    }

    fn skip_sequence(&mut self, len: u32, depth: usize) -> Result<()> {
        if depth > MAX_SEQUENCE_DEPTH {
            bail!("sequences nested deeper than {MAX_SEQUENCE_DEPTH} levels");
        }
        if len != UNDEFINED_LENGTH {
            return self.skip(len);
        }
        loop {
            let tag = self.read_tag()?.context("sequence not terminated")?;
            let item_len = self.read_u32()?;
            match tag {
                SEQUENCE_DELIMITATION => return Ok(()),
                ITEM if item_len == UNDEFINED_LENGTH => self.skip_item(depth)?,
                ITEM => self.skip(item_len)?,
                other => bail!("unexpected tag {other:04X?} inside sequence"),
            }
        }
    }

    fn skip_item(&mut self, depth: usize) -> Result<()> {
        loop {
            let tag = self.read_tag()?.context("sequence item not terminated")?;
            if tag == ITEM_DELIMITATION {
                self.read_u32()?;
                return Ok(());
            }
            let (vr, len) = self.read_header(tag)?;
            if &vr == b"SQ" || len == UNDEFINED_LENGTH {
                self.skip_sequence(len, depth + 1)?;
            } else {
                self.skip(len)?;
            }
        }
    }

    fn read_header(&mut self, tag: Tag) -> Result<([u8; 2], u32)> {
        if tag.0 == 0xFFFE {
            return Ok((*b"UN", self.read_u32()?));
        }
        if self.explicit {
            return self.read_explicit_header();
        }
        let vr = tag.dictionary_entry().map(|(vr, _)| *vr).unwrap_or(*b"UN");
        Ok((vr, self.read_u32()?))
    }

    fn read_explicit_header(&mut self) -> Result<([u8; 2], u32)> {
        let mut vr = [0u8; 2];
        self.inner.read_exact(&mut vr)?;
        if LONG_VRS.contains(&&vr) {
            self.read_u16()?;
            Ok((vr, self.read_u32()?))
        } else {
            Ok((vr, u32::from(self.read_u16()?)))
        }
    }

    /// `None` at a clean end of stream.
    fn read_tag(&mut self) -> Result<Option<Tag>> {
        let mut raw = [0u8; 4];
        match self.inner.read_exact(&mut raw) {
            Ok(()) => Ok(Some(Tag(
                u16::from_le_bytes([raw[0], raw[1]]),
                u16::from_le_bytes([raw[2], raw[3]]),
            ))),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut raw = [0u8; 2];
        self.inner.read_exact(&mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.inner.read_exact(&mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    fn skip(&mut self, len: u32) -> Result<()> {
        self.inner.seek(SeekFrom::Current(i64::from(len)))?;
        Ok(())
    }
}

fn decode_value(vr: &[u8; 2], bytes: &[u8]) -> TagValue {
    match vr {
        b"PN" => decode_person_name(&decode_text(bytes)),
        b"IS" => {
            let text = decode_text(bytes);
            first_value(&text)
                .parse::<i64>()
                .map(TagValue::Integer)
                .unwrap_or(TagValue::Text(text))
        }
        b"DS" => {
            let text = decode_text(bytes);
            first_value(&text)
                .parse::<f64>()
                .map(TagValue::Decimal)
                .unwrap_or(TagValue::Text(text))
        }
        b"US" if bytes.len() >= 2 => {
            TagValue::Integer(i64::from(u16::from_le_bytes([bytes[0], bytes[1]])))
        }
        b"SS" if bytes.len() >= 2 => {
            TagValue::Integer(i64::from(i16::from_le_bytes([bytes[0], bytes[1]])))
        }
        b"UL" if bytes.len() >= 4 => TagValue::Integer(i64::from(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        b"SL" if bytes.len() >= 4 => TagValue::Integer(i64::from(i32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        b"FL" if bytes.len() >= 4 => TagValue::Decimal(f64::from(f32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))),
        b"FD" if bytes.len() >= 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            TagValue::Decimal(f64::from_le_bytes(raw))
        }
        b"AE" | b"AS" | b"CS" | b"DA" | b"DT" | b"LO" | b"LT" | b"SH" | b"ST" | b"TM" | b"UC"
        | b"UI" | b"UR" | b"UT" => TagValue::Text(decode_text(bytes)),
        _ => TagValue::Bytes(bytes.to_vec()),
    }
}

/// UTF-8 when valid, Latin-1 otherwise; padding stripped.
fn decode_text(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    };
    text.trim_matches(|c: char| c == ' ' || c == '\0').to_string()
}

fn first_value(text: &str) -> &str {
    text.split('\\').next().unwrap_or_default().trim()
}

fn decode_person_name(text: &str) -> TagValue {
    let alphabetic = text.split('=').next().unwrap_or_default();
    let mut parts = alphabetic.split('^');
    let mut fields = BTreeMap::new();
    for (index, name) in PERSON_NAME_PARTS.iter().enumerate() {
        let value = parts.next().unwrap_or_default().trim();
        if index < 2 || !value.is_empty() {
            fields.insert((*name).to_string(), TagValue::from(value));
        }
    }
    TagValue::Composite(fields)
}
