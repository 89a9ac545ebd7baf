//! Minimal PE header parsing for the second-pass structural probe.
//!
//! Layout consulted here, all little-endian:
//!
//! - DOS header: `MZ` at offset 0, `e_lfanew` (u32) at offset 0x3C
//! - NT headers at `e_lfanew`: `PE\0\0` signature, then the 20-byte COFF
//!   file header (machine, section count, timestamp, ...), then the
//!   optional header whose leading magic (`0x10B` / `0x20B`) decides
//!   whether the image is PE32 or PE32+
//!
//! The probe only confirms structural validity and architecture fit; it
//! deliberately does not interpret sections, imports or anything deeper.

use crate::error::{Error, Result};
use crate::report::{ReportSink, Severity};
use std::path::{Path, PathBuf};
use tracing::trace;

use super::HeaderProbe;

/// Offset of `e_lfanew` in the DOS header
const E_LFANEW_OFFSET: usize = 0x3C;

/// Minimum DOS header size; `e_lfanew` must be readable
const DOS_HEADER_SIZE: usize = 0x40;

/// NT signature bytes
const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";

/// Bytes needed at `e_lfanew`: signature (4) + COFF header (20) + optional
/// header magic (2)
const NT_PREFIX_SIZE: usize = 26;

/// Optional header magic for 32-bit images
const MAGIC_PE32: u16 = 0x10B;

/// Optional header magic for 64-bit images
const MAGIC_PE32_PLUS: u16 = 0x20B;

/// Architecture class of a PE image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageClass {
    /// 32-bit image (optional header magic 0x10B)
    Pe32,
    /// 64-bit image (optional header magic 0x20B)
    Pe32Plus,
}

impl ImageClass {
    /// The class matching the architecture this process runs as
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Pe32Plus
        } else {
            Self::Pe32
        }
    }
}

impl std::fmt::Display for ImageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pe32 => write!(f, "PE32"),
            Self::Pe32Plus => write!(f, "PE32+"),
        }
    }
}

/// Tag identifying the execution context a parse runs under.
///
/// Carried through the parser boundary so the probe can decide whether an
/// image matches the architecture the scan is running for.
#[derive(Debug, Clone, Copy)]
pub struct ScanContext {
    /// Process id of the scanning process
    pub pid: u32,
    /// Architecture class candidates must match
    pub image_class: ImageClass,
}

impl ScanContext {
    /// Creates a context for the given architecture class
    pub fn new(image_class: ImageClass) -> Self {
        Self {
            pid: std::process::id(),
            image_class,
        }
    }

    /// Creates a context for the current process architecture
    pub fn current() -> Self {
        Self::new(ImageClass::native())
    }
}

/// Fields extracted from a structurally valid header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedHeader {
    /// COFF machine field
    pub machine: u16,
    /// Number of sections declared in the COFF header
    pub section_count: u16,
    /// COFF link timestamp
    pub timestamp: u32,
    /// Architecture class from the optional header magic
    pub image_class: ImageClass,
}

impl ParsedHeader {
    /// Human-readable name for the COFF machine field
    pub fn machine_name(&self) -> &'static str {
        match self.machine {
            0x014C => "i386",
            0x01C0 => "arm",
            0x01C4 => "armnt",
            0x8664 => "x64",
            0xAA64 => "arm64",
            0x0200 => "ia64",
            _ => "unknown",
        }
    }
}

/// Summary produced by the deep-parse stage for one validated candidate
#[derive(Debug, Clone)]
pub struct Report {
    /// File the candidate came from
    pub path: PathBuf,
    /// Parsed header fields
    pub header: ParsedHeader,
}

impl Report {
    /// Creates a report for a path and its parsed header
    pub fn new(path: impl Into<PathBuf>, header: ParsedHeader) -> Self {
        Self {
            path: path.into(),
            header,
        }
    }

    /// One-line summary suitable for the report sink
    pub fn summary(&self) -> String {
        format!(
            "{}: {} {} image, {} section(s), timestamp {:#010x}",
            self.path.display(),
            self.header.image_class,
            self.header.machine_name(),
            self.header.section_count,
            self.header.timestamp,
        )
    }
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parses and validates the DOS and NT headers of `data`.
///
/// When `expected` is given, an image of any other class is rejected as a
/// wrong-architecture candidate.
pub fn parse_headers(data: &[u8], expected: Option<ImageClass>) -> Result<ParsedHeader> {
    if data.len() < DOS_HEADER_SIZE {
        return Err(Error::bad_image("truncated DOS header"));
    }
    if data[0..2] != super::MAGIC {
        return Err(Error::bad_image("missing MZ signature"));
    }

    let e_lfanew = read_u32(data, E_LFANEW_OFFSET)
        .ok_or_else(|| Error::bad_image("truncated DOS header"))? as usize;
    if e_lfanew < DOS_HEADER_SIZE || e_lfanew.saturating_add(NT_PREFIX_SIZE) > data.len() {
        return Err(Error::bad_image("NT headers out of bounds"));
    }

    if data[e_lfanew..e_lfanew + 4] != PE_SIGNATURE {
        return Err(Error::bad_image("missing PE signature"));
    }

    let machine = read_u16(data, e_lfanew + 4).ok_or_else(|| Error::bad_image("truncated COFF header"))?;
    let section_count =
        read_u16(data, e_lfanew + 6).ok_or_else(|| Error::bad_image("truncated COFF header"))?;
    let timestamp =
        read_u32(data, e_lfanew + 8).ok_or_else(|| Error::bad_image("truncated COFF header"))?;
    let optional_magic =
        read_u16(data, e_lfanew + 24).ok_or_else(|| Error::bad_image("truncated optional header"))?;

    let image_class = match optional_magic {
        MAGIC_PE32 => ImageClass::Pe32,
        MAGIC_PE32_PLUS => ImageClass::Pe32Plus,
        other => {
            return Err(Error::bad_image(format!(
                "unknown optional header magic {other:#06x}"
            )))
        }
    };

    if let Some(expected) = expected {
        if image_class != expected {
            return Err(Error::bad_image(format!(
                "wrong architecture: image is {image_class}, scan expects {expected}"
            )));
        }
    }

    Ok(ParsedHeader {
        machine,
        section_count,
        timestamp,
        image_class,
    })
}

/// Built-in structural probe and summary reporter for PE images
#[derive(Debug, Default, Clone)]
pub struct PeProbe;

impl PeProbe {
    /// Creates a new probe
    pub fn new() -> Self {
        Self
    }
}

impl HeaderProbe for PeProbe {
    fn probe_header(&self, ctx: &ScanContext, data: &[u8]) -> Result<ParsedHeader> {
        parse_headers(data, Some(ctx.image_class))
    }

    fn deep_parse_and_report(
        &self,
        ctx: &ScanContext,
        data: &[u8],
        path: &Path,
        sink: &dyn ReportSink,
    ) -> Result<Report> {
        let header = parse_headers(data, Some(ctx.image_class))?;
        let report = Report::new(path, header);
        trace!(path = %path.display(), machine = header.machine, "deep parse complete");
        sink.line(Severity::Info, &report.summary());
        Ok(report)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_image() {
        let image = testutil::minimal_image(ImageClass::Pe32Plus);
        let header = parse_headers(&image, None).unwrap();

        assert_eq!(header.image_class, ImageClass::Pe32Plus);
        assert_eq!(header.machine, 0x8664);
        assert_eq!(header.machine_name(), "x64");
        assert_eq!(header.section_count, 2);
    }

    #[test]
    fn test_truncated_dos_header_rejected() {
        assert!(parse_headers(b"MZ", None).is_err());
    }

    #[test]
    fn test_missing_pe_signature_rejected() {
        let mut image = testutil::minimal_image(ImageClass::Pe32);
        image[DOS_HEADER_SIZE] = b'X';
        assert!(parse_headers(&image, None).is_err());
    }

    #[test]
    fn test_e_lfanew_out_of_bounds_rejected() {
        let mut image = testutil::minimal_image(ImageClass::Pe32);
        image[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4]
            .copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        assert!(parse_headers(&image, None).is_err());
    }

    #[test]
    fn test_unknown_optional_magic_rejected() {
        let mut image = testutil::minimal_image(ImageClass::Pe32);
        image[DOS_HEADER_SIZE + 24..DOS_HEADER_SIZE + 26]
            .copy_from_slice(&0x0107u16.to_le_bytes());
        assert!(parse_headers(&image, None).is_err());
    }

    #[test]
    fn test_wrong_architecture_rejected() {
        let image = testutil::minimal_image(ImageClass::Pe32);
        assert!(parse_headers(&image, Some(ImageClass::Pe32Plus)).is_err());
        assert!(parse_headers(&image, Some(ImageClass::Pe32)).is_ok());
    }

    #[test]
    fn test_probe_matches_context() {
        let probe = PeProbe::new();
        let image = testutil::minimal_image(ImageClass::Pe32Plus);

        let ctx64 = ScanContext::new(ImageClass::Pe32Plus);
        assert!(probe.probe_header(&ctx64, &image).is_ok());

        let ctx32 = ScanContext::new(ImageClass::Pe32);
        assert!(probe.probe_header(&ctx32, &image).is_err());
    }

    #[test]
    fn test_deep_parse_emits_summary() {
        let probe = PeProbe::new();
        let sink = MemorySink::new();
        let ctx = ScanContext::new(ImageClass::Pe32Plus);
        let image = testutil::minimal_image(ImageClass::Pe32Plus);

        let report = probe
            .deep_parse_and_report(&ctx, &image, Path::new("/t/b.bin"), &sink)
            .unwrap();

        assert_eq!(report.header.machine_name(), "x64");
        assert!(sink.contains("PE32+ x64 image"));
    }

    #[test]
    fn test_report_summary_format() {
        let header = ParsedHeader {
            machine: 0x014C,
            section_count: 3,
            timestamp: 0x1234,
            image_class: ImageClass::Pe32,
        };
        let report = Report::new("/bin/app.exe", header);
        let summary = report.summary();

        assert!(summary.contains("/bin/app.exe"));
        assert!(summary.contains("PE32 i386 image"));
        assert!(summary.contains("3 section(s)"));
    }
}
