//! Candidate validation pipeline.
//!
//! This module implements the cheap, strictly ordered pre-validation that
//! runs before a file is handed to the deep parser:
//!
//! 1. Open the file and obtain its size from the end position
//! 2. Reject empty files
//! 3. Reject files whose size does not fit the PE 32-bit size field
//! 4. Rewind and peek the two `MZ` signature bytes (pass 1)
//! 5. Rewind again, allocate a full-size buffer, read everything
//! 6. Run the structural header probe (pass 2)
//! 7. Forward the validated buffer to the deep parser
//!
//! The signature peek happens before the full-size allocation, so files that
//! obviously are not PE images cost two bytes of I/O and no buffer. Every
//! stage is terminal for its file; nothing here retries.

pub mod pe;

use crate::error::{Error, IoStage, Result, SizeReason};
use crate::report::{ReportSink, Severity};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace};

pub use pe::{ImageClass, ParsedHeader, PeProbe, Report, ScanContext};

/// The PE DOS signature every candidate must start with
pub const MAGIC: [u8; 2] = *b"MZ";

/// Largest file size the PE format can describe (32-bit size field)
pub const MAX_CANDIDATE_SIZE: u64 = u32::MAX as u64;

/// An in-memory byte buffer read from a file, awaiting deep parsing.
///
/// Owned exclusively by the validation attempt that allocated it; dropped
/// when that attempt completes or fails.
#[derive(Debug)]
pub struct Candidate {
    data: Vec<u8>,
}

impl Candidate {
    /// The candidate's bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The candidate's declared length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer is empty (never the case for a candidate
    /// that passed validation)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Why a candidate was turned away before deep parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Zero-byte file
    Empty,
    /// Size exceeds what the format's length field can describe
    TooLarge,
    /// Buffer allocation failed; file flagged as unsupported
    AllocFailed,
    /// First two bytes are not `MZ` (pass 1)
    MagicMismatch,
    /// Structural header probe failed (pass 2)
    HeaderProbe,
    /// Deep parser reported a format error after both passes succeeded
    DeepParse,
}

/// Terminal outcome of validating (and possibly parsing) one file.
///
/// There are no partial states: a file is parsed, rejected for a stated
/// reason, or failed on a stated I/O stage.
#[derive(Debug)]
pub enum Outcome {
    /// Both format checks passed and the deep parser produced a report
    Parsed(Report),
    /// The file is not a usable candidate
    Rejected(RejectReason),
    /// An I/O operation failed; the stage identifies which one
    Failed {
        /// Pipeline stage that failed
        stage: IoStage,
        /// Underlying I/O error
        source: io::Error,
    },
}

impl Outcome {
    fn failed(stage: IoStage, source: io::Error) -> Self {
        Self::Failed { stage, source }
    }
}

/// Boundary to the external structural parser.
///
/// [`probe_header`](HeaderProbe::probe_header) is the cheap second-pass
/// check confirming the buffer is a structurally valid image for the given
/// execution context. [`deep_parse_and_report`](HeaderProbe::deep_parse_and_report)
/// is the expensive stage a validated candidate is forwarded to. Both are
/// synchronous and retain no state between invocations.
pub trait HeaderProbe: Send + Sync {
    /// Validates the image headers for the given execution context
    fn probe_header(&self, ctx: &ScanContext, data: &[u8]) -> Result<ParsedHeader>;

    /// Fully parses a validated candidate and emits its report lines
    fn deep_parse_and_report(
        &self,
        ctx: &ScanContext,
        data: &[u8],
        path: &Path,
        sink: &dyn ReportSink,
    ) -> Result<Report>;
}

/// Runs the full validation pipeline on one file and forwards validated
/// candidates to the probe's deep-parse stage.
///
/// Diagnostic lines for every terminal outcome are written to `sink`; the
/// returned [`Outcome`] carries the same information for callers that want
/// to inspect it.
pub fn sniff_file(
    ctx: &ScanContext,
    path: &Path,
    probe: &dyn HeaderProbe,
    sink: &dyn ReportSink,
) -> Outcome {
    trace!(path = %path.display(), "validating candidate");

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            sink.line(
                Severity::Warn,
                &format!("failed to open file: {}", path.display()),
            );
            return Outcome::failed(IoStage::Open, e);
        }
    };

    // Position at end to obtain the size without a separate metadata call.
    let size = match file.seek(SeekFrom::End(0)) {
        Ok(n) => n,
        Err(e) => {
            sink.line(
                Severity::Warn,
                &format!("failed to open file: {}", path.display()),
            );
            return Outcome::failed(IoStage::Open, e);
        }
    };

    if size == 0 {
        sink.line(
            Severity::Warn,
            &format!("empty or invalid file: {}", path.display()),
        );
        return Outcome::Rejected(RejectReason::Empty);
    }

    if size > MAX_CANDIDATE_SIZE {
        sink.line(
            Severity::Warn,
            &format!("file too large to be a valid PE: {}", path.display()),
        );
        return Outcome::Rejected(RejectReason::TooLarge);
    }

    if let Err(e) = file.seek(SeekFrom::Start(0)) {
        sink.line(
            Severity::Warn,
            &format!("seeking to beginning of file failed (1): {}", path.display()),
        );
        return Outcome::failed(IoStage::SeekStart, e);
    }

    // Peek the signature before committing to a full-size buffer.
    let mut magic = [0u8; 2];
    if let Err(e) = file.read_exact(&mut magic) {
        sink.line(
            Severity::Warn,
            &format!("failed to read header signature: {}", path.display()),
        );
        return Outcome::failed(IoStage::ReadSignature, e);
    }

    if magic != MAGIC {
        sink.line(
            Severity::Warn,
            &format!("not a PE file (pass 1): {}", path.display()),
        );
        return Outcome::Rejected(RejectReason::MagicMismatch);
    }

    if let Err(e) = file.seek(SeekFrom::Start(0)) {
        sink.line(
            Severity::Warn,
            &format!("seeking to beginning of file failed (2): {}", path.display()),
        );
        return Outcome::failed(IoStage::Rewind, e);
    }

    let mut data = Vec::new();
    if data.try_reserve_exact(size as usize).is_err() {
        sink.line(
            Severity::Warn,
            &format!("file too large: {}", path.display()),
        );
        sink.unsupported(path);
        return Outcome::Rejected(RejectReason::AllocFailed);
    }

    match file.take(size).read_to_end(&mut data) {
        Ok(n) if n as u64 == size => {}
        Ok(n) => {
            sink.line(
                Severity::Warn,
                &format!("failed to read file data: {}", path.display()),
            );
            let short = io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read: {n} of {size} bytes"),
            );
            return Outcome::failed(IoStage::ReadAll, short);
        }
        Err(e) => {
            sink.line(
                Severity::Warn,
                &format!("failed to read file data: {}", path.display()),
            );
            return Outcome::failed(IoStage::ReadAll, e);
        }
    }

    let candidate = Candidate { data };
    debug!(path = %path.display(), len = candidate.len(), "candidate read");

    if let Err(e) = probe.probe_header(ctx, candidate.as_bytes()) {
        trace!(path = %path.display(), %e, "header probe rejected candidate");
        sink.line(
            Severity::Warn,
            &format!("not a PE file or wrong architecture (pass 2): {}", path.display()),
        );
        return Outcome::Rejected(RejectReason::HeaderProbe);
    }

    match probe.deep_parse_and_report(ctx, candidate.as_bytes(), path, sink) {
        Ok(report) => Outcome::Parsed(report),
        Err(e) => {
            sink.line(
                Severity::Warn,
                &format!("deep parse failed for {}: {e}", path.display()),
            );
            Outcome::Rejected(RejectReason::DeepParse)
        }
    }
}

/// Maps a terminal outcome onto the library error taxonomy.
///
/// Useful for callers that validate a single file and want a `Result`
/// instead of inspecting [`Outcome`] variants.
pub fn outcome_to_result(path: &Path, outcome: Outcome) -> Result<Report> {
    match outcome {
        Outcome::Parsed(report) => Ok(report),
        Outcome::Rejected(RejectReason::Empty) => {
            Err(Error::size_rejected(path, SizeReason::Empty))
        }
        Outcome::Rejected(RejectReason::TooLarge) => {
            Err(Error::size_rejected(path, SizeReason::TooLarge))
        }
        Outcome::Rejected(RejectReason::AllocFailed) => {
            Err(Error::size_rejected(path, SizeReason::AllocFailed))
        }
        Outcome::Rejected(RejectReason::MagicMismatch) => Err(Error::format_rejected(path, 1)),
        Outcome::Rejected(RejectReason::HeaderProbe | RejectReason::DeepParse) => {
            Err(Error::format_rejected(path, 2))
        }
        Outcome::Failed { stage, source } => Err(Error::io(stage, path, source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use parking_lot::Mutex;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Probe double that records every buffer it sees
    #[derive(Default)]
    struct CapturingProbe {
        probed: Mutex<Vec<Vec<u8>>>,
        parsed: Mutex<Vec<Vec<u8>>>,
    }

    impl HeaderProbe for CapturingProbe {
        fn probe_header(&self, _ctx: &ScanContext, data: &[u8]) -> Result<ParsedHeader> {
            self.probed.lock().push(data.to_vec());
            pe::parse_headers(data, None)
        }

        fn deep_parse_and_report(
            &self,
            _ctx: &ScanContext,
            data: &[u8],
            path: &Path,
            _sink: &dyn ReportSink,
        ) -> Result<Report> {
            self.parsed.lock().push(data.to_vec());
            Ok(Report::new(path, pe::parse_headers(data, None)?))
        }
    }

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn ctx() -> ScanContext {
        ScanContext::new(ImageClass::Pe32Plus)
    }

    #[test]
    fn test_missing_file_fails_at_open() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let probe = CapturingProbe::default();

        let outcome = sniff_file(&ctx(), &dir.path().join("gone.bin"), &probe, &sink);
        assert!(matches!(
            outcome,
            Outcome::Failed { stage: IoStage::Open, .. }
        ));
        assert!(sink.contains("failed to open"));
    }

    #[test]
    fn test_empty_file_rejected_before_read() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.bin", b"");
        let sink = MemorySink::new();
        let probe = CapturingProbe::default();

        let outcome = sniff_file(&ctx(), &path, &probe, &sink);
        assert!(matches!(outcome, Outcome::Rejected(RejectReason::Empty)));
        assert!(probe.probed.lock().is_empty());
        assert!(sink.contains("empty or invalid"));
    }

    #[test]
    fn test_wrong_magic_rejected_pass_one_without_full_read() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.bin", b"XY");
        let sink = MemorySink::new();
        let probe = CapturingProbe::default();

        let outcome = sniff_file(&ctx(), &path, &probe, &sink);
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectReason::MagicMismatch)
        ));
        // Pass 1 rejection means the probe never saw a buffer.
        assert!(probe.probed.lock().is_empty());
        assert!(probe.parsed.lock().is_empty());
        assert!(sink.contains("pass 1"));
    }

    #[test]
    fn test_one_byte_file_fails_signature_read() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "m.bin", b"M");
        let sink = MemorySink::new();
        let probe = CapturingProbe::default();

        let outcome = sniff_file(&ctx(), &path, &probe, &sink);
        assert!(matches!(
            outcome,
            Outcome::Failed { stage: IoStage::ReadSignature, .. }
        ));
    }

    #[test]
    fn test_mz_but_malformed_rejected_pass_two() {
        let dir = TempDir::new().unwrap();
        // Valid signature, garbage after it.
        let path = write_file(&dir, "mz.bin", b"MZ not actually a portable executable");
        let sink = MemorySink::new();
        let probe = CapturingProbe::default();

        let outcome = sniff_file(&ctx(), &path, &probe, &sink);
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectReason::HeaderProbe)
        ));
        assert_eq!(probe.probed.lock().len(), 1);
        assert!(probe.parsed.lock().is_empty());
        assert!(sink.contains("pass 2"));
    }

    #[test]
    fn test_valid_candidate_forwarded_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let image = pe::testutil::minimal_image(ImageClass::Pe32Plus);
        let path = write_file(&dir, "b.bin", &image);
        let sink = MemorySink::new();
        let probe = CapturingProbe::default();

        let outcome = sniff_file(&ctx(), &path, &probe, &sink);
        assert!(matches!(outcome, Outcome::Parsed(_)));

        let parsed = probe.parsed.lock();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], image);
    }

    #[test]
    fn test_outcome_to_result_mapping() {
        let path = Path::new("/t/x.bin");

        let err = outcome_to_result(path, Outcome::Rejected(RejectReason::MagicMismatch))
            .unwrap_err();
        assert!(matches!(err, Error::FormatRejected { pass: 1, .. }));

        let err = outcome_to_result(path, Outcome::Rejected(RejectReason::HeaderProbe))
            .unwrap_err();
        assert!(matches!(err, Error::FormatRejected { pass: 2, .. }));

        let err = outcome_to_result(path, Outcome::Rejected(RejectReason::AllocFailed))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeRejected { reason: SizeReason::AllocFailed, .. }
        ));
    }
}
