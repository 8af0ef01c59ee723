use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::ContextError;
use crate::layout::{self, PageGeometry};
use crate::pdf::Renderer;

/// The document extensions accepted by the conversion flow, matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["doc", "docx", "pptx", "txt"];

/// Whether the given extension (without the leading dot) is accepted for conversion.
pub fn is_supported_extension(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(extension))
}

/// The contract of the external office-document converter: turn the input file into a PDF
/// inside the given directory and return the path of the produced file.
pub trait DocumentConverter {
    fn convert(&self, input_path: &Path, output_directory: &Path) -> Result<PathBuf, ContextError>;
}

/// Converter backend delegating to a headless LibreOffice process. The executable is
/// located per request: an explicitly configured path wins, then the well-known install
/// locations are probed, then `libreoffice` and `soffice` are tried through `PATH`.
pub struct LibreOfficeConverter {
    /// Overrides the executable discovery when set.
    executable_override: Option<PathBuf>,
    /// How long one conversion may run before the process is killed.
    timeout: Duration,
}

/// Install locations probed before falling back to a `PATH` lookup.
const WELL_KNOWN_EXECUTABLE_PATHS: [&str; 2] = [
    "C:\\Program Files\\LibreOffice\\program\\soffice.exe",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
];

/// Executable names resolved through `PATH` when no install location matched.
const PATH_EXECUTABLE_NAMES: [&str; 2] = ["libreoffice", "soffice"];

const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(120);

impl Default for LibreOfficeConverter {
    fn default() -> Self {
        LibreOfficeConverter {
            executable_override: None,
            timeout: DEFAULT_CONVERSION_TIMEOUT,
        }
    }
}

impl LibreOfficeConverter {
    pub fn new(executable_override: Option<PathBuf>) -> LibreOfficeConverter {
        LibreOfficeConverter {
            executable_override,
            ..LibreOfficeConverter::default()
        }
    }

    /// The executable candidates tried for this conversion, in order.
    fn executable_candidates(&self) -> Vec<PathBuf> {
        if let Some(executable) = &self.executable_override {
            return vec![executable.clone()];
        }
        let mut candidates: Vec<PathBuf> = WELL_KNOWN_EXECUTABLE_PATHS
            .iter()
            .map(PathBuf::from)
            .filter(|path| path.exists())
            .collect();
        candidates.extend(PATH_EXECUTABLE_NAMES.iter().map(PathBuf::from));
        candidates
    }

    /// Waits for the spawned converter with the configured bound, killing the process on
    /// expiry. Returns whether it exited successfully and the captured standard error.
    fn wait_bounded(
        &self,
        child: &mut std::process::Child,
    ) -> Result<(bool, String), ContextError> {
        let started_at = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started_at.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ContextError::with_context(format!(
                            "The converter did not finish within {} seconds",
                            self.timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(error) => {
                    return Err(ContextError::with_error(
                        "Unable to wait for the converter execution",
                        &error,
                    ));
                }
            }
        };

        let mut captured_stderr = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            use std::io::Read as _;
            let _ = stderr.read_to_string(&mut captured_stderr);
        }

        Ok((status.success(), captured_stderr))
    }
}

impl DocumentConverter for LibreOfficeConverter {
    fn convert(&self, input_path: &Path, output_directory: &Path) -> Result<PathBuf, ContextError> {
        // The converter names its output after the input stem with a .pdf extension,
        // inside the requested directory
        let input_stem = input_path
            .file_stem()
            .ok_or(ContextError::with_context(format!(
                "The input path {:?} has no file name",
                input_path
            )))?;
        let expected_output_path = output_directory.join(format!(
            "{}.pdf",
            input_stem.to_string_lossy()
        ));

        let mut last_error =
            ContextError::with_context("No LibreOffice installation was found on this host");
        for executable in self.executable_candidates() {
            log::debug!("Trying the converter executable {:?}", executable);
            let mut child = match Command::new(&executable)
                .arg("--headless")
                .arg("--convert-to")
                .arg("pdf")
                .arg("--outdir")
                .arg(output_directory)
                .arg(input_path)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
            {
                Ok(child) => child,
                Err(error) => {
                    // A spawn failure means this candidate does not exist, move on
                    last_error = ContextError::with_error(
                        format!("Unable to run the converter executable {:?}", executable),
                        &error,
                    );
                    continue;
                }
            };

            let (exited_successfully, captured_stderr) = self.wait_bounded(&mut child)?;
            if !exited_successfully {
                return Err(ContextError::with_context(format!(
                    "The converter failed: {}",
                    captured_stderr.trim()
                )));
            }
            // An exit status of zero with a missing output file is still a failure
            if expected_output_path.exists() {
                return Ok(expected_output_path);
            }
            return Err(ContextError::with_context(format!(
                "The converter exited successfully but produced no file at {:?}",
                expected_output_path
            )));
        }

        Err(last_error)
    }
}

/// Converts a plain-text file into a PDF through the internal renderer: every line is
/// emitted left-aligned under a fixed top margin, without the centering of the build flow.
pub fn plain_text_to_pdf(
    input_path: &Path,
    output_path: &Path,
    renderer: &Renderer,
    geometry: &PageGeometry,
) -> Result<(), ContextError> {
    let text = std::fs::read_to_string(input_path).map_err(|error| {
        ContextError::with_error(
            format!("Failed to read the text file {:?}", input_path),
            &error,
        )
    })?;

    let pages = layout::layout_plain_text(&text, geometry);
    renderer.render_to_file(&pages, &[], geometry, output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert!(is_supported_extension("docx"));
        assert!(is_supported_extension("DOCX"));
        assert!(is_supported_extension("Txt"));
        assert!(!is_supported_extension("pdf"));
        assert!(!is_supported_extension("png"));
    }

    #[test]
    fn a_missing_converter_executable_is_reported_cleanly() {
        let temp_directory = tempfile::tempdir().unwrap();
        let input_path = temp_directory.path().join("report.docx");
        std::fs::write(&input_path, b"not really a document").unwrap();

        let converter =
            LibreOfficeConverter::new(Some(PathBuf::from("/nonexistent/soffice-binary")));
        let result = converter.convert(&input_path, temp_directory.path());

        assert!(result.is_err());
        // No output file may be left behind
        assert!(!temp_directory.path().join("report.pdf").exists());
    }

    #[test]
    fn plain_text_conversion_writes_a_loadable_pdf() {
        let temp_directory = tempfile::tempdir().unwrap();
        let input_path = temp_directory.path().join("notes.txt");
        let output_path = temp_directory.path().join("notes.pdf");
        std::fs::write(&input_path, "first line\n\nsecond line\n").unwrap();

        let renderer = Renderer::new(&[]);
        plain_text_to_pdf(
            &input_path,
            &output_path,
            &renderer,
            &PageGeometry::default(),
        )
        .unwrap();

        let pdf_document_bytes = std::fs::read(&output_path).unwrap();
        let pdf_document = lopdf::Document::load_mem(&pdf_document_bytes).unwrap();
        assert_eq!(pdf_document.get_pages().len(), 1);
    }
}
