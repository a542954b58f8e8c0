//! PDF page rendering through poppler's `pdftoppm`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, instrument};

use crate::core::RasterImage;
use crate::error::{DiffError, DiffResult};

/// PDF user space is 72 units per inch.
pub const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    /// Executable to invoke. Defaults to `pdftoppm` on `PATH`.
    pub program: PathBuf,
}

impl Default for PdfRasterizer {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
        }
    }
}

impl PdfRasterizer {
    pub fn dpi(scale_factor: f32) -> u32 {
        (POINTS_PER_INCH * scale_factor).round().max(1.0) as u32
    }

    fn args(document: &Path, page_index: u32, dpi: u32, out_prefix: &Path) -> Vec<String> {
        let page = (page_index + 1).to_string();
        vec![
            "-f".into(),
            page.clone(),
            "-l".into(),
            page,
            "-r".into(),
            dpi.to_string(),
            "-png".into(),
            "-singlefile".into(),
            document.display().to_string(),
            out_prefix.display().to_string(),
        ]
    }
}

impl super::Rasterizer for PdfRasterizer {
    #[instrument(skip(self), fields(document = %document.display()))]
    fn rasterize(&self, document: &Path, page_index: u32, scale_factor: f32) -> DiffResult<RasterImage> {
        let input = document.display().to_string();
        if !(scale_factor.is_finite() && scale_factor > 0.0) {
            return Err(DiffError::validation("scale_factor", "must be a finite value > 0", scale_factor.to_string()));
        }
        if !document.is_file() {
            return Err(DiffError::load_failed(input, "file does not exist"));
        }

        let scratch = tempfile::tempdir().map_err(|e| DiffError::io("create scratch dir", e))?;
        let prefix = scratch.path().join("page");
        let dpi = Self::dpi(scale_factor);
        debug!(dpi, page_index, "rendering pdf page");

        let output = Command::new(&self.program)
            .args(Self::args(document, page_index, dpi, &prefix))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                DiffError::load_failed(input.clone(), format!("failed to start {}: {}", self.program.display(), e))
                    .with_recovery_suggestion("Install poppler-utils so pdftoppm is on PATH")
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiffError::load_failed(
                input,
                format!("pdftoppm exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let rendered = prefix.with_extension("png");
        RasterImage::open(&rendered).map_err(|_| DiffError::load_failed(input, format!("page {} produced no image", page_index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Rasterizer;

    #[test]
    fn dpi_from_scale() {
        assert_eq!(PdfRasterizer::dpi(1.0), 72);
        assert_eq!(PdfRasterizer::dpi(3.0), 216);
    }

    #[test]
    fn args_select_single_one_based_page() {
        let args = PdfRasterizer::args(Path::new("in.pdf"), 2, 216, Path::new("/tmp/x/page"));
        assert_eq!(&args[..4], ["-f", "3", "-l", "3"]);
        assert!(args.contains(&"-singlefile".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/x/page"));
    }

    #[test]
    fn missing_file_is_load_failed() {
        let err = PdfRasterizer::default()
            .rasterize(Path::new("/definitely/not/here.pdf"), 0, 3.0)
            .unwrap_err();
        assert_eq!(err.category(), "load_failed");
    }
}
