//! Image collaborators: content registration probe and preview copies

use image::{ImageFormat, ImageReader};
use std::fs;
use std::path::Path;

use crate::error::IndexError;
use crate::models::{ImageInfo, Volume};

/// Decides whether a file's content can be registered as an image
pub trait ImageProbe {
    /// Fails with `NotAnImage` if the content cannot be registered
    fn probe(&self, path: &Path) -> Result<ImageInfo, IndexError>;
}

/// Produces a downscaled copy of an image
pub trait PreviewMaker {
    fn make_preview(
        &self,
        source: &Path,
        target: &Path,
        max_width: u32,
        max_height: u32,
    ) -> Result<ImageInfo, IndexError>;
}

/// Probe backed by the `image` crate's header decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodingProbe;

impl ImageProbe for DecodingProbe {
    fn probe(&self, path: &Path) -> Result<ImageInfo, IndexError> {
        // Content sniffing first; the extension is only a fallback
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| IndexError::io_error(Some(path.to_path_buf()), e.to_string()))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| IndexError::not_an_image(path.to_path_buf(), e.to_string()))?;
        if width == 0 || height == 0 {
            return Err(IndexError::not_an_image(
                path.to_path_buf(),
                "image has no pixels",
            ));
        }
        Ok(ImageInfo { width, height })
    }
}

/// Writes JPEG thumbnails that fit inside the requested box
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailMaker;

impl PreviewMaker for ThumbnailMaker {
    fn make_preview(
        &self,
        source: &Path,
        target: &Path,
        max_width: u32,
        max_height: u32,
    ) -> Result<ImageInfo, IndexError> {
        let img = ImageReader::open(source)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| IndexError::preview(source.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| IndexError::preview(source.to_path_buf(), e.to_string()))?;

        // thumbnail() keeps the aspect ratio
        let thumbnail = img.thumbnail(max_width, max_height).to_rgb8();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| IndexError::preview(target.to_path_buf(), e.to_string()))?;
        }
        thumbnail
            .save_with_format(target, ImageFormat::Jpeg)
            .map_err(|e| IndexError::preview(target.to_path_buf(), e.to_string()))?;

        Ok(ImageInfo {
            width: thumbnail.width(),
            height: thumbnail.height(),
        })
    }
}

/// Where preview copies of new photos are stored
pub struct PreviewSettings {
    /// Volume receiving the preview files
    pub volume: Volume,
    pub maker: Box<dyn PreviewMaker + Send>,
}

impl PreviewSettings {
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            maker: Box::new(ThumbnailMaker),
        }
    }

    pub fn with_maker(mut self, maker: Box<dyn PreviewMaker + Send>) -> Self {
        self.maker = maker;
        self
    }

    /// Volume-relative path of the preview for the given original hash
    pub fn relative_path_for(hash: &str) -> String {
        let prefix: String = hash.chars().take(2).collect();
        format!("{}/{}.jpg", prefix, hash)
    }
}

impl std::fmt::Debug for PreviewSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewSettings")
            .field("volume", &self.volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexErrorKind;
    use image::{Rgb, RgbImage};

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_probe_reads_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        write_png(&path, 7, 3);

        let info = DecodingProbe.probe(&path).unwrap();
        assert_eq!(info, ImageInfo { width: 7, height: 3 });
    }

    #[test]
    fn test_probe_rejects_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "not a picture").unwrap();

        let err = DecodingProbe.probe(&path).unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::NotAnImage);
    }

    #[test]
    fn test_probe_sniffs_content_over_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("real.png");
        write_png(&png, 4, 4);
        let misnamed = dir.path().join("really_a_png.jpg");
        fs::copy(&png, &misnamed).unwrap();

        let info = DecodingProbe.probe(&misnamed).unwrap();
        assert_eq!(info, ImageInfo { width: 4, height: 4 });
    }

    #[test]
    fn test_thumbnail_fits_box() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("big.png");
        let target = dir.path().join("previews/ab/big.jpg");
        write_png(&source, 400, 200);

        let info = ThumbnailMaker
            .make_preview(&source, &target, 100, 100)
            .unwrap();
        assert!(target.exists());
        assert_eq!(info.width, 100);
        assert_eq!(info.height, 50);
    }

    #[test]
    fn test_preview_relative_path() {
        assert_eq!(
            PreviewSettings::relative_path_for("abcdef"),
            "ab/abcdef.jpg"
        );
    }
}
