//! QR code rendering for student identifiers

use crate::runtime::{CodeGenerator, CollaboratorError};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

/// Renders payloads as PNG-encoded QR codes
#[derive(Debug, Clone)]
pub struct QrCodeGenerator {
    /// Smallest edge of the rendered image, in pixels
    min_size: u32,
}

impl QrCodeGenerator {
    pub fn new(min_size: u32) -> Self {
        Self { min_size }
    }
}

impl Default for QrCodeGenerator {
    fn default() -> Self {
        Self::new(300)
    }
}

impl CodeGenerator for QrCodeGenerator {
    fn generate(&self, payload: &str) -> Result<Vec<u8>, CollaboratorError> {
        let code =
            QrCode::new(payload.as_bytes()).map_err(|e| CollaboratorError::Encoding(e.to_string()))?;
        let rendered = code
            .render::<Luma<u8>>()
            .min_dimensions(self.min_size, self.min_size)
            .build();

        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(rendered)
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| CollaboratorError::Encoding(e.to_string()))?;
        Ok(png.into_inner())
    }
}
