//! Two-pass, size-aware image decoding.
//!
//! The first pass reads only the header to learn the intrinsic size. The
//! sample factor computed from it bounds the resident footprint of the
//! decoded image to roughly the display size.
//!
//! The second pass never holds the full-resolution frame when it can avoid
//! it. Non-interlaced PNG is reduced row by row as it streams out of the
//! inflater, and baseline JPEG is scaled inside the IDCT. Everything else is
//! decoded whole under an allocation limit, so an oversized source fails
//! instead of exhausting memory.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use jpeg_decoder::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::domain::entities::TargetSize;
use crate::domain::errors::DecodeError;

/// Default JPEG quality for re-encoded disk entries.
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

const MAX_SAMPLE_FACTOR: u32 = 1 << 31;

/// How decoded images are written to the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    /// Store the fetched bytes unchanged.
    #[default]
    Source,
    /// Store the downsampled image re-encoded as JPEG.
    Jpeg,
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, DecodeError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
    if reader.format().is_none() {
        return Err(DecodeError::Corrupt("unrecognized image format".to_string()));
    }
    Ok(reader)
}

fn corrupt(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::Corrupt(e.to_string())
}

/// Reads the intrinsic dimensions without decoding pixel data.
///
/// # Errors
/// Returns [`DecodeError::Corrupt`] if the header cannot be parsed.
pub fn probe(bytes: &[u8]) -> Result<(u32, u32), DecodeError> {
    Ok(reader(bytes)?.into_dimensions()?)
}

/// Returns the smallest power of two `f` such that both
/// `intrinsic_width / f <= target_width` and `intrinsic_height / f <= target_height`.
#[must_use]
pub fn compute_sample_factor(
    intrinsic_width: u32,
    intrinsic_height: u32,
    target_width: u32,
    target_height: u32,
) -> u32 {
    let target_width = target_width.max(1);
    let target_height = target_height.max(1);
    let mut factor = 1u32;
    while (intrinsic_width / factor > target_width || intrinsic_height / factor > target_height)
        && factor < MAX_SAMPLE_FACTOR
    {
        factor *= 2;
    }
    factor
}

fn sampled_size(width: u32, height: u32, factor: u32) -> (u32, u32) {
    ((width / factor).max(1), (height / factor).max(1))
}

fn resize_to(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if (image.width(), image.height()) == (width, height) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

/// Decodes `bytes` downsampled by `sample_factor`.
///
/// `max_alloc` caps what the decoder may allocate. A source that cannot be
/// reduced within it is rejected rather than decoded.
///
/// # Errors
/// Returns [`DecodeError::Corrupt`] if the bytes do not fully decode or the
/// allocation limit is exceeded; no partial image is ever returned.
pub fn decode(bytes: &[u8], sample_factor: u32, max_alloc: u64) -> Result<DynamicImage, DecodeError> {
    let factor = sample_factor.max(1);
    match image::guess_format(bytes)? {
        ImageFormat::Png => decode_png_sampled(bytes, factor, max_alloc),
        ImageFormat::Jpeg => decode_jpeg_scaled(bytes, factor, max_alloc),
        _ => decode_full(bytes, factor, max_alloc),
    }
}

/// Probes, picks a sample factor for `target`, and decodes.
///
/// # Errors
/// Returns [`DecodeError::Corrupt`] if either pass fails.
pub fn decode_to_fit(
    bytes: &[u8],
    target: TargetSize,
    max_alloc: u64,
) -> Result<DynamicImage, DecodeError> {
    let (width, height) = probe(bytes)?;
    let factor = compute_sample_factor(width, height, target.width(), target.height());
    tracing::trace!(width, height, target = %target, factor, "Computed sample factor");
    decode(bytes, factor, max_alloc)
}

fn decode_full(bytes: &[u8], factor: u32, max_alloc: u64) -> Result<DynamicImage, DecodeError> {
    let mut reader = reader(bytes)?;
    let mut limits = image::Limits::default();
    limits.max_alloc = Some(max_alloc);
    reader.limits(limits);

    let image = reader.decode()?;
    let (width, height) = sampled_size(image.width(), image.height(), factor);
    Ok(resize_to(image, width, height))
}

/// Sums `factor` x `factor` pixel blocks of one output row.
struct BlockRow {
    factor: u32,
    channels: usize,
    used_columns: usize,
    sums: Vec<u64>,
    counts: Vec<u64>,
}

impl BlockRow {
    fn new(width: u32, out_width: u32, factor: u32, channels: usize) -> Self {
        let used_columns = width.min(out_width.saturating_mul(factor)) as usize;
        Self {
            factor,
            channels,
            used_columns,
            sums: vec![0; out_width as usize * channels],
            counts: vec![0; out_width as usize],
        }
    }

    fn add(&mut self, row: &[u8]) {
        let factor = self.factor as usize;
        for (x, pixel) in row
            .chunks_exact(self.channels)
            .take(self.used_columns)
            .enumerate()
        {
            let column = x / factor;
            self.counts[column] += 1;
            let sums = &mut self.sums[column * self.channels..(column + 1) * self.channels];
            for (sum, &sample) in sums.iter_mut().zip(pixel) {
                *sum += u64::from(sample);
            }
        }
    }

    fn flush_into(&mut self, out: &mut Vec<u8>) {
        for (column, count) in self.counts.iter_mut().enumerate() {
            let n = (*count).max(1);
            let sums = &mut self.sums[column * self.channels..(column + 1) * self.channels];
            for sum in sums.iter_mut() {
                out.push(u8::try_from((*sum + n / 2) / n).unwrap_or(u8::MAX));
                *sum = 0;
            }
            *count = 0;
        }
    }
}

fn decode_png_sampled(bytes: &[u8], factor: u32, max_alloc: u64) -> Result<DynamicImage, DecodeError> {
    let limits = png::Limits {
        bytes: usize::try_from(max_alloc).unwrap_or(usize::MAX),
    };
    let mut decoder = png::Decoder::new_with_limits(Cursor::new(bytes), limits);
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder.read_info().map_err(corrupt)?;

    let (width, height, interlaced) = {
        let info = reader.info();
        (info.width, info.height, info.interlaced)
    };
    let (color, depth) = reader.output_color_type();
    // Adam7 passes arrive out of row order.
    if interlaced || depth != png::BitDepth::Eight {
        return decode_full(bytes, factor, max_alloc);
    }

    let channels = color.samples();
    let (out_width, out_height) = sampled_size(width, height, factor);
    let out_len = u64::from(out_width) * u64::from(out_height) * channels as u64;
    if out_len > max_alloc {
        return Err(DecodeError::Corrupt(format!(
            "sampled image of {out_len} bytes exceeds limit of {max_alloc} bytes"
        )));
    }

    let mut pixels = Vec::with_capacity(usize::try_from(out_len).unwrap_or(0));
    let mut block = BlockRow::new(width, out_width, factor, channels);
    let mut y = 0u32;
    while let Some(row) = reader.next_row().map_err(corrupt)? {
        // Trailing rows that do not fill a block are read but dropped.
        if y / factor < out_height {
            block.add(row.data());
            if (y + 1) % factor == 0 || y + 1 == height {
                block.flush_into(&mut pixels);
            }
        }
        y += 1;
    }

    let image = match channels {
        1 => GrayImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(out_width, out_height, pixels).map(DynamicImage::ImageRgba8),
        _ => None,
    };
    image.ok_or_else(|| DecodeError::Corrupt(format!("PNG ended early or has {channels} channels")))
}

fn decode_jpeg_scaled(bytes: &[u8], factor: u32, max_alloc: u64) -> Result<DynamicImage, DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder.set_max_decoding_buffer_size(usize::try_from(max_alloc).unwrap_or(usize::MAX));
    decoder.read_info().map_err(corrupt)?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Corrupt("missing JPEG frame header".to_string()))?;
    if !matches!(info.pixel_format, PixelFormat::L8 | PixelFormat::RGB24) {
        return decode_full(bytes, factor, max_alloc);
    }

    let (out_width, out_height) = sampled_size(u32::from(info.width), u32::from(info.height), factor);
    let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
    let (width, height) = decoder
        .scale(clamp(out_width), clamp(out_height))
        .map_err(corrupt)?;
    let pixels = decoder.decode().map_err(corrupt)?;

    let (width, height) = (u32::from(width), u32::from(height));
    let image = match info.pixel_format {
        PixelFormat::L8 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        _ => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
    }
    .ok_or_else(|| DecodeError::Corrupt("JPEG pixel buffer size mismatch".to_string()))?;
    Ok(resize_to(image, out_width, out_height))
}

/// Encodes a decoded image for the disk tier.
///
/// Returns `None` for [`DiskFormat::Source`], meaning the fetched bytes are
/// stored as they are.
///
/// # Errors
/// Returns [`DecodeError::Corrupt`] if encoding fails.
pub fn encode_for_disk(
    image: &DynamicImage,
    format: DiskFormat,
    quality: u8,
) -> Result<Option<Vec<u8>>, DecodeError> {
    match format {
        DiskFormat::Source => Ok(None),
        DiskFormat::Jpeg => {
            let mut buf = Vec::new();
            DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
            Ok(Some(buf))
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use std::io::Cursor;

    /// Encodes a blank RGB image of the given size as PNG.
    pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::png_bytes;
    use super::*;
    use test_case::test_case;

    const BUDGET: u64 = 64 * 1024 * 1024;

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test_case(400, 300, 200, 200, 2 ; "width_bound")]
    #[test_case(100, 100, 200, 200, 1 ; "already_fits")]
    #[test_case(400, 300, 400, 300, 1 ; "exact_fit")]
    #[test_case(1000, 100, 200, 200, 8 ; "wide_source")]
    #[test_case(100, 1000, 200, 200, 8 ; "tall_source")]
    #[test_case(401, 300, 200, 200, 2 ; "integer_division")]
    #[test_case(4000, 3000, 1, 1, 2048 ; "tiny_target")]
    #[test_case(0, 0, 10, 10, 1 ; "empty_source")]
    #[test_case(800, 600, 0, 0, 512 ; "zero_target_clamped")]
    fn test_compute_sample_factor(iw: u32, ih: u32, tw: u32, th: u32, expected: u32) {
        assert_eq!(compute_sample_factor(iw, ih, tw, th), expected);
    }

    #[test]
    fn test_probe_reads_dimensions() {
        assert_eq!(probe(&png_bytes(400, 300)).unwrap(), (400, 300));
    }

    #[test]
    fn test_decode_with_sample_factor() {
        let img = decode(&png_bytes(400, 300), 2, BUDGET).unwrap();
        assert_eq!((img.width(), img.height()), (200, 150));
    }

    #[test]
    fn test_decode_to_fit_uses_same_bytes_twice() {
        let bytes = png_bytes(400, 300);
        let img = decode_to_fit(&bytes, TargetSize::new(200, 200), BUDGET).unwrap();
        assert_eq!((img.width(), img.height()), (200, 150));
    }

    #[test]
    fn test_decode_never_collapses_to_zero() {
        let img = decode(&png_bytes(3, 1), 4, BUDGET).unwrap();
        assert_eq!((img.width(), img.height()), (1, 1));
    }

    #[test]
    fn test_png_blocks_are_averaged() {
        let source = RgbImage::from_fn(5, 3, |x, y| match (x, y) {
            (0..=1, 0..=1) => image::Rgb([200, 0, 10]),
            (2..=3, 0..=1) if (x + y) % 2 == 0 => image::Rgb([0, 100, 0]),
            (2..=3, 0..=1) => image::Rgb([0, 0, 0]),
            _ => image::Rgb([255, 255, 255]),
        });
        let bytes = encode(&DynamicImage::ImageRgb8(source), ImageFormat::Png);

        let img = decode(&bytes, 2, BUDGET).unwrap().to_rgb8();

        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [200, 0, 10]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 50, 0]);
    }

    #[test]
    fn test_png_keeps_alpha_channel() {
        let source = RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 128]));
        let bytes = encode(&DynamicImage::ImageRgba8(source), ImageFormat::Png);

        let img = decode(&bytes, 4, BUDGET).unwrap();

        assert_eq!((img.width(), img.height()), (2, 2));
        assert_eq!(img.to_rgba8().get_pixel(1, 1).0, [10, 20, 30, 128]);
    }

    #[test]
    fn test_large_png_decodes_within_small_allocation_limit() {
        let bytes = png_bytes(2000, 1500);
        let limit = 2 * 1024 * 1024;

        let img = decode(&bytes, 8, limit).unwrap();
        assert_eq!((img.width(), img.height()), (250, 187));

        // The full 9 MB frame does not fit the same limit.
        assert!(matches!(decode_full(&bytes, 8, limit), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn test_jpeg_is_scaled_while_decoding() {
        let source = RgbImage::from_pixel(800, 600, image::Rgb([90, 140, 200]));
        let bytes = encode(&DynamicImage::ImageRgb8(source), ImageFormat::Jpeg);

        let img = decode(&bytes, 4, 256 * 1024).unwrap();

        assert_eq!((img.width(), img.height()), (200, 150));
        let [r, g, b] = img.to_rgb8().get_pixel(100, 75).0;
        assert!(r.abs_diff(90) < 8 && g.abs_diff(140) < 8 && b.abs_diff(200) < 8);
    }

    #[test]
    fn test_grayscale_jpeg_stays_single_channel() {
        let source = GrayImage::from_pixel(64, 64, image::Luma([77]));
        let bytes = encode(&DynamicImage::ImageLuma8(source), ImageFormat::Jpeg);

        let img = decode(&bytes, 2, BUDGET).unwrap();

        assert!(matches!(img, DynamicImage::ImageLuma8(_)));
        assert_eq!((img.width(), img.height()), (32, 32));
    }

    #[test]
    fn test_other_formats_decode_whole_under_limit() {
        let source = DynamicImage::new_rgba8(64, 48);
        let bytes = encode(&source, ImageFormat::WebP);

        let img = decode(&bytes, 2, BUDGET).unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));

        assert!(matches!(decode(&bytes, 2, 1024), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(probe(b"not an image"), Err(DecodeError::Corrupt(_))));
        assert!(matches!(decode(b"not an image", 1, BUDGET), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn test_truncated_image_is_corrupt() {
        let bytes = png_bytes(64, 64);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(decode(truncated, 1, BUDGET), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn test_encode_for_disk() {
        let img = image::DynamicImage::new_rgba8(40, 30);

        assert_eq!(encode_for_disk(&img, DiskFormat::Source, 70).unwrap(), None);

        let jpeg = encode_for_disk(&img, DiskFormat::Jpeg, DEFAULT_JPEG_QUALITY)
            .unwrap()
            .unwrap();
        assert_eq!(probe(&jpeg).unwrap(), (40, 30));
    }
}
