//! The image codec collaborator (§1, §4.3, §6 of the spec): out of core
//! scope, specified here only as a trait boundary plus a couple of
//! implementations so the pipeline is runnable standalone.
//!
//! The contract mirrors the conventional native codec library the
//! original source called into (OpenCV's `imdecode`): a decoded image is
//! returned with 1 or 3 channels, interleaved HWC, and — for 3 channels —
//! **BGR** byte order. The core's channel reorder (BGR → planar RGB) is
//! applied by the parser, not by the codec.

use crate::error::{Error, Result};

/// A decoded image, interleaved HWC, BGR order for 3-channel images.
pub struct DecodedImage {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// `height * width * channels` bytes, row-major, channel-interleaved.
    pub pixels: Vec<u8>,
}

/// The image-codec collaborator's invocation contract. `decode` returns an
/// `Error::Decode` for payload bytes it cannot make sense of.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, image_index: u64, payload: &[u8]) -> Result<DecodedImage>;
}

/// A minimal, dependency-free codec used by tests and the demo binary.
///
/// Its "compressed" payload format is simply:
/// `channels: u8, height: u16 LE, width: u16 LE, pixels: [u8; h*w*c]`
/// (already BGR-ordered for 3 channels) — a stand-in for a real
/// JPEG/PNG decoder that keeps the pipeline's tests independent of an
/// actual image codec library, per the scope note in `spec.md` §1.
#[derive(Default)]
pub struct FixtureCodec;

impl FixtureCodec {
    /// Encodes an image into the fixture payload format, for use by test
    /// fixtures and the demo binary's archive writer.
    pub fn encode(channels: usize, height: usize, width: usize, pixels: &[u8]) -> Vec<u8> {
        assert_eq!(pixels.len(), channels * height * width);
        let mut out = Vec::with_capacity(5 + pixels.len());
        out.push(channels as u8);
        out.extend_from_slice(&(height as u16).to_le_bytes());
        out.extend_from_slice(&(width as u16).to_le_bytes());
        out.extend_from_slice(pixels);
        out
    }
}

impl ImageDecoder for FixtureCodec {
    fn decode(&self, image_index: u64, payload: &[u8]) -> Result<DecodedImage> {
        if payload.len() < 5 {
            return Err(Error::Decode {
                index: image_index,
                reason: "payload shorter than fixture header".into(),
            });
        }
        let channels = payload[0] as usize;
        let height = u16::from_le_bytes([payload[1], payload[2]]) as usize;
        let width = u16::from_le_bytes([payload[3], payload[4]]) as usize;
        let expected = channels * height * width;
        let pixels = &payload[5..];
        if pixels.len() != expected {
            return Err(Error::Decode {
                index: image_index,
                reason: format!("expected {expected} pixel bytes, found {}", pixels.len()),
            });
        }
        if channels != 1 && channels != 3 {
            return Err(Error::Decode {
                index: image_index,
                reason: format!("unsupported channel count {channels}"),
            });
        }
        Ok(DecodedImage {
            channels,
            height,
            width,
            pixels: pixels.to_vec(),
        })
    }
}

/// A codec backed by the `image` crate, gated behind the `image-codec`
/// feature (grounded in `johannesvollmer-exrs`'s own dev-dependency on
/// `image` for pixel decoding). `image` decodes to RGB(A)/luma order, so
/// this adapter swaps R and B on the way out to emulate the OpenCV-style
/// BGR contract the rest of the pipeline assumes.
#[cfg(feature = "image-codec")]
#[derive(Default)]
pub struct ImageCrateCodec;

#[cfg(feature = "image-codec")]
impl ImageDecoder for ImageCrateCodec {
    fn decode(&self, image_index: u64, payload: &[u8]) -> Result<DecodedImage> {
        let img = image::load_from_memory(payload).map_err(|e| Error::Decode {
            index: image_index,
            reason: e.to_string(),
        })?;
        let (width, height) = (img.width() as usize, img.height() as usize);
        match img {
            image::DynamicImage::ImageLuma8(buf) => Ok(DecodedImage {
                channels: 1,
                height,
                width,
                pixels: buf.into_raw(),
            }),
            other => {
                let rgb = other.to_rgb8();
                let mut pixels = rgb.into_raw();
                for px in pixels.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                Ok(DecodedImage {
                    channels: 3,
                    height,
                    width,
                    pixels,
                })
            }
        }
    }
}
