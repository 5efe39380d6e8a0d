//! Orientation correction of the images embedded in a page
//!
//! A page's "raster content" is the set of image XObjects named in its
//! `/Resources /XObject` dictionary. Each one whose samples can be decoded is
//! run through [`crate::orient`] and, if corrected, written back in place with
//! updated `/Width` and `/Height`. The page's content stream and the image
//! placement matrix are left alone, so a rotated scan fills the same
//! rectangle on the page.
//!
//! Supported sample encodings:
//! - `DCTDecode` (JPEG), re-encoded as JPEG
//! - unfiltered or `FlateDecode` without predictors, 8 bits per component,
//!   `DeviceGray` or `DeviceRGB`, re-written Flate-compressed
//!
//! Anything else (CCITT, JBIG2, indexed or ICC colour, image masks, images
//! nested inside form XObjects) is skipped.

use std::collections::BTreeSet;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use crate::error::PageSplitError;
use crate::options::SplitOptions;
use crate::orient::{self, encode_image};
use crate::split::load_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleEncoding {
    Jpeg,
    Raw { channels: u32, compressed: bool },
}

fn name_is(object: Option<&Object>, expected: &[u8]) -> bool {
    object
        .and_then(|o| o.as_name().ok())
        .map(|name| name == expected)
        .unwrap_or(false)
}

fn filters(dict: &Dictionary) -> Result<Vec<Vec<u8>>, &'static str> {
    match dict.get(b"Filter") {
        Err(_) => Ok(Vec::new()),
        Ok(Object::Name(name)) => Ok(vec![name.clone()]),
        Ok(Object::Array(items)) => items
            .iter()
            .map(|item| item.as_name().map(<[u8]>::to_vec).map_err(|_| "malformed filter"))
            .collect(),
        Ok(_) => Err("malformed filter"),
    }
}

impl SampleEncoding {
    /// Classify an image dictionary, or say why it is unsupported
    fn of(dict: &Dictionary) -> Result<Self, &'static str> {
        let filters = filters(dict)?;
        match filters.iter().map(Vec::as_slice).collect::<Vec<_>>().as_slice() {
            [b"DCTDecode"] => return Ok(Self::Jpeg),
            [] | [b"FlateDecode"] => {}
            _ => return Err("unsupported filter"),
        }

        if dict.has(b"DecodeParms") {
            return Err("predictors are not supported");
        }
        if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
            return Err("image masks are not supported");
        }
        if dict.get(b"BitsPerComponent").and_then(Object::as_i64).ok() != Some(8) {
            return Err("only 8 bits per component is supported");
        }

        let color_space = dict.get(b"ColorSpace").ok();
        let channels = if name_is(color_space, b"DeviceGray") {
            1
        } else if name_is(color_space, b"DeviceRGB") {
            3
        } else {
            return Err("unsupported color space");
        };

        Ok(Self::Raw {
            channels,
            compressed: !filters.is_empty(),
        })
    }

    fn decode(&self, stream: &Stream) -> Result<DynamicImage, PageSplitError> {
        let (channels, compressed) = match *self {
            Self::Jpeg => {
                return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                    .map_err(|e| PageSplitError::DecodeError(e.to_string()));
            }
            Self::Raw {
                channels,
                compressed,
            } => (channels, compressed),
        };

        let width = dimension(&stream.dict, b"Width")?;
        let height = dimension(&stream.dict, b"Height")?;

        let mut samples = if compressed {
            let mut out = Vec::new();
            ZlibDecoder::new(stream.content.as_slice())
                .read_to_end(&mut out)
                .map_err(|e| PageSplitError::DecodeError(format!("Inflate failed: {}", e)))?;
            out
        } else {
            stream.content.clone()
        };

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .ok_or_else(|| {
                PageSplitError::DecodeError(format!("Image of {}x{} is too large", width, height))
            })?;
        if samples.len() < expected {
            return Err(PageSplitError::DecodeError(format!(
                "Image has {} bytes of samples, expected {}",
                samples.len(),
                expected
            )));
        }
        samples.truncate(expected);

        let image = match channels {
            1 => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
            _ => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        };
        image.ok_or_else(|| PageSplitError::DecodeError("Sample buffer size mismatch".into()))
    }

    /// Replace `stream`'s samples with `image`, updating its dictionary
    fn write(&self, stream: &mut Stream, image: DynamicImage) -> Result<(), PageSplitError> {
        let image = match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        let color_space: &[u8] = match image {
            DynamicImage::ImageLuma8(_) => b"DeviceGray",
            _ => b"DeviceRGB",
        };

        let content = match self {
            Self::Jpeg => {
                stream.dict.remove(b"Decode");
                encode_image(&image, ImageFormat::Jpeg)?
            }
            Self::Raw { .. } => {
                let deflate_failed =
                    |e: std::io::Error| PageSplitError::EncodeError(format!("Deflate failed: {}", e));
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(image.as_bytes()).map_err(deflate_failed)?;
                encoder.finish().map_err(deflate_failed)?
            }
        };
        let filter: &[u8] = match self {
            Self::Jpeg => b"DCTDecode",
            Self::Raw { .. } => b"FlateDecode",
        };

        stream.dict.set("Width", Object::Integer(image.width() as i64));
        stream.dict.set("Height", Object::Integer(image.height() as i64));
        stream.dict.set("ColorSpace", Object::Name(color_space.to_vec()));
        stream.dict.set("Filter", Object::Name(filter.to_vec()));
        stream.dict.remove(b"DecodeParms");
        stream.set_content(content);
        Ok(())
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Result<u32, PageSplitError> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|&v| v > 0)
        .ok_or_else(|| {
            PageSplitError::DecodeError(format!(
                "Image has no valid /{}",
                String::from_utf8_lossy(key)
            ))
        })
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match object {
        Object::Reference(id) => doc.get_object(*id).and_then(Object::as_dict).ok(),
        other => other.as_dict().ok(),
    }
}

/// Image XObjects referenced directly from any page's resources
fn page_image_ids(doc: &Document) -> BTreeSet<ObjectId> {
    let mut ids = BTreeSet::new();
    for page_id in doc.get_pages().into_values() {
        let Ok(page) = doc.get_object(page_id).and_then(Object::as_dict) else {
            continue;
        };
        let Some(resources) = page.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o))
        else {
            continue;
        };
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
        else {
            continue;
        };

        for (_, value) in xobjects.iter() {
            let Ok(id) = value.as_reference() else {
                continue;
            };
            if let Ok(Object::Stream(stream)) = doc.get_object(id) {
                if name_is(stream.dict.get(b"Subtype").ok(), b"Image") {
                    ids.insert(id);
                }
            }
        }
    }
    ids
}

/// `/SMask` and `/Mask` streams of an image with their encodings. A colour-key
/// `/Mask` array does not depend on pixel positions and is not returned.
fn attached_masks(
    doc: &Document,
    dict: &Dictionary,
) -> Result<Vec<(ObjectId, SampleEncoding, Stream)>, &'static str> {
    let mut masks = Vec::new();
    for key in [b"SMask".as_slice(), b"Mask".as_slice()] {
        let Some(mask_id) = dict.get(key).and_then(Object::as_reference).ok() else {
            continue;
        };
        let Ok(Object::Stream(mask)) = doc.get_object(mask_id) else {
            return Err("mask is not a stream");
        };
        let encoding = SampleEncoding::of(&mask.dict).map_err(|_| "unsupported mask encoding")?;
        masks.push((mask_id, encoding, mask.clone()));
    }
    Ok(masks)
}

/// Correct one image in place, together with any mask it carries. Returns
/// whether it was rewritten.
fn correct_image(doc: &mut Document, id: ObjectId) -> Result<bool, PageSplitError> {
    let stream = match doc.get_object(id) {
        Ok(Object::Stream(stream)) => stream,
        _ => return Ok(false),
    };

    let classified = SampleEncoding::of(&stream.dict)
        .and_then(|encoding| Ok((encoding, attached_masks(doc, &stream.dict)?)));
    let (encoding, masks) = match classified {
        Ok(classified) => classified,
        Err(reason) => {
            debug!(object = id.0, reason, "Skipping image");
            return Ok(false);
        }
    };

    let image = encoding.decode(stream)?;
    let estimate = orient::analyze(&image);
    if !estimate.needs_correction() {
        return Ok(false);
    }

    let mut rewritten = Vec::with_capacity(masks.len() + 1);
    for (mask_id, mask_encoding, mut mask) in masks {
        let samples = mask_encoding.decode(&mask)?;
        mask_encoding.write(&mut mask, orient::apply(&samples, &estimate))?;
        rewritten.push((mask_id, mask));
    }

    let mut stream = stream.clone();
    encoding.write(&mut stream, orient::apply(&image, &estimate))?;
    rewritten.push((id, stream));

    for (id, stream) in rewritten {
        doc.objects.insert(id, Object::Stream(stream));
    }
    Ok(true)
}

/// Run orientation correction over every supported image on the page(s) of
/// `page_pdf` and return the re-serialized document
pub fn correct_page_images(
    page_pdf: &[u8],
    options: &SplitOptions,
) -> Result<Vec<u8>, PageSplitError> {
    let mut doc = load_document(page_pdf, options)?;

    let images = page_image_ids(&doc);
    let mut corrected = 0;
    for &id in &images {
        if correct_image(&mut doc, id)? {
            corrected += 1;
        }
    }
    if corrected > 0 {
        info!(images = images.len(), corrected, "Corrected page images");
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PageSplitError::EncodeError(format!("Save failed: {}", e)))?;
    Ok(buffer)
}
