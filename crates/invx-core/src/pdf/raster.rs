//! Page rasterizers for the OCR path.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace, warn};

use super::{PageRasterizer, load};
use crate::capability::{Capability, CapabilityResolver};
use crate::error::InvxError;

/// Renders pages with poppler's `pdftoppm`.
pub struct PopplerRasterizer {
    resolver: Arc<dyn CapabilityResolver>,
}

impl PopplerRasterizer {
    pub fn new(resolver: Arc<dyn CapabilityResolver>) -> Self {
        Self { resolver }
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn rasterize(&self, data: &[u8], dpi: u32) -> Result<Vec<Option<DynamicImage>>, InvxError> {
        let binary = self
            .resolver
            .resolve(Capability::Pdftoppm)
            .require(Capability::Pdftoppm)?;

        let expected_pages = load(data).map(|pdf| pdf.document.get_pages().len()).unwrap_or(0);

        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("input.pdf");
        std::fs::write(&input, data)?;
        let prefix = workdir.path().join("page");

        let output = Command::new(&binary)
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-png")
            .arg(&input)
            .arg(&prefix)
            .output()
            .map_err(|e| InvxError::ConversionDependency {
                capability: Capability::Pdftoppm.to_string(),
                reason: format!("failed to run {}: {}", binary.display(), e),
                remediation: Capability::Pdftoppm.remediation().to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("pdftoppm exited with {}: {}", output.status, stderr.trim());
        }

        let rendered = collect_pages(workdir.path());
        let page_count = expected_pages.max(rendered.iter().map(|(n, _)| *n).max().unwrap_or(0));
        let mut pages: Vec<Option<DynamicImage>> = vec![None; page_count];
        for (number, path) in rendered {
            match image::open(&path) {
                Ok(img) => pages[number - 1] = Some(img),
                Err(e) => warn!("Failed to read rendered page {}: {}", number, e),
            }
        }

        debug!("Rendered {}/{} page(s) at {} DPI", pages.iter().flatten().count(), page_count, dpi);
        Ok(pages)
    }
}

/// `page-1.png`, `page-01.png`, ... in `dir`, as (page number, path).
fn collect_pages(dir: &Path) -> Vec<(usize, std::path::PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut pages: Vec<(usize, std::path::PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let stem = path.file_stem()?.to_str()?;
            let number = stem.strip_prefix("page-")?.parse::<usize>().ok()?;
            (number > 0 && path.extension()? == "png").then_some((number, path))
        })
        .collect();
    pages.sort_by_key(|(number, _)| *number);
    pages
}

/// Uses the largest image embedded in each page as that page's raster.
///
/// Suited to scanner output, where every page is a single full-page image.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedImageRasterizer;

impl EmbeddedImageRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl PageRasterizer for EmbeddedImageRasterizer {
    fn rasterize(&self, data: &[u8], _dpi: u32) -> Result<Vec<Option<DynamicImage>>, InvxError> {
        let pdf = load(data)?;
        let doc = &pdf.document;

        let pages = doc
            .get_pages()
            .into_iter()
            .map(|(number, page_id)| {
                let largest = page_images(doc, page_id)
                    .into_iter()
                    .max_by_key(|img| img.width() as u64 * img.height() as u64);
                if largest.is_none() {
                    debug!("No decodable image on page {}", number);
                }
                largest
            })
            .collect();
        Ok(pages)
    }
}

fn page_images(doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
    let Some(resources) = page_resources(doc, page_id) else {
        return Vec::new();
    };
    let Ok(xobjects) = resources.get(b"XObject") else {
        return Vec::new();
    };
    let Ok((_, Object::Dictionary(xobjects))) = doc.dereference(xobjects) else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, reference)| doc.dereference(reference).ok())
        .filter_map(|(_, object)| decode_image(doc, object))
        .collect()
}

/// Resources of a page, inherited from the page tree when absent on the page.
fn page_resources(doc: &Document, node_id: ObjectId) -> Option<Dictionary> {
    let Object::Dictionary(dict) = doc.get_object(node_id).ok()? else {
        return None;
    };
    if let Ok(resources) = dict.get(b"Resources") {
        if let Ok((_, Object::Dictionary(res))) = doc.dereference(resources) {
            return Some(res.clone());
        }
    }
    match dict.get(b"Parent") {
        Ok(Object::Reference(parent)) => page_resources(doc, *parent),
        _ => None,
    }
}

fn decode_image(doc: &Document, object: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = object else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let raw_width = dict.get(b"Width").ok()?.as_i64().ok()?;
    let raw_height = dict.get(b"Height").ok()?.as_i64().ok()?;
    let (Ok(width), Ok(height)) = (u32::try_from(raw_width), u32::try_from(raw_height)) else {
        trace!("Skipping image with invalid size {}x{}", raw_width, raw_height);
        return None;
    };
    trace!("Found image object: {}x{}", width, height);

    let filter = dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(items) => items.last().and_then(|o| o.as_name().ok()),
        _ => None,
    });
    match filter {
        Some(b"DCTDecode") => {
            return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg).ok();
        }
        Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
            trace!("Skipping image with unsupported filter");
            return None;
        }
        _ => {}
    }

    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bits != 8 {
        trace!("Unsupported bits per component: {}", bits);
        return None;
    }

    let color_space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|o| match o {
            Object::Name(name) => Some(name.clone()),
            Object::Array(items) => items.first().and_then(|o| o.as_name().ok()).map(<[u8]>::to_vec),
            Object::Reference(r) => doc
                .get_object(*r)
                .ok()
                .and_then(|o| o.as_name().ok())
                .map(<[u8]>::to_vec),
            _ => None,
        })
        .unwrap_or_else(|| b"DeviceRGB".to_vec());

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let Some((pixels, rgb_len)) = (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| Some((pixels, pixels.checked_mul(3)?)))
    else {
        trace!("Skipping image too large to address: {}x{}", width, height);
        return None;
    };

    match color_space.as_slice() {
        b"DeviceRGB" | b"RGB" if data.len() >= rgb_len => {
            RgbImage::from_raw(width, height, data[..rgb_len].to_vec()).map(DynamicImage::ImageRgb8)
        }
        b"DeviceGray" | b"G" if data.len() >= pixels => {
            GrayImage::from_raw(width, height, data[..pixels].to_vec()).map(DynamicImage::ImageLuma8)
        }
        _ => {
            trace!(
                "Could not decode image: colorspace={}, data_len={}",
                String::from_utf8_lossy(&color_space),
                data.len()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityStatus;
    use crate::pdf::fixtures::{PageSpec, build_pdf};
    use lopdf::{Stream, dictionary};

    struct Missing;

    impl CapabilityResolver for Missing {
        fn resolve(&self, _capability: Capability) -> CapabilityStatus {
            CapabilityStatus::Unavailable {
                reason: "not installed".to_string(),
            }
        }
    }

    #[test]
    fn test_poppler_missing_is_dependency_error() {
        let data = build_pdf(vec![PageSpec::text(&["x"])]);
        let err = PopplerRasterizer::new(Arc::new(Missing)).rasterize(&data, 300).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConversionDependency);
        assert!(err.to_string().contains("brew install poppler"));
    }

    #[test]
    fn test_collect_pages_orders_by_number() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-02.png", "page-1.png", "other.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let numbers: Vec<usize> = collect_pages(dir.path()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(numbers, vec![1, 2, 10]);
    }

    #[test]
    fn test_embedded_gray_image() {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0, 50, 100, 150, 200, 250, 255, 255],
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            "MediaBox" => vec![0.into(), 0.into(), 4.into(), 2.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut data = Vec::new();
        doc.save_to(&mut data).unwrap();

        let pages = EmbeddedImageRasterizer::new().rasterize(&data, 300).unwrap();
        assert_eq!(pages.len(), 1);
        let page = pages[0].as_ref().unwrap().to_luma8();
        assert_eq!(page.dimensions(), (4, 2));
        assert_eq!(page.get_pixel(1, 0)[0], 50);
    }

    fn image_stream(width: i64, height: i64, color_space: &str, data: Vec<u8>) -> Object {
        Object::Stream(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8,
            },
            data,
        ))
    }

    #[test]
    fn test_bad_image_sizes_are_skipped() {
        let doc = Document::with_version("1.5");
        let cases = [
            (-1, 2, "DeviceGray"),
            (4, -2, "DeviceRGB"),
            (i64::from(u32::MAX) + 1, 1, "DeviceGray"),
            (i64::from(u32::MAX), i64::from(u32::MAX), "DeviceRGB"),
        ];
        for (width, height, color_space) in cases {
            let object = image_stream(width, height, color_space, vec![0; 24]);
            assert!(decode_image(&doc, &object).is_none(), "{}x{}", width, height);
        }

        let object = image_stream(4, 2, "DeviceRGB", vec![128; 24]);
        let image = decode_image(&doc, &object).unwrap();
        assert_eq!(image.to_rgb8().dimensions(), (4, 2));
    }

    #[test]
    fn test_embedded_text_only_page_is_none() {
        let data = build_pdf(vec![PageSpec::text(&["no images"])]);
        let pages = EmbeddedImageRasterizer::new().rasterize(&data, 300).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].is_none());
    }
}
