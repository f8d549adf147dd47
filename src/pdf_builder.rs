use image::{ColorType, DynamicImage, GenericImageView};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::CodecError;

/// One decoded page: the image XObject and, for translucent images, its soft mask.
struct PageImage {
    filename: String,
    width: u32,
    height: u32,
    image: Stream,
    mask: Option<Stream>,
}

/// Collects page images and lays them out one per page.
///
/// Pages are sized to the image, one point per pixel, so nothing is scaled
/// or re-sampled. Baseline gray and RGB JPEGs are embedded as-is; everything
/// else is decoded to 8 or 16 bit gray/RGB samples, with the alpha channel,
/// if any, split into a soft mask.
pub struct ImagePdfBuilder {
    images: Vec<PageImage>,
}

impl ImagePdfBuilder {
    pub fn new() -> Self {
        Self { images: Vec::new() }
    }

    pub fn add_image(&mut self, path: &Path) -> Result<(), CodecError> {
        let data = fs::read(path)?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let page = match jpeg_frame(&data) {
            Some((8, components @ (1 | 3))) => passthrough_jpeg(filename, data, components)?,
            _ => decoded_image(filename, &data)?,
        };

        debug!(
            "Loaded {}x{} image from {}{}",
            page.width,
            page.height,
            path.display(),
            if page.mask.is_some() { " with alpha" } else { "" }
        );
        self.images.push(page);

        Ok(())
    }

    pub fn page_count(&self) -> usize {
        self.images.len()
    }

    /// Builds the document, or `None` when no image was added.
    pub fn build(self) -> lopdf::Result<Option<Document>> {
        if self.images.is_empty() {
            return Ok(None);
        }

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::with_capacity(self.images.len());

        for page in self.images {
            let filename = page.filename.clone();
            let page_id = add_image_page(&mut doc, pages_id, page)?;
            debug!("Placed {} on page {}", filename, kids.len() + 1);
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        Ok(Some(doc))
    }

    /// Serializes the document, or returns `None` when no image was added.
    pub fn to_bytes(self) -> lopdf::Result<Option<Vec<u8>>> {
        let Some(mut doc) = self.build()? else {
            return Ok(None);
        };

        let mut data = Vec::new();
        doc.save_to(&mut data)?;
        Ok(Some(data))
    }
}

impl Default for ImagePdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn passthrough_jpeg(
    filename: String,
    data: Vec<u8>,
    components: u8,
) -> Result<PageImage, CodecError> {
    let (width, height) = image::io::Reader::new(Cursor::new(&data))
        .with_guessed_format()?
        .into_dimensions()?;
    let color_space = if components == 1 { "DeviceGray" } else { "DeviceRGB" };

    let mut image = Stream::new(image_dictionary(width, height, color_space, 8), data);
    image.dict.set("Filter", "DCTDecode");

    Ok(PageImage {
        filename,
        width,
        height,
        image,
        mask: None,
    })
}

fn decoded_image(filename: String, data: &[u8]) -> Result<PageImage, CodecError> {
    let img = image::load_from_memory(data)?;
    let (width, height) = img.dimensions();
    let color = img.color();
    let deep = matches!(
        color,
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16
    );
    let bits = if deep { 16 } else { 8 };

    let (color_space, samples) = match (color.has_color(), deep) {
        (false, false) => ("DeviceGray", img.to_luma8().into_raw()),
        (false, true) => ("DeviceGray", big_endian(img.to_luma16().as_raw())),
        (true, false) => ("DeviceRGB", img.to_rgb8().into_raw()),
        (true, true) => ("DeviceRGB", big_endian(img.to_rgb16().as_raw())),
    };

    let mut image = Stream::new(image_dictionary(width, height, color_space, bits), samples);
    image.compress()?;

    let mask = match color.has_alpha().then(|| alpha_samples(&img, deep)).flatten() {
        Some(alpha) => {
            let dict = image_dictionary(width, height, "DeviceGray", bits);
            let mut mask = Stream::new(dict, alpha);
            mask.compress()?;
            Some(mask)
        }
        None => None,
    };

    Ok(PageImage {
        filename,
        width,
        height,
        image,
        mask,
    })
}

/// Alpha channel as gray samples, or `None` when every pixel is opaque.
fn alpha_samples(img: &DynamicImage, deep: bool) -> Option<Vec<u8>> {
    if deep {
        let alpha: Vec<u16> = img.to_rgba16().pixels().map(|p| p[3]).collect();
        alpha
            .iter()
            .any(|&a| a != u16::MAX)
            .then(|| big_endian(&alpha))
    } else {
        let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p[3]).collect();
        alpha.iter().any(|&a| a != u8::MAX).then_some(alpha)
    }
}

// PDF stores 16 bit samples most significant byte first.
fn big_endian(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

fn image_dictionary(width: u32, height: u32, color_space: &str, bits: i64) -> lopdf::Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => color_space,
        "BitsPerComponent" => bits,
    }
}

/// Sample precision and component count from the first JPEG frame header,
/// or `None` if `data` is not a JPEG.
fn jpeg_frame(data: &[u8]) -> Option<(u8, u8)> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }

        // SOF0..SOF15, minus DHT, JPG and DAC which share the range.
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            return Some((*data.get(pos + 4)?, *data.get(pos + 9)?));
        }

        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + length;
    }

    None
}

fn add_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    page: PageImage,
) -> lopdf::Result<ObjectId> {
    let width = i64::from(page.width);
    let height = i64::from(page.height);

    let mut image = page.image;
    if let Some(mask) = page.mask {
        let mask_id = doc.add_object(mask);
        image.dict.set("SMask", mask_id);
    }
    let image_id = doc.add_object(image);

    // Scale the unit square to the full page and paint the image into it.
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![width.into(), 0.into(), 0.into(), height.into(), 0.into(), 0.into()],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 30, 30]))
            .save(path)
            .unwrap();
    }

    fn media_box_width(doc: &Document, page_id: ObjectId) -> i64 {
        let media_box = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap();
        media_box[2].as_i64().unwrap()
    }

    fn page_image(doc: &Document, page_id: ObjectId) -> &Stream {
        let image_id = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Im0")
            .unwrap()
            .as_reference()
            .unwrap();
        doc.get_object(image_id).unwrap().as_stream().unwrap()
    }

    fn color_space_and_bits(stream: &Stream) -> (String, i64) {
        let color_space = stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap();
        let bits = stream.dict.get(b"BitsPerComponent").unwrap().as_i64().unwrap();
        (String::from_utf8_lossy(color_space).into_owned(), bits)
    }

    fn build(paths: &[&Path]) -> Document {
        let mut builder = ImagePdfBuilder::new();
        for path in paths {
            builder.add_image(path).unwrap();
        }
        let bytes = builder.to_bytes().unwrap().unwrap();
        Document::load_mem(&bytes).unwrap()
    }

    #[test]
    fn empty_builder_produces_nothing() {
        let builder = ImagePdfBuilder::new();
        assert_eq!(builder.page_count(), 0);
        assert!(builder.to_bytes().unwrap().is_none());
    }

    #[test]
    fn one_page_per_image_sized_to_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("page-001.png");
        let second = dir.path().join("page-002.jpg");
        write_png(&first, 40, 60);
        RgbImage::from_pixel(80, 20, Rgb([0, 0, 0]))
            .save(&second)
            .unwrap();

        let doc = build(&[&first, &second]);
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(media_box_width(&doc, pages[&1]), 40);
        assert_eq!(media_box_width(&doc, pages[&2]), 80);
    }

    #[test]
    fn grayscale_and_translucent_pages_get_valid_image_objects() {
        let dir = tempfile::tempdir().unwrap();
        let gray_jpeg = dir.path().join("page-001.jpg");
        let gray_png = dir.path().join("page-002.png");
        let rgba_png = dir.path().join("page-003.png");
        let opaque_rgba_png = dir.path().join("page-004.png");
        let deep_gray_png = dir.path().join("page-005.png");

        GrayImage::from_pixel(12, 8, Luma([90])).save(&gray_jpeg).unwrap();
        GrayImage::from_pixel(12, 8, Luma([90])).save(&gray_png).unwrap();
        RgbaImage::from_pixel(12, 8, Rgba([10, 20, 30, 128]))
            .save(&rgba_png)
            .unwrap();
        RgbaImage::from_pixel(12, 8, Rgba([10, 20, 30, 255]))
            .save(&opaque_rgba_png)
            .unwrap();
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(12, 8, Luma([40_000]))
            .save(&deep_gray_png)
            .unwrap();

        let doc = build(&[
            &gray_jpeg,
            &gray_png,
            &rgba_png,
            &opaque_rgba_png,
            &deep_gray_png,
        ]);
        let pages = doc.get_pages();
        let images: Vec<&Stream> = pages.values().map(|id| page_image(&doc, *id)).collect();

        assert_eq!(
            images.iter().map(|s| color_space_and_bits(s)).collect::<Vec<_>>(),
            vec![
                ("DeviceGray".to_string(), 8),
                ("DeviceGray".to_string(), 8),
                ("DeviceRGB".to_string(), 8),
                ("DeviceRGB".to_string(), 8),
                ("DeviceGray".to_string(), 16),
            ]
        );

        let filter = images[0].dict.get(b"Filter").unwrap().as_name().unwrap();
        assert_eq!(filter, b"DCTDecode".as_slice());

        // Only the translucent page carries a soft mask.
        let mask_id = images[2].dict.get(b"SMask").unwrap().as_reference().unwrap();
        let mask = doc.get_object(mask_id).unwrap().as_stream().unwrap();
        assert_eq!(color_space_and_bits(mask), ("DeviceGray".to_string(), 8));
        assert!(images[3].dict.get(b"SMask").is_err());
        assert!(images[1].dict.get(b"SMask").is_err());
    }

    #[test]
    fn jpeg_frame_reads_precision_and_components() {
        let dir = tempfile::tempdir().unwrap();
        let gray = dir.path().join("gray.jpg");
        let color = dir.path().join("color.jpg");
        GrayImage::from_pixel(4, 4, Luma([0])).save(&gray).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])).save(&color).unwrap();

        assert_eq!(jpeg_frame(&fs::read(&gray).unwrap()), Some((8, 1)));
        assert_eq!(jpeg_frame(&fs::read(&color).unwrap()), Some((8, 3)));
        assert_eq!(jpeg_frame(b"\x89PNG\r\n\x1a\n"), None);
        assert_eq!(jpeg_frame(b"\xFF\xD8\xFF"), None);
    }

    #[test]
    fn non_image_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("notes.txt");
        fs::write(&bogus, b"definitely not an image").unwrap();

        let mut builder = ImagePdfBuilder::new();
        assert!(matches!(builder.add_image(&bogus), Err(CodecError::Image(_))));
        assert_eq!(builder.page_count(), 0);
    }
}
