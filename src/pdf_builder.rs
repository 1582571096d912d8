use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ColorType, ImageDecoder, ImageError, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::progress::ProgressReporter;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const REENCODE_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("No page images to assemble")]
    NoImages,

    #[error("No images found in {}", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("Output file {} already exists", .0.display())]
    OutputExists(PathBuf),

    #[error("Unsupported or corrupt image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build PDF: {0}")]
    Pdf(String),
}

/// An image ready to be embedded as a `DCTDecode` XObject.
struct PageImage {
    width: u32,
    height: u32,
    color_space: &'static str,
    jpeg: Vec<u8>,
}

impl PageImage {
    fn decode(path: &Path, data: Vec<u8>) -> Result<Self, AssemblyError> {
        let image_error = |source| AssemblyError::Image {
            path: path.to_path_buf(),
            source,
        };

        let format = image::guess_format(&data).map_err(image_error)?;

        // Grayscale and RGB JPEGs go into the PDF untouched. The decoder reports
        // CMYK and YCCK sources as Rgb8, so the frame header decides.
        if format == ImageFormat::Jpeg {
            let (width, height, color_type) = {
                let decoder = JpegDecoder::new(Cursor::new(data.as_slice())).map_err(image_error)?;
                let (width, height) = decoder.dimensions();
                (width, height, decoder.color_type())
            };
            let color_space = match (jpeg_components(&data), color_type) {
                (Some(1), ColorType::L8) => Some("DeviceGray"),
                (Some(3), ColorType::Rgb8) => Some("DeviceRGB"),
                _ => None,
            };
            if let Some(color_space) = color_space {
                return Ok(Self {
                    width,
                    height,
                    color_space,
                    jpeg: data,
                });
            }
        }

        // Everything else is flattened to RGB and re-encoded.
        let rgb = image::load_from_memory_with_format(&data, format)
            .map_err(image_error)?
            .to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, REENCODE_QUALITY)
            .encode_image(&rgb)
            .map_err(image_error)?;

        debug!("Re-encoded {} ({:?}) as JPEG", path.display(), format);
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            color_space: "DeviceRGB",
            jpeg,
        })
    }
}

/// Number of colour components declared in the first start-of-frame segment.
fn jpeg_components(data: &[u8]) -> Option<u8> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }

    let mut i = 2;
    while i + 1 < data.len() {
        // Skip to the next marker, including any fill bytes.
        while i < data.len() && data[i] != 0xFF {
            i += 1;
        }
        while i < data.len() && data[i] == 0xFF {
            i += 1;
        }
        if i >= data.len() {
            break;
        }
        let marker = data[i];
        i += 1;

        // End of image or start of scan: no frame header before entropy data.
        if marker == 0xD9 || marker == 0xDA {
            break;
        }
        if i + 1 >= data.len() {
            break;
        }
        let segment_len = u16::from_be_bytes([data[i], data[i + 1]]) as usize;
        if segment_len < 2 || i + segment_len > data.len() {
            break;
        }

        // SOFn payload: precision, height (2), width (2), component count.
        if is_start_of_frame(marker) && segment_len >= 8 {
            return Some(data[i + 7]);
        }
        i += segment_len;
    }
    None
}

fn is_start_of_frame(marker: u8) -> bool {
    matches!(
        marker,
        0xC0 | 0xC1 | 0xC2 | 0xC3 | 0xC5 | 0xC6 | 0xC7 | 0xC9 | 0xCA | 0xCB | 0xCD | 0xCE | 0xCF
    )
}

/// Builds a PDF with one full-bleed page per image, in insertion order.
pub struct PdfBuilder {
    document: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        Self {
            document,
            pages_id,
            page_ids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    pub async fn add_image(&mut self, path: &Path) -> Result<(), AssemblyError> {
        let data = fs::read(path).await.map_err(|source| AssemblyError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let image = PageImage::decode(path, data)?;
        let (width, height) = (image.width as i64, image.height as i64);

        let image_id = self.document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => image.color_space,
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            },
            image.jpeg,
        ));

        // 1px == 1pt: scale the unit square to the page and draw the image.
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width.into(),
                        0i64.into(),
                        0i64.into(),
                        height.into(),
                        0i64.into(),
                        0i64.into(),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| AssemblyError::Pdf(format!("Failed to encode page content: {}", e)))?;
        let content_id = self
            .document
            .add_object(Stream::new(Dictionary::new(), encoded));

        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0i64.into(), 0i64.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        self.page_ids.push(page_id);

        debug!("Added {} ({}x{}) as page {}", path.display(), width, height, self.page_ids.len());
        Ok(())
    }

    /// Writes the document. The file only appears under `output_path` once fully written.
    pub async fn save(mut self, output_path: &Path) -> Result<usize, AssemblyError> {
        if self.page_ids.is_empty() {
            return Err(AssemblyError::NoImages);
        }

        // The Pages node id was reserved up front so every page could point at it.
        let page_count = self.page_ids.len();
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        self.document.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );

        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.document.trailer.set("Root", catalog_id);

        let mut data = Vec::new();
        self.document
            .save_to(&mut data)
            .map_err(|e| AssemblyError::Pdf(format!("Failed to serialize PDF: {}", e)))?;

        // Write next to the target and rename, so a crash never leaves a PDF
        // that a later run would take for a finished one.
        let partial_path = output_path.with_extension("pdf.part");
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| AssemblyError::Io { path, source }
        };
        fs::write(&partial_path, data)
            .await
            .map_err(io_error(&partial_path))?;
        fs::rename(&partial_path, output_path)
            .await
            .map_err(io_error(output_path))?;

        info!("Wrote {} pages to {}", page_count, output_path.display());
        Ok(page_count)
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles `image_paths`, in order, into a new PDF at `output_path`.
pub async fn build_document(
    image_paths: &[PathBuf],
    output_path: &Path,
    progress: &ProgressReporter,
) -> Result<usize, AssemblyError> {
    if image_paths.is_empty() {
        return Err(AssemblyError::NoImages);
    }
    // Never overwrite; callers treat this as already done.
    if fs::try_exists(output_path).await.unwrap_or(false) {
        return Err(AssemblyError::OutputExists(output_path.to_path_buf()));
    }

    let mut builder = PdfBuilder::new();
    for path in image_paths {
        builder.add_image(path).await?;
        progress.increment();
    }
    progress.finish();

    builder.save(output_path).await
}

/// Page images of a staging directory, sorted by file name.
pub async fn collect_images(dir: &Path) -> Result<Vec<PathBuf>, AssemblyError> {
    let io_error = |source| AssemblyError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(io_error)?;
    let mut images = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }

    if images.is_empty() {
        return Err(AssemblyError::EmptyDirectory(dir.to_path_buf()));
    }

    // Staged names are zero-padded, so lexical order is page order.
    images.sort();
    Ok(images)
}
