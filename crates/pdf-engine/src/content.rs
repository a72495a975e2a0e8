//! Page geometry and drawable content pulled out of a parsed document.
//!
//! Everything the painter needs is copied out at open time, so the engine
//! never holds on to the `lopdf::Document` itself.

use crate::{PageSize, PdfEngineError};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::sync::Arc;
use tiny_skia::{IntSize, Pixmap};

/// Page tree levels walked when looking up an inherited attribute.
const MAX_TREE_DEPTH: usize = 32;

/// Form XObjects nested deeper than this are skipped.
const MAX_FORM_DEPTH: usize = 8;

const LETTER_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Visible page area in default user space and its display rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PageGeometry {
    pub left: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
    /// Clockwise, one of 0, 90, 180, 270.
    pub rotate: u16,
}

impl PageGeometry {
    /// Size as displayed, after `/Rotate` is applied.
    pub fn display_size(&self) -> PageSize {
        if self.rotate % 180 == 90 {
            PageSize { width_pt: self.height, height_pt: self.width }
        } else {
            PageSize { width_pt: self.width, height_pt: self.height }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ExtGState {
    pub fill_alpha: Option<f32>,
    pub stroke_alpha: Option<f32>,
    pub line_width: Option<f32>,
}

#[derive(Debug)]
pub(crate) struct Form {
    pub matrix: [f32; 6],
    pub content: PageContent,
}

#[derive(Debug, Clone)]
pub(crate) enum XObject {
    Image(Arc<Pixmap>),
    Form(Arc<Form>),
}

#[derive(Debug, Default)]
pub(crate) struct Resources {
    pub xobjects: HashMap<Vec<u8>, XObject>,
    pub graphics_states: HashMap<Vec<u8>, ExtGState>,
}

#[derive(Debug, Default)]
pub(crate) struct PageContent {
    pub operations: Vec<Operation>,
    pub resources: Resources,
}

#[derive(Debug)]
pub(crate) struct PageRecord {
    pub geometry: PageGeometry,
    /// A page whose content cannot be read still has a size; drawing it fails.
    pub content: Result<PageContent, String>,
}

/// Decoded images keyed by object, shared between pages that reuse them.
type ImageCache = HashMap<ObjectId, Option<Arc<Pixmap>>>;

pub(crate) fn load_pages(bytes: &[u8]) -> Result<Vec<PageRecord>, PdfEngineError> {
    let doc = Document::load_mem(bytes)?;
    let pages = doc.get_pages();
    let mut images = ImageCache::new();
    let mut records = Vec::with_capacity(pages.len());

    for (number, page_id) in pages {
        let page = doc.get_dictionary(page_id)?;
        let geometry = page_geometry(&doc, page);
        let content = page_content(&doc, page_id, page, &mut images);
        if let Err(reason) = &content {
            log::warn!("page {number} has unreadable content: {reason}");
        }
        records.push(PageRecord { geometry, content });
    }

    if records.is_empty() {
        return Err(PdfEngineError::NoPages);
    }

    Ok(records)
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Look `key` up on the page, then on each ancestor in the page tree.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return resolve(doc, value);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    log::warn!("page tree deeper than {MAX_TREE_DEPTH} levels, ignoring inherited {}", String::from_utf8_lossy(key));
    None
}

pub(crate) fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}

fn numbers<const N: usize>(doc: &Document, object: &Object) -> Option<[f32; N]> {
    let array = resolve(doc, object)?.as_array().ok()?;
    if array.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(array) {
        *slot = number(resolve(doc, item)?)?;
    }
    Some(out)
}

/// Normalised `[x0 y0 x1 y1]`, rejecting empty boxes.
fn rectangle(doc: &Document, object: &Object) -> Option<[f32; 4]> {
    let [a, b, c, d] = numbers::<4>(doc, object)?;
    let rect = [a.min(c), b.min(d), a.max(c), b.max(d)];
    (rect[2] - rect[0] > 0.0 && rect[3] - rect[1] > 0.0).then_some(rect)
}

fn intersect(a: [f32; 4], b: [f32; 4]) -> Option<[f32; 4]> {
    let rect = [a[0].max(b[0]), a[1].max(b[1]), a[2].min(b[2]), a[3].min(b[3])];
    (rect[2] > rect[0] && rect[3] > rect[1]).then_some(rect)
}

fn page_geometry(doc: &Document, page: &Dictionary) -> PageGeometry {
    let media = inherited(doc, page, b"MediaBox")
        .and_then(|object| rectangle(doc, object))
        .unwrap_or(LETTER_BOX);
    let visible = inherited(doc, page, b"CropBox")
        .and_then(|object| rectangle(doc, object))
        .and_then(|crop| intersect(media, crop))
        .unwrap_or(media);
    let rotate = inherited(doc, page, b"Rotate")
        .and_then(number)
        .map(|degrees| ((degrees / 90.0).round() as i64 * 90).rem_euclid(360) as u16)
        .unwrap_or(0);

    PageGeometry {
        left: visible[0],
        bottom: visible[1],
        width: visible[2] - visible[0],
        height: visible[3] - visible[1],
        rotate,
    }
}

fn page_content(
    doc: &Document,
    page_id: ObjectId,
    page: &Dictionary,
    images: &mut ImageCache,
) -> Result<PageContent, String> {
    let bytes = doc.get_page_content(page_id).map_err(|err| err.to_string())?;
    let content = Content::decode(&bytes).map_err(|err| err.to_string())?;
    let resources = inherited(doc, page, b"Resources").and_then(|object| object.as_dict().ok());

    Ok(PageContent {
        operations: content.operations,
        resources: load_resources(doc, resources, images, 0),
    })
}

fn load_resources(
    doc: &Document,
    dict: Option<&Dictionary>,
    images: &mut ImageCache,
    depth: usize,
) -> Resources {
    let mut resources = Resources::default();
    let Some(dict) = dict else {
        return resources;
    };

    let xobjects = dict.get(b"XObject").ok().and_then(|object| resolve(doc, object));
    if let Some(xobjects) = xobjects.and_then(|object| object.as_dict().ok()) {
        for (name, value) in xobjects.iter() {
            let Object::Reference(id) = value else {
                continue;
            };
            let Ok(stream) = doc.get_object(*id).and_then(Object::as_stream) else {
                continue;
            };
            let subtype = stream.dict.get(b"Subtype").and_then(Object::as_name).ok();
            let xobject = match subtype {
                Some(b"Image") => images
                    .entry(*id)
                    .or_insert_with(|| decode_image(stream).map(Arc::new))
                    .clone()
                    .map(XObject::Image),
                Some(b"Form") if depth < MAX_FORM_DEPTH => {
                    load_form(doc, stream, images, depth + 1).map(|form| XObject::Form(Arc::new(form)))
                }
                _ => None,
            };
            if let Some(xobject) = xobject {
                resources.xobjects.insert(name.clone(), xobject);
            }
        }
    }

    let states = dict.get(b"ExtGState").ok().and_then(|object| resolve(doc, object));
    if let Some(states) = states.and_then(|object| object.as_dict().ok()) {
        for (name, value) in states.iter() {
            let Some(state) = resolve(doc, value).and_then(|object| object.as_dict().ok()) else {
                continue;
            };
            let field = |key: &[u8]| state.get(key).ok().and_then(number);
            resources.graphics_states.insert(
                name.clone(),
                ExtGState {
                    fill_alpha: field(b"ca"),
                    stroke_alpha: field(b"CA"),
                    line_width: field(b"LW"),
                },
            );
        }
    }

    resources
}

fn load_form(doc: &Document, stream: &Stream, images: &mut ImageCache, depth: usize) -> Option<Form> {
    let data = stream.get_plain_content().ok()?;
    let content = Content::decode(&data).ok()?;
    let matrix = stream
        .dict
        .get(b"Matrix")
        .ok()
        .and_then(|object| numbers::<6>(doc, object))
        .unwrap_or([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    let resources = stream
        .dict
        .get(b"Resources")
        .ok()
        .and_then(|object| resolve(doc, object))
        .and_then(|object| object.as_dict().ok());

    Some(Form {
        matrix,
        content: PageContent {
            operations: content.operations,
            resources: load_resources(doc, resources, images, depth),
        },
    })
}

/// Image samples with the stream filters undone. `lopdf` refuses to
/// decompress streams typed as images, so the data is decoded from a copy
/// without `Subtype`.
fn image_samples(stream: &Stream) -> Option<Vec<u8>> {
    let mut dict = stream.dict.clone();
    dict.remove(b"Subtype");
    Stream::new(dict, stream.content.clone()).get_plain_content().ok()
}

fn rgba_pixmap(width: u32, height: u32, rgba: Vec<u8>) -> Option<Pixmap> {
    Pixmap::from_vec(rgba, IntSize::from_wh(width, height)?)
}

/// Decode an image XObject into an opaque pixmap. JPEG streams go through
/// `image`; other streams must decode to 8-bit gray, RGB or CMYK samples.
fn decode_image(stream: &Stream) -> Option<Pixmap> {
    let dict = &stream.dict;
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return None;
    }

    let filters = stream.filters().unwrap_or_default();
    if filters.last().map(String::as_str) == Some("DCTDecode") {
        let decoded = image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
            .map_err(|err| log::debug!("skipping JPEG image: {err}"))
            .ok()?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        return rgba_pixmap(width, height, decoded.into_raw());
    }

    let width = dict.get(b"Width").ok().and_then(number)? as u32;
    let height = dict.get(b"Height").ok().and_then(number)? as u32;
    let bits = dict.get(b"BitsPerComponent").ok().and_then(number).unwrap_or(8.0);
    if bits != 8.0 || width == 0 || height == 0 {
        log::debug!("skipping {width}x{height} image with {bits} bits per component");
        return None;
    }

    let data = image_samples(stream)?;
    let pixels = width as usize * height as usize;
    let components = match dict.get(b"ColorSpace").and_then(Object::as_name) {
        Ok(b"DeviceGray") => 1,
        Ok(b"DeviceRGB") => 3,
        Ok(b"DeviceCMYK") => 4,
        _ => data.len() / pixels,
    };
    if !matches!(components, 1 | 3 | 4) || data.len() < pixels * components {
        log::debug!("skipping image with {components} components");
        return None;
    }

    let mut rgba = Vec::with_capacity(pixels * 4);
    for sample in data.chunks_exact(components).take(pixels) {
        let [r, g, b] = match sample {
            &[gray] => [gray; 3],
            &[r, g, b] => [r, g, b],
            &[c, m, y, k] => {
                let ink = |channel: u8| ((255 - channel as u16) * (255 - k as u16) / 255) as u8;
                [ink(c), ink(m), ink(y)]
            }
            _ => return None,
        };
        rgba.extend_from_slice(&[r, g, b, 255]);
    }

    rgba_pixmap(width, height, rgba)
}
