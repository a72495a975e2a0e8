//! In-memory PDF documents for tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// A4 portrait, in points.
pub const A4: (f32, f32) = (595.0, 842.0);

/// Build a document with `count` A4 pages.
pub fn pdf_with_pages(count: usize) -> Vec<u8> {
    pdf_with_page_sizes(&vec![A4; count])
}

/// Build a document with one page per entry of `sizes` (width, height in points).
/// Each page carries its 1-based number as text.
pub fn pdf_with_page_sizes(sizes: &[(f32, f32)]) -> Vec<u8> {
    let pages: Vec<((f32, f32), Vec<u8>)> = sizes
        .iter()
        .enumerate()
        .map(|(number, size)| {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), Object::Integer(24)]),
                    Operation::new("Td", vec![Object::Integer(72), Object::Integer(72)]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("Page {}", number + 1))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            (*size, content.encode().unwrap_or_default())
        })
        .collect();
    build(&pages)
}

/// Build a document whose pages draw the given content streams, written in
/// PDF operator syntax, e.g. `"0 0 0 rg 0 0 200 200 re f"`.
pub fn pdf_with_content(pages: &[((f32, f32), &str)]) -> Vec<u8> {
    let pages: Vec<((f32, f32), Vec<u8>)> =
        pages.iter().map(|(size, content)| (*size, content.as_bytes().to_vec())).collect();
    build(&pages)
}

/// Serialize `doc` after pointing its trailer at a catalog for `pages_id`.
pub fn finish(mut doc: Document, pages_id: ObjectId) -> Vec<u8> {
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    if let Err(err) = doc.save_to(&mut bytes) {
        panic!("fixture document should serialize: {err}");
    }
    bytes
}

/// `[0 0 width height]`.
pub fn media_box(width: f32, height: f32) -> Vec<Object> {
    vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(width.into()),
        Object::Real(height.into()),
    ]
}

fn build(pages: &[((f32, f32), Vec<u8>)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for ((width, height), content) in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.clone()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => media_box(*width, *height),
        });
        kids.push(Object::Reference(page_id));
    }

    let tree = dictionary! {
        "Type" => "Pages",
        "Count" => Object::Integer(pages.len() as i64),
        "Kids" => kids,
    };
    doc.objects.insert(pages_id, Object::Dictionary(tree));
    finish(doc, pages_id)
}
