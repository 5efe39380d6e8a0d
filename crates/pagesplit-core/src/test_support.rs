//! Builders for in-memory test PDFs

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::{content::Content, content::Operation, Dictionary, Document, Object, Stream};

fn letter_box() -> Object {
    Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(612),
        Object::Integer(792),
    ])
}

fn text_content(text: &str) -> Vec<u8> {
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ),
            Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
            Operation::new(
                "Tj",
                vec![Object::String(
                    text.as_bytes().to_vec(),
                    lopdf::StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ],
    };
    content.encode().unwrap()
}

fn finish(mut doc: Document, pages_id: lopdf::ObjectId, page_ids: &[lopdf::ObjectId]) -> Vec<u8> {
    let pages = doc
        .get_object_mut(pages_id)
        .and_then(Object::as_dict_mut)
        .unwrap();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(page_ids.len() as i64));
    pages.set(
        "Kids",
        Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
    );

    let catalog = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]);
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// PDF with `num_pages` pages, each showing "Page N" with a shared font
/// inherited from the page tree root.
pub fn create_test_pdf(num_pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.add_object(Dictionary::new());

    let font_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ]));
    let resources = Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(Dictionary::from_iter(vec![(
            "F1",
            Object::Reference(font_id),
        )])),
    )]);

    let mut page_ids = Vec::new();
    for i in 0..num_pages {
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            text_content(&format!("Page {}", i + 1)),
        ));
        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Contents", Object::Reference(content_id)),
        ]);
        page_ids.push(doc.add_object(page));
    }

    let pages = doc
        .get_object_mut(pages_id)
        .and_then(Object::as_dict_mut)
        .unwrap();
    pages.set("Resources", Object::Dictionary(resources));
    pages.set("MediaBox", letter_box());

    finish(doc, pages_id, &page_ids)
}

/// PDF whose first page carries a link annotation pointing at the second page
pub fn create_linked_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.add_object(Dictionary::new());

    let mut page_ids = Vec::new();
    for i in 0..2 {
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            text_content(&format!("Page {}", i + 1)),
        ));
        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("MediaBox", letter_box()),
            ("Contents", Object::Reference(content_id)),
        ]);
        page_ids.push(doc.add_object(page));
    }

    let link = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Annot".to_vec())),
        ("Subtype", Object::Name(b"Link".to_vec())),
        (
            "Dest",
            Object::Array(vec![
                Object::Reference(page_ids[1]),
                Object::Name(b"Fit".to_vec()),
            ]),
        ),
    ]);
    let link_id = doc.add_object(link);
    doc.get_object_mut(page_ids[0])
        .and_then(Object::as_dict_mut)
        .unwrap()
        .set("Annots", Object::Array(vec![Object::Reference(link_id)]));

    finish(doc, pages_id, &page_ids)
}

/// PDF with a page tree but no pages
pub fn create_empty_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.add_object(Dictionary::new());
    finish(doc, pages_id, &[])
}

/// Single-page PDF whose page references an object that does not exist
pub fn create_dangling_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.add_object(Dictionary::new());
    let content_id = doc.add_object(Stream::new(Dictionary::new(), text_content("Page 1")));
    let page = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        ("MediaBox", letter_box()),
        ("Contents", Object::Reference(content_id)),
        ("Thumb", Object::Reference((900, 0))),
    ]);
    let page_id = doc.add_object(page);
    finish(doc, pages_id, &[page_id])
}

/// Load `bytes`, let `edit` change the document, and save it again
pub fn edit_pdf(bytes: &[u8], edit: impl FnOnce(&mut Document)) -> Vec<u8> {
    let mut doc = Document::load_mem(bytes).unwrap();
    edit(&mut doc);
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Two-page PDF whose trailer declares standard-handler encryption
pub fn create_encrypted_pdf() -> Vec<u8> {
    edit_pdf(&create_test_pdf(2), |doc| {
        let encrypt = doc.add_object(Dictionary::from_iter(vec![
            ("Filter", Object::Name(b"Standard".to_vec())),
            ("V", Object::Integer(1)),
            ("R", Object::Integer(2)),
            ("O", Object::string_literal(vec![0u8; 32])),
            ("U", Object::string_literal(vec![0u8; 32])),
            ("P", Object::Integer(-4)),
        ]));
        doc.trailer.set("Encrypt", Object::Reference(encrypt));
    })
}

/// `num_pages`-page PDF whose trailer lost its `/Root`; the catalog object
/// itself is still present
pub fn create_rootless_pdf(num_pages: u32) -> Vec<u8> {
    edit_pdf(&create_test_pdf(num_pages), |doc| {
        doc.trailer.remove(b"Root");
    })
}

/// Single-page PDF with no `/MediaBox` on the page or any ancestor
pub fn create_boxless_pdf() -> Vec<u8> {
    edit_pdf(&create_test_pdf(1), |doc| {
        for object in doc.objects.values_mut() {
            if let Object::Dictionary(dict) = object {
                dict.remove(b"MediaBox");
            }
        }
    })
}

/// Add `mask` as a new object and point every image's `key` (`SMask` or
/// `Mask`) at it
pub fn attach_mask(bytes: &[u8], key: &str, mask: Stream) -> Vec<u8> {
    edit_pdf(bytes, |doc| {
        let images: Vec<lopdf::ObjectId> = doc
            .objects
            .iter()
            .filter_map(|(id, object)| match object {
                Object::Stream(stream)
                    if stream.dict.get(b"Subtype").and_then(Object::as_name).ok()
                        == Some(b"Image".as_slice()) =>
                {
                    Some(*id)
                }
                _ => None,
            })
            .collect();

        let mut mask = mask;
        mask.allows_compression = false;
        let mask_id = doc.add_object(mask);
        for id in images {
            doc.get_object_mut(id)
                .and_then(Object::as_stream_mut)
                .unwrap()
                .dict
                .set(key, Object::Reference(mask_id));
        }
    })
}

/// Uncompressed 8-bit `DeviceGray` image stream
pub fn gray_image_stream(width: u32, height: u32, samples: Vec<u8>) -> Stream {
    let dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Image".to_vec())),
        ("Width", Object::Integer(width as i64)),
        ("Height", Object::Integer(height as i64)),
        ("ColorSpace", Object::Name(b"DeviceGray".to_vec())),
        ("BitsPerComponent", Object::Integer(8)),
    ]);
    Stream::new(dict, samples)
}

/// Samples of a `width` x `height` white grayscale image with a black
/// rectangle covering `[x0, x1) x [y0, y1)`.
pub fn gray_rect_samples(width: u32, height: u32, rect: (u32, u32, u32, u32)) -> Vec<u8> {
    let (x0, y0, x1, y1) = rect;
    let mut samples = vec![255u8; (width * height) as usize];
    for y in y0..y1 {
        for x in x0..x1 {
            samples[(y * width + x) as usize] = 0;
        }
    }
    samples
}

/// Single-page PDF that draws one image XObject named `/Im0` across the page.
///
/// `filter` is written verbatim into the image dictionary; samples are
/// Flate-compressed when it is `FlateDecode`.
pub fn create_image_pdf(
    width: u32,
    height: u32,
    color_space: &str,
    filter: Option<&str>,
    samples: Vec<u8>,
) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.add_object(Dictionary::new());

    let mut image_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"XObject".to_vec())),
        ("Subtype", Object::Name(b"Image".to_vec())),
        ("Width", Object::Integer(width as i64)),
        ("Height", Object::Integer(height as i64)),
        ("ColorSpace", Object::Name(color_space.as_bytes().to_vec())),
        ("BitsPerComponent", Object::Integer(8)),
    ]);
    let data = match filter {
        Some("FlateDecode") => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&samples).unwrap();
            encoder.finish().unwrap()
        }
        _ => samples,
    };
    if let Some(filter) = filter {
        image_dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    }
    let mut image = Stream::new(image_dict, data);
    image.allows_compression = false;
    let image_id = doc.add_object(image);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(612),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(792),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

    let resources = Dictionary::from_iter(vec![(
        "XObject",
        Object::Dictionary(Dictionary::from_iter(vec![(
            "Im0",
            Object::Reference(image_id),
        )])),
    )]);
    let page = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        ("MediaBox", letter_box()),
        ("Resources", Object::Dictionary(resources)),
        ("Contents", Object::Reference(content_id)),
    ]);
    let page_id = doc.add_object(page);

    finish(doc, pages_id, &[page_id])
}

/// Decompressed content of every page, in order
pub fn page_contents(bytes: &[u8]) -> Vec<Vec<u8>> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| doc.get_page_content(id).unwrap())
        .collect()
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
