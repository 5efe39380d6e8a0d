//! PDF Split algorithm
//!
//! Turns one document into one self-contained document per page using
//! "Construction by Whitelist":
//! 1. Materialize the attributes a page inherits from its page tree ancestors
//! 2. Traverse the dependency graph from the page to find every required object
//! 3. Build a new document with only those objects plus a fresh page tree
//! 4. Serialize with a rebuilt xref table and trailer

use std::collections::BTreeSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, info, warn};

use crate::error::PageSplitError;
use crate::options::{ParseMode, SplitOptions};

const HEADER: &[u8] = b"%PDF-";
const EOF_MARKER: &[u8] = b"%%EOF";
/// How far from the start (header) or end (`%%EOF`) markers are searched for
const MARKER_WINDOW: usize = 1024;

/// Page attributes that may be set on an ancestor `Pages` node instead of the page
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Load a document, applying the header/trailer checks of the chosen mode
pub fn load_document(bytes: &[u8], options: &SplitOptions) -> Result<Document, PageSplitError> {
    let body = match options.parse_mode {
        ParseMode::Strict => {
            if !bytes.starts_with(HEADER) {
                return Err(PageSplitError::ParseError(
                    "Missing %PDF- header at offset 0".into(),
                ));
            }
            let tail = &bytes[bytes.len().saturating_sub(MARKER_WINDOW)..];
            if find(tail, EOF_MARKER).is_none() {
                return Err(PageSplitError::ParseError(
                    "Missing %%EOF marker, file is likely truncated".into(),
                ));
            }
            bytes
        }
        ParseMode::Lenient => {
            let head = &bytes[..bytes.len().min(MARKER_WINDOW)];
            let offset = find(head, HEADER).ok_or_else(|| {
                PageSplitError::ParseError("No %PDF- header found".into())
            })?;
            if offset > 0 {
                debug!(offset, "Discarding bytes before PDF header");
            }
            &bytes[offset..]
        }
    };

    let mut doc =
        Document::load_mem(body).map_err(|e| PageSplitError::ParseError(e.to_string()))?;

    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(PageSplitError::ParseError(
            "Encrypted documents are not supported".into(),
        ));
    }

    if options.is_lenient() && doc.trailer.get(b"Root").is_err() {
        if let Some(catalog_id) = find_catalog(&doc) {
            warn!(
                object = catalog_id.0,
                "Trailer has no /Root, recovered catalog by scanning objects"
            );
            doc.trailer.set("Root", Object::Reference(catalog_id));
        }
    }

    if doc.trailer.get(b"Root").is_err() {
        return Err(PageSplitError::ParseError("Trailer has no /Root".into()));
    }

    Ok(doc)
}

fn has_type(dict: &Dictionary, type_name: &[u8]) -> bool {
    dict.get(b"Type")
        .and_then(Object::as_name)
        .map(|name| name == type_name)
        .unwrap_or(false)
}

fn find_catalog(doc: &Document) -> Option<ObjectId> {
    doc.objects.iter().find_map(|(id, object)| match object {
        Object::Dictionary(dict) if has_type(dict, b"Catalog") => Some(*id),
        _ => None,
    })
}

/// Page object ids in page tree order
fn page_ids(doc: &Document) -> Result<Vec<ObjectId>, PageSplitError> {
    let ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if ids.is_empty() {
        return Err(PageSplitError::EmptyDocument);
    }
    Ok(ids)
}

/// Parse PDF bytes and return the page count
pub fn page_count(bytes: &[u8], options: &SplitOptions) -> Result<usize, PageSplitError> {
    let doc = load_document(bytes, options)?;
    Ok(doc.get_pages().len())
}

/// Split a PDF into one standalone PDF per page, in page order.
///
/// Any page that cannot be isolated aborts the whole split.
pub fn split(bytes: &[u8], options: &SplitOptions) -> Result<Vec<Vec<u8>>, PageSplitError> {
    let source = load_document(bytes, options)?;
    let ids = page_ids(&source)?;

    info!(
        pages = ids.len(),
        input_bytes = bytes.len(),
        mode = ?options.parse_mode,
        "Splitting document"
    );

    ids.iter()
        .enumerate()
        .map(|(index, &page_id)| extract_page(&source, &ids, index, page_id, options))
        .collect()
}

/// Extract a single page (0-based) as a standalone PDF
pub fn split_page(
    bytes: &[u8],
    index: usize,
    options: &SplitOptions,
) -> Result<Vec<u8>, PageSplitError> {
    let source = load_document(bytes, options)?;
    let ids = page_ids(&source)?;
    let page_id = *ids.get(index).ok_or_else(|| PageSplitError::PageExtraction {
        index,
        reason: format!("Page does not exist (document has {} pages)", ids.len()),
    })?;
    extract_page(&source, &ids, index, page_id, options)
}

fn extract_page(
    source: &Document,
    all_pages: &[ObjectId],
    index: usize,
    page_id: ObjectId,
    options: &SplitOptions,
) -> Result<Vec<u8>, PageSplitError> {
    let fail = |reason: String| PageSplitError::PageExtraction { index, reason };

    let mut page = source
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| fail(format!("Page object {} is unusable: {}", page_id.0, e)))?
        .clone();

    for key in INHERITABLE_KEYS {
        if !page.has(key) {
            if let Some(value) = inherited_attribute(source, &page, key) {
                page.set(key.to_vec(), value);
            }
        }
    }
    page.remove(b"Parent");

    if !page.has(b"MediaBox") {
        if options.is_lenient() {
            warn!(index, "Page has no MediaBox, defaulting to US Letter");
            page.set(
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            );
        } else {
            return Err(fail("Page has no MediaBox".into()));
        }
    }

    // Links and other back-references to sibling pages are dropped rather
    // than dragging those pages into the closure.
    let excluded: BTreeSet<ObjectId> = all_pages
        .iter()
        .copied()
        .filter(|&id| id != page_id)
        .collect();

    let mut target = Document::with_version(source.version.clone());

    let mut pending = Vec::new();
    let mut page = detach_dict(&page, &excluded, &mut pending);

    if let Ok(info) = source.trailer.get(b"Info") {
        let info = detach(info, &excluded, &mut pending);
        target.trailer.set("Info", info);
    }

    let mut copied = BTreeSet::new();
    while let Some(id) = pending.pop() {
        if id == page_id || !copied.insert(id) {
            continue;
        }
        match source.get_object(id) {
            Ok(object) => {
                let object = detach(object, &excluded, &mut pending);
                target.objects.insert(id, object);
            }
            Err(e) if options.is_lenient() => {
                warn!(index, object = id.0, "Dangling reference replaced with null: {}", e);
                target.objects.insert(id, Object::Null);
            }
            Err(e) => {
                return Err(fail(format!("Object {} {} R is missing: {}", id.0, id.1, e)));
            }
        }
    }

    // Recovered dangling ids may sit above the source's max_id
    target.max_id = target
        .objects
        .keys()
        .map(|id| id.0)
        .max()
        .unwrap_or(0)
        .max(source.max_id);
    let pages_id = target.new_object_id();
    page.set("Parent", Object::Reference(pages_id));
    target.objects.insert(page_id, Object::Dictionary(page));

    let pages = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(1)),
        ("Kids", Object::Array(vec![Object::Reference(page_id)])),
    ]);
    target.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]);
    let catalog_id = target.add_object(catalog);
    target.trailer.set("Root", Object::Reference(catalog_id));

    target.renumber_objects();
    if options.compress {
        target.compress();
    }

    let mut buffer = Vec::new();
    target
        .save_to(&mut buffer)
        .map_err(|e| fail(format!("Save failed: {}", e)))?;

    debug!(
        index,
        objects = copied.len() + 3,
        output_bytes = buffer.len(),
        "Extracted page"
    );

    Ok(buffer)
}

/// Look up `key` on the nearest ancestor of `page` that defines it
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut visited = BTreeSet::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    while let Some(id) = parent {
        if !visited.insert(id) {
            break;
        }
        let node = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}

/// Copy `object`, queueing every reference in it for copying and replacing
/// references to excluded objects with `null`
fn detach(object: &Object, excluded: &BTreeSet<ObjectId>, pending: &mut Vec<ObjectId>) -> Object {
    match object {
        Object::Reference(id) if excluded.contains(id) => Object::Null,
        Object::Reference(id) => {
            pending.push(*id);
            Object::Reference(*id)
        }
        Object::Array(items) => Object::Array(
            items
                .iter()
                .map(|item| detach(item, excluded, pending))
                .collect(),
        ),
        Object::Dictionary(dict) => Object::Dictionary(detach_dict(dict, excluded, pending)),
        Object::Stream(stream) => {
            let dict = detach_dict(&stream.dict, excluded, pending);
            let mut stream = stream.clone();
            stream.dict = dict;
            Object::Stream(stream)
        }
        other => other.clone(),
    }
}

fn detach_dict(
    dict: &Dictionary,
    excluded: &BTreeSet<ObjectId>,
    pending: &mut Vec<ObjectId>,
) -> Dictionary {
    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        out.set(key.clone(), detach(value, excluded, pending));
    }
    out
}
