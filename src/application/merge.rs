//! PDF document merging.
//!
//! The render pipeline produces one PDF buffer per input document; this
//! module concatenates them into a single document. Page order in the output
//! is a strict concatenation: every page of input k precedes every page of
//! input k+1, and pages within one input keep their original order.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no documents to merge")]
    NoDocuments,
    #[error("document {index} could not be decoded")]
    Malformed {
        index: usize,
        #[source]
        source: lopdf::Error,
    },
    #[error("merged document could not be serialized")]
    Serialize(#[source] lopdf::Error),
}

/// Merge an ordered sequence of PDF buffers into one document.
///
/// A malformed input aborts the whole merge; no partial output is produced.
pub fn merge_documents(buffers: &[Vec<u8>]) -> Result<Vec<u8>, MergeError> {
    if buffers.is_empty() {
        return Err(MergeError::NoDocuments);
    }

    let mut destination = Document::with_version("1.5");
    let mut max_id: u32 = 1;
    // Pages are collected into an order-preserving list; everything else the
    // inputs carry (fonts, streams, resources) is keyed by object id.
    let mut page_objects: Vec<(ObjectId, Object)> = Vec::new();
    let mut carried_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for (index, buffer) in buffers.iter().enumerate() {
        let mut source = Document::load_mem(buffer)
            .map_err(|source| MergeError::Malformed { index, source })?;

        source.renumber_objects_with(max_id);
        max_id = source.max_id + 1;

        // get_pages yields page ids keyed by ascending page number.
        for (_, page_id) in source.get_pages() {
            let object = source
                .get_object(page_id)
                .map_err(|source| MergeError::Malformed { index, source })?
                .clone();
            page_objects.push((page_id, object));
        }

        for (object_id, object) in source.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    carried_objects.insert(object_id, object);
                }
            }
        }
    }

    for (object_id, object) in carried_objects {
        destination.objects.insert(object_id, object);
    }

    // Object ids were renumbered monotonically across inputs, so continuing
    // from max_id keeps the new tree nodes collision-free.
    destination.max_id = max_id;
    let pages_id = destination.new_object_id();

    for (page_id, object) in &page_objects {
        if let Object::Dictionary(dictionary) = object {
            let mut dictionary = dictionary.clone();
            dictionary.set("Parent", Object::Reference(pages_id));
            destination
                .objects
                .insert(*page_id, Object::Dictionary(dictionary));
        }
    }

    let kids: Vec<Object> = page_objects
        .iter()
        .map(|(id, _)| Object::Reference(*id))
        .collect();
    let page_count = page_objects.len() as i64;

    let pages_dictionary = Dictionary::from_iter([
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Kids", Object::Array(kids)),
        ("Count", Object::Integer(page_count)),
    ]);
    destination
        .objects
        .insert(pages_id, Object::Dictionary(pages_dictionary));

    let catalog_id = destination.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    destination.trailer.set("Root", Object::Reference(catalog_id));

    destination.renumber_objects();
    destination.compress();

    let mut output = Vec::new();
    destination
        .save_to(&mut output)
        .map_err(|source| MergeError::Serialize(source.into()))?;

    Ok(output)
}
