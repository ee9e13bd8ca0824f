//! Purpose: Locate the notebook cell that carries the inline dependency manifest.
//! Exports: `find_manifest_cell`, `insert_manifest_cell`, `locate_or_insert`, `ManifestSlot`.
//! Role: Pure search plus an explicit, separate insertion step.
//! Invariants: Only code cells are considered; the first match wins.
//! Invariants: A synthesized manifest cell is hidden, empty, and always at index 0.
//! Invariants: A miss always inserts; existing cells are never taken over.
use crate::core::error::Error;
use crate::core::inline_metadata::includes_inline_metadata;
use crate::core::notebook::{Cell, Document, new_code_cell};

/// How `locate_or_insert` obtained the manifest cell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManifestSlot {
    Found(usize),
    Inserted,
}

impl ManifestSlot {
    pub fn index(self) -> usize {
        match self {
            ManifestSlot::Found(index) => index,
            ManifestSlot::Inserted => 0,
        }
    }
}

pub fn find_manifest_cell(document: &Document) -> Option<usize> {
    document
        .cells
        .iter()
        .position(|cell| cell.is_code() && includes_inline_metadata(&cell.source_text()))
}

pub fn insert_manifest_cell(document: &mut Document) -> Result<usize, Error> {
    document.cells.insert(0, new_code_cell("", true)?);
    Ok(0)
}

pub fn locate_or_insert(document: &mut Document) -> Result<(ManifestSlot, &mut Cell), Error> {
    let slot = match find_manifest_cell(document) {
        Some(index) => ManifestSlot::Found(index),
        None => {
            insert_manifest_cell(document)?;
            ManifestSlot::Inserted
        }
    };
    tracing::debug!(?slot, "located manifest cell");
    Ok((slot, &mut document.cells[slot.index()]))
}
