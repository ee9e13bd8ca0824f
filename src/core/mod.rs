// Notebook model, manifest detection, the cell/script bridge, and errors.
pub mod error;
pub mod inline_metadata;
pub mod manifest;
pub mod notebook;
pub mod script;
