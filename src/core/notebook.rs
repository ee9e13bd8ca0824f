//! Purpose: In-memory notebook model plus nbformat v4 JSON read/write.
//! Exports: `Document`, `Cell`, `Source`, `read`, `write`, `new_document`, `new_code_cell`.
//! Role: The only place that knows the on-disk notebook format.
//! Invariants: Unknown top-level, cell, and metadata fields survive a read/write cycle.
//! Invariants: Cells whose source is never reassigned keep their original representation.
//! Invariants: Output uses one-space indentation and sorted keys, like nbformat.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::error::{Error, ErrorKind, io_error};

pub const NBFORMAT: u64 = 4;
pub const NBFORMAT_MINOR: u64 = 5;

const CODE_CELL: &str = "code";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// nbformat allows either a single string or a list of lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Lines(Vec<String>),
}

impl Default for Source {
    fn default() -> Self {
        Source::Lines(Vec::new())
    }
}

impl Source {
    pub fn from_text(text: &str) -> Self {
        Source::Lines(text.split_inclusive('\n').map(str::to_string).collect())
    }

    pub fn text(&self) -> String {
        match self {
            Source::Text(text) => text.clone(),
            Source::Lines(lines) => lines.concat(),
        }
    }
}

impl Cell {
    pub fn is_code(&self) -> bool {
        self.cell_type == CODE_CELL
    }

    pub fn source_text(&self) -> String {
        self.source.text()
    }

    pub fn set_source(&mut self, text: &str) {
        self.source = Source::from_text(text);
    }

    pub fn is_hidden(&self) -> bool {
        self.metadata
            .get("jupyter")
            .and_then(|jupyter| jupyter.get("source_hidden"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl Document {
    pub fn nbformat(&self) -> Option<u64> {
        self.rest.get("nbformat").and_then(Value::as_u64)
    }
}

pub fn read(path: &Path) -> Result<Document, Error> {
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(err, "failed to read notebook", path))?;
    let document: Document = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("notebook is not valid nbformat JSON")
            .with_path(path)
            .with_hint("Open the notebook in Jupyter and re-save it, or check the file contents.")
            .with_source(err)
    })?;
    match document.nbformat() {
        Some(NBFORMAT) | None => Ok(document),
        Some(other) => Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!(
                "unsupported nbformat version {other} (supported: {NBFORMAT})"
            ))
            .with_path(path)
            .with_hint("Upgrade the notebook with `jupyter nbconvert --to notebook`.")),
    }
}

pub fn write(document: &Document, path: &Path) -> Result<(), Error> {
    let text = to_string(document)?;
    fs::write(path, text).map_err(|err| io_error(err, "failed to write notebook", path))?;
    tracing::info!(path = %path.display(), cells = document.cells.len(), "wrote notebook");
    Ok(())
}

pub fn to_string(document: &Document) -> Result<String, Error> {
    // Round-trip through `Value` so every object is emitted with sorted keys.
    let value = serde_json::to_value(document).map_err(encode_error)?;
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer).map_err(encode_error)?;
    buf.push(b'\n');
    String::from_utf8(buf).map_err(encode_error)
}

pub fn new_document(cells: Vec<Cell>) -> Document {
    let metadata = json!({
        "kernelspec": {
            "display_name": "Python 3 (ipykernel)",
            "language": "python",
            "name": "python3",
        },
    });
    let mut rest = Map::new();
    rest.insert("nbformat".to_string(), json!(NBFORMAT));
    rest.insert("nbformat_minor".to_string(), json!(NBFORMAT_MINOR));
    Document {
        cells,
        metadata: object(metadata),
        rest,
    }
}

pub fn new_code_cell(source: &str, hidden: bool) -> Result<Cell, Error> {
    let metadata = if hidden {
        object(json!({ "jupyter": { "source_hidden": true } }))
    } else {
        Map::new()
    };
    let mut rest = Map::new();
    rest.insert("id".to_string(), json!(new_cell_id()?));
    rest.insert("execution_count".to_string(), Value::Null);
    rest.insert("outputs".to_string(), json!([]));
    Ok(Cell {
        cell_type: CODE_CELL.to_string(),
        source: Source::from_text(source),
        metadata,
        rest,
    })
}

fn new_cell_id() -> Result<String, Error> {
    let mut bytes = [0u8; 4];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal).with_message(format!("failed to generate cell id: {err}"))
    })?;
    Ok(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn encode_error(err: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("failed to encode notebook")
        .with_source(err)
}
