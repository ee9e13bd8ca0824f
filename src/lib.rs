//! Purpose: Library crate behind the `nbscript` CLI and its tests.
//! Exports: `core` (errors, notebook model, manifest location, script bridge), `uv`, `sync`.
//! Role: Keeps a notebook's inline script metadata in sync with `uv`.
//! Invariants: No process-wide state; every operation reads and writes the filesystem only.
//! Invariants: Only `uv` spawns processes; only `core::notebook` knows the notebook format.
pub mod core;
pub mod sync;
pub mod uv;
