//! Purpose: Keep a notebook's inline dependency manifest in sync with the package manager.
//! Exports: `Synchronizer`, `InitOptions`, `first_free_untitled`, `is_notebook_path`.
//! Role: Composes notebook I/O, manifest location, the script bridge, and `PackageManager`.
//! Invariants: A notebook is read once and written once per operation, only after every step succeeded.
//! Invariants: Only the manifest cell's source changes; other cells and metadata are untouched.
//! Invariants: Notebook-typed flows always persist with the `.ipynb` extension.
//! Invariants: `init` persists before its optional add step; a failing add leaves that notebook behind.
use std::path::{Path, PathBuf};

use crate::core::error::{Error, ErrorKind};
use crate::core::manifest;
use crate::core::notebook::{self, Document};
use crate::core::script::{self, ScopedScript};
use crate::uv::{AddRequest, PackageManager};

pub const NOTEBOOK_EXTENSION: &str = "ipynb";
const UNTITLED_STEM: &str = "Untitled";
const UNTITLED_SLOTS: usize = 100;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InitOptions {
    /// Target notebook; the first free `UntitledN.ipynb` when absent.
    pub path: Option<PathBuf>,
    pub python: Option<String>,
    pub packages: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Synchronizer<P> {
    package_manager: P,
    working_dir: PathBuf,
}

impl<P: PackageManager> Synchronizer<P> {
    pub fn new(package_manager: P) -> Self {
        Self {
            package_manager,
            working_dir: PathBuf::new(),
        }
    }

    /// Base for relative paths and `Untitled` names (process cwd by default).
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn package_manager(&self) -> &P {
        &self.package_manager
    }

    pub fn init(&self, options: InitOptions) -> Result<PathBuf, Error> {
        let InitOptions {
            path,
            python,
            packages,
        } = options;
        let path = match path {
            Some(path) => self.resolve(&path),
            None => first_free_untitled(&self.working_dir)?,
        };
        if !is_notebook_path(&path) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("file must have a `.ipynb` extension")
                .with_path(&path)
                .with_hint("Pass a path like `analysis.ipynb`, or omit it to get Untitled.ipynb."));
        }
        let document = self.new_manifest_document(&path, python.as_deref())?;
        notebook::write(&document, &path)?;

        if !packages.is_empty() {
            let request = AddRequest {
                packages,
                ..AddRequest::default()
            };
            self.add_resolved(&path, request, false)?;
        }
        Ok(path)
    }

    /// Adds dependencies to a notebook's manifest, or directly to a script
    /// when `path` is not a notebook. Returns the path that was written.
    pub fn add(&self, path: &Path, mut request: AddRequest, pin: bool) -> Result<PathBuf, Error> {
        request.requirements = request
            .requirements
            .filter(|file| !file.as_os_str().is_empty())
            .map(|file| self.resolve(&file));
        self.add_resolved(&self.resolve(path), request, pin)
    }

    /// The notebook flow of `add`, regardless of the extension of `path`.
    pub fn add_notebook(&self, path: &Path, request: &AddRequest) -> Result<PathBuf, Error> {
        self.rewrite_manifest(&self.resolve(path), true, |script| {
            self.package_manager.add_to_script(script, request)
        })
    }

    pub fn remove(&self, path: &Path, packages: &[String]) -> Result<PathBuf, Error> {
        let path = self.resolve(path);
        if is_notebook_path(&path) {
            return self.rewrite_manifest(&path, false, |script| {
                self.package_manager.remove_from_script(script, packages)
            });
        }
        self.package_manager.remove_from_script(&path, packages)?;
        Ok(path)
    }

    /// Trimmed manifest cell text, or `None` when the notebook has none.
    pub fn manifest_text(&self, path: &Path) -> Result<Option<String>, Error> {
        let document = notebook::read(&self.resolve(path))?;
        Ok(manifest::find_manifest_cell(&document)
            .map(|index| document.cells[index].source_text().trim().to_string()))
    }

    fn add_resolved(&self, path: &Path, mut request: AddRequest, pin: bool) -> Result<PathBuf, Error> {
        if pin {
            request.packages = self.package_manager.compile_exact_versions(
                &request.packages,
                request.requirements.as_deref(),
                request.exclude_newer.as_deref(),
            )?;
            request.requirements = None;
        }

        if is_notebook_path(path) {
            self.rewrite_manifest(path, true, |script| {
                self.package_manager.add_to_script(script, &request)
            })
        } else {
            self.package_manager.add_to_script(path, &request)?;
            Ok(path.to_path_buf())
        }
    }

    fn new_manifest_document(&self, path: &Path, python: Option<&str>) -> Result<Document, Error> {
        let contents = {
            let script = ScopedScript::empty(&script::parent_dir(path))?;
            self.package_manager.init_script(script.path(), python)?;
            script.read_trimmed()?
        };
        Ok(notebook::new_document(vec![
            notebook::new_code_cell(&contents, true)?,
            notebook::new_code_cell("", false)?,
        ]))
    }

    // read → locate → extract → invoke → reinsert → write. Nothing is written
    // unless every earlier step succeeded.
    fn rewrite_manifest<F>(&self, path: &Path, create: bool, invoke: F) -> Result<PathBuf, Error>
    where
        F: FnOnce(&Path) -> Result<(), Error>,
    {
        let mut document = notebook::read(path)?;
        let cell = if create {
            manifest::locate_or_insert(&mut document)?.1
        } else {
            let index = manifest::find_manifest_cell(&document).ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("notebook has no inline script metadata")
                    .with_path(path)
                    .with_hint("Add a dependency first with `nbscript add`.")
            })?;
            &mut document.cells[index]
        };

        let script = script::extract(cell, &script::parent_dir(path))?;
        invoke(script.path())?;
        script::reinsert(cell, &script)?;
        drop(script);

        let target = path.with_extension(NOTEBOOK_EXTENSION);
        notebook::write(&document, &target)?;
        Ok(target)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.working_dir.join(path)
    }
}

pub fn is_notebook_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(NOTEBOOK_EXTENSION)
}

/// `Untitled.ipynb`, then `Untitled1.ipynb` … `Untitled99.ipynb`.
pub fn first_free_untitled(dir: &Path) -> Result<PathBuf, Error> {
    (0..UNTITLED_SLOTS)
        .map(|index| dir.join(untitled_name(index)))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("could not find an available UntitledX.ipynb")
                .with_path(dir)
                .with_hint("Pass an explicit notebook path.")
        })
}

fn untitled_name(index: usize) -> String {
    if index == 0 {
        format!("{UNTITLED_STEM}.{NOTEBOOK_EXTENSION}")
    } else {
        format!("{UNTITLED_STEM}{index}.{NOTEBOOK_EXTENSION}")
    }
}
