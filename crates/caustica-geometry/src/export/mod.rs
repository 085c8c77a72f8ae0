//! Export writers for surfaces and transport maps.
//!
//! - **OBJ** — Watertight solid built from the height field
//! - **OFF** — Grid mesh over arbitrary vertex positions (transport maps)
//! - **EPS** — Point plots of a redistributed tile

pub mod eps;
pub mod obj;
pub mod off;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use eps::write_points_eps;
pub use obj::write_solid_obj;
pub use off::write_grid_off;

/// Errors while writing an export file.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid export parameter: {0}")]
    InvalidParameter(String),
}

/// Create `path` (and its parent directories) and hand a buffered writer to `write`.
pub fn write_file<F>(path: &Path, write: F) -> Result<(), ExportError>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    write(&mut writer).map_err(io_err)?;
    std::io::Write::flush(&mut writer).map_err(io_err)?;
    log::debug!("wrote {}", path.display());
    Ok(())
}
