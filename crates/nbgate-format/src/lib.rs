//! Notebook document model for nbgate.
//!
//! Reads and writes Jupyter `.ipynb` files (nbformat 4) and carries the run
//! annotations nbgate adds to output notebooks.
//!
//! # Architecture
//!
//! ```text
//! input.ipynb ───► Notebook::read_from_file ───► fresh_copy() ───► cells filled by the engine
//!                                                                        │
//!                                                                        ▼
//!                                                  Notebook::write_to_file ───► input_output.ipynb
//! ```

mod annotations;
mod error;
mod notebook;
mod outputs;
mod text;

pub use annotations::{CellRunMetadata, CellStatus, METADATA_KEY, RunMetadata};
pub use error::{FormatError, FormatResult};
pub use notebook::{
    Cell, CodeCell, KernelSpecInfo, NBFORMAT_MAJOR, Notebook, NotebookMetadata, TextCell,
};
pub use outputs::{MimeBundle, Output, OutputCollector};
pub use text::MultilineText;
