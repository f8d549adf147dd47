//! # pages2pdf
//!
//! Assembles downloaded page images into PDFs: one PDF per book chapter,
//! preview or single page.
//!
//! The download step leaves images in a directory tree under a root:
//!
//! - books: `{root}/{book}/{chapter}/page-001.jpg ...`
//! - previews and pages: `{root}/{name}/page-001.jpg ...`
//!
//! Each directory is merged into `{name}.pdf` next to its images. Directories
//! that already hold a PDF are left alone, so a run can be repeated safely.
//!
//! ## Usage
//!
//! ```bash
//! pages2pdf assemble --manifest links.json --root downloads
//! ```

mod assembler;
mod error;
pub mod manifest;
mod pdf_builder;
mod scheduler;
mod unit;

pub use assembler::{assemble, AssemblyOptions, AssemblyOutcome, AssemblyTask, OUTPUT_EXTENSION};
pub use error::{AssemblyError, CodecError};
pub use pdf_builder::ImagePdfBuilder;
pub use scheduler::{RunReport, Scheduler};
pub use unit::{datetime_name, NameRegistry, SubUnit, Unit, UnitError, UnitKind};
