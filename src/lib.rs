//! CertForge Core - Certificate Template Engine
//!
//! # Guarantees
//! 1. Templates Are All-Or-Nothing
//! 2. The Template Decides The Output Fields
//! 3. Hidden Values Never Leak
//! 4. Image References Resolve To One Canonical Path
//! 5. One Bad Row Never Aborts A Batch

pub mod locator;
pub mod image;
pub mod templates;
pub mod convert;
pub mod validation;
pub mod merge;
pub mod pipeline;

pub use locator::StaticRoots;
pub use image::{ImageFetcher, ImageResolver, ImageSource, HttpFetcher};
pub use templates::{Template, TemplateDoc, Field, FieldKind, FieldType, FieldValue, Value, Submission, Certificate, CertificateDraft};
pub use validation::{TemplateValidator, ValidationError, PlaceholderRule};
pub use merge::{CertificateMerger, DefaultValues};
pub use pipeline::{BatchIngestor, BatchReport, IngestError, Row};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
