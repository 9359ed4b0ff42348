//! Inference of paper origin and screening status from a category name
//!
//! Highlight categories are free text chosen by the researcher ("Seed",
//! "Backward - included", "Forward excl."). Both English and Portuguese
//! stems are recognized.

use crate::paper::{PaperOrigin, PaperStatus};

/// Derive the snowballing origin and status from a category label
pub fn infer_from_category(category: &str) -> (PaperOrigin, PaperStatus) {
    let c = category.to_lowercase();

    let origin = if c.contains("seed") || c.contains("semente") {
        PaperOrigin::Seed
    } else if c.contains("back") || c.contains("refer") {
        PaperOrigin::Backward
    } else if c.contains("forw") || c.contains("cita") {
        PaperOrigin::Forward
    } else {
        PaperOrigin::Unknown
    };

    let status = if c.contains("incl") {
        PaperStatus::Included
    } else if c.contains("excl") {
        PaperStatus::Excluded
    } else if c.contains("duplic") {
        PaperStatus::Duplicate
    } else {
        PaperStatus::Pending
    };

    (origin, status)
}
