//! Shared primitive types used across the entire desk.

use chrono::{DateTime, Utc};

/// A stable, unique identifier for any entity on the desk.
pub type EntityId = String;

/// Wall-clock instant. All stored timestamps are UTC;
/// local business time is derived through `DeskSettings::utc_offset_minutes`.
pub type Timestamp = DateTime<Utc>;

/// Generate a prefixed entity id, e.g. `cot_2b6f…`.
pub fn new_id(prefix: &str) -> EntityId {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// One page of a paged listing. Pages are 1-based.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items:       Vec<T>,
    pub total:       usize,
    pub page:        usize,
    pub page_size:   usize,
    pub total_pages: usize,
}

impl<T: Clone> Page<T> {
    /// Slice an already-ordered result set into the requested page.
    pub fn from_sorted(all: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total = all.len();
        let total_pages = total.div_ceil(page_size);
        let items = all
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Self { items, total, page, page_size, total_pages }
    }
}
