//! Durable folio sequence shared by every desk writing one database.

use super::SqliteJournal;
use crate::{error::DeskResult, operation::FolioSequence};
use chrono::NaiveDate;
use std::sync::Arc;

/// Folio counters kept in the `folio_sequence` table. Each call is one
/// `INSERT … ON CONFLICT DO UPDATE … RETURNING` statement, so two desks
/// sharing the file never issue the same number.
pub struct SqliteFolioSequence {
    journal: Arc<SqliteJournal>,
}

impl SqliteFolioSequence {
    pub fn new(journal: Arc<SqliteJournal>) -> Self {
        Self { journal }
    }
}

impl FolioSequence for SqliteFolioSequence {
    fn next(&self, prefix: &str, date: NaiveDate) -> DeskResult<u64> {
        self.journal
            .next_folio_seq(prefix, &date.format("%Y-%m-%d").to_string())
    }
}
