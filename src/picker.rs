//! # Picker
//!
//! Stateless selection policy over the source store. A pick drains the
//! user's full record set page by page, ranks records by `hit * multiplier`
//! ascending (fewest effective reads first, so picks rotate), takes the
//! requested number, and returns them oldest-modified first. Each selected
//! record's hit counter is incremented and written back, which is what
//! pushes it down the ranking for the next pick.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use crate::error::{PickError, StoreError};
use crate::store::{Medium, SourceRef, SourceStore};

/// The two store operations a pick needs. Seam for tests.
#[async_trait]
pub trait SourceInventory: Send + Sync {
    async fn get_all_source_data(
        &self,
        user_id: &str,
        page: usize,
    ) -> Result<Vec<Medium>, StoreError>;

    async fn update_source(&self, user_id: &str, record: Medium) -> Result<(), StoreError>;
}

#[async_trait]
impl SourceInventory for SourceStore {
    async fn get_all_source_data(
        &self,
        user_id: &str,
        page: usize,
    ) -> Result<Vec<Medium>, StoreError> {
        SourceStore::get_all_source_data(self, user_id, page)
    }

    async fn update_source(&self, user_id: &str, record: Medium) -> Result<(), StoreError> {
        SourceStore::update_source(self, user_id, record)
    }
}

/// Picks the sources a user should read next.
pub struct Picker<S: SourceInventory> {
    store: Arc<S>,
}

impl<S: SourceInventory> Picker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Select up to `count` sources for `user_id`, oldest-modified first.
    ///
    /// `count` is clamped to the population, so a request larger than the
    /// user's set returns everything. A failed hit write-back aborts the
    /// pick; increments already written stay written.
    pub async fn pick(&self, user_id: &str, count: usize) -> Result<Vec<SourceRef>, PickError> {
        if count < 1 {
            return Err(PickError::InvalidCount);
        }

        let mut all = Vec::new();
        let mut page = 0;
        loop {
            let batch = self
                .store
                .get_all_source_data(user_id, page)
                .await
                .map_err(PickError::Retrieval)?;
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
            page += 1;
        }

        // Lowest score first: under-read and down-weighted sources win.
        all.sort_by(|a, b| score(a).partial_cmp(&score(b)).unwrap_or(Ordering::Equal));
        all.truncate(count.min(all.len()));

        // The caller reads in modification order, not selection order.
        all.sort_by(|a, b| a.modified_date.cmp(&b.modified_date));

        let mut picked = Vec::with_capacity(all.len());
        for mut record in all {
            picked.push(SourceRef::from(&record));
            record.hit += 1;
            self.store
                .update_source(user_id, record)
                .await
                .map_err(PickError::Update)?;
        }

        counter!("picks_total").increment(1);
        Ok(picked)
    }
}

fn score(m: &Medium) -> f32 {
    m.hit as f32 * m.multiplier
}
