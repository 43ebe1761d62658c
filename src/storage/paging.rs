//! Keyset pagination over storage reads
//!
//! Large result sets are read in bounded chunks. Each chunk is requested with
//! the key of the last row already seen, so rows written between chunks never
//! shift the window and nothing is skipped or repeated.

use crate::storage::StorageResult;

/// Drives chunked reads of one query
///
/// A chunk shorter than the page size (or an empty one) ends the iteration.
#[derive(Debug, Clone)]
pub struct Pager<K> {
    after: Option<K>,
    page_size: usize,
    exhausted: bool,
}

impl<K> Pager<K> {
    pub fn new(page_size: usize) -> Self {
        Self {
            after: None,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches the next chunk
    ///
    /// # Arguments
    ///
    /// * `fetch` - Runs the query given the last key seen and the page size
    /// * `key_of` - Extracts the pagination key from a row
    ///
    /// # Returns
    ///
    /// * `Ok(Some(rows))` - A non-empty chunk
    /// * `Ok(None)` - No rows left
    pub fn next_page<T, F, G>(&mut self, fetch: F, key_of: G) -> StorageResult<Option<Vec<T>>>
    where
        F: FnOnce(Option<&K>, usize) -> StorageResult<Vec<T>>,
        G: Fn(&T) -> K,
    {
        if self.exhausted {
            return Ok(None);
        }

        let chunk = fetch(self.after.as_ref(), self.page_size)?;

        if chunk.len() < self.page_size {
            self.exhausted = true;
        }

        match chunk.last() {
            Some(last) => {
                self.after = Some(key_of(last));
                Ok(Some(chunk))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }
}
