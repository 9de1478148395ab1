//! # Entry Client
//!
//! Publishes rated entries and runs the queries the site needs: top ratings, entries
//! per author, pages, and bulk edits over a rating threshold.
use crate::error::SiteError;
use crate::model::{Entry, EntryCreate, EntryUpdate};
use tastytopping::{fields, Resource, ResourceType};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct EntryClient {
    entries: ResourceType,
}

impl EntryClient {
    pub fn new(entries: ResourceType) -> Self {
        Self { entries }
    }

    #[instrument(skip(self))]
    pub fn publish(&self, params: EntryCreate) -> Result<Entry, SiteError> {
        debug!("Sending request");
        let entry = self.entries.new_resource(params.into_fields())?;
        Entry::try_from(&entry)
    }

    /// Publishes every entry in one request. Either all of them land or none do.
    #[instrument(skip(self, params), fields(count = params.len()))]
    pub fn publish_all(&self, params: Vec<EntryCreate>) -> Result<(), SiteError> {
        debug!("Sending request");
        let objects = params.into_iter().map(EntryCreate::into_fields).collect();
        self.entries.create(objects)?;
        Ok(())
    }

    /// The `n` best rated entries, best first.
    #[instrument(skip(self))]
    pub fn top_rated(&self, n: usize) -> Result<Vec<Entry>, SiteError> {
        debug!("Sending request");
        let ranked = self.entries.all().order_by(&["-rating"]);
        let available = ranked.count()?.min(n);
        if available == 0 {
            return Ok(Vec::new());
        }
        ranked
            .slice(None, Some(available as isize), 1)?
            .iter()
            .map(Entry::try_from)
            .collect()
    }

    #[instrument(skip(self, author), fields(author = ?author.peek_uri()))]
    pub fn by_author(&self, author: &Resource) -> Result<Vec<Entry>, SiteError> {
        debug!("Sending request");
        let written = self.entries.filter(fields! { "created_by" => author });
        if !written.exists()? {
            return Ok(Vec::new());
        }
        written.iter()?.map(|entry| Entry::try_from(&entry?)).collect()
    }

    /// One page of entries ordered by path. Pages past the end are empty.
    #[instrument(skip(self))]
    pub fn page(&self, number: usize, size: usize) -> Result<Vec<Entry>, SiteError> {
        debug!("Sending request");
        let ordered = self.entries.all().order_by(&["path"]);
        let total = ordered.count()?;
        let start = number * size;
        if size == 0 || start >= total {
            return Ok(Vec::new());
        }
        let stop = (start + size).min(total);
        ordered
            .slice(Some(start as isize), Some(stop as isize), 1)?
            .iter()
            .map(Entry::try_from)
            .collect()
    }

    /// Applies `update` to every entry rated below `rating`, in one bulk request.
    #[instrument(skip(self))]
    pub fn revise_below(&self, rating: i64, update: EntryUpdate) -> Result<usize, SiteError> {
        debug!("Sending request");
        let low = self.entries.filter(fields! { "rating__lt" => rating });
        let count = low.count()?;
        low.update(update.into_fields())?;
        info!(count, "Entries revised");
        Ok(count)
    }

    #[instrument(skip(self))]
    pub fn purge_below(&self, rating: i64) -> Result<usize, SiteError> {
        debug!("Sending request");
        let low = self.entries.filter(fields! { "rating__lt" => rating });
        let count = low.count()?;
        low.delete()?;
        info!(count, "Entries purged");
        Ok(count)
    }

    pub fn total(&self) -> Result<usize, SiteError> {
        Ok(self.entries.all().count()?)
    }
}
