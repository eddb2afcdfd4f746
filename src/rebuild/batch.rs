use tracing::{debug, info};

use super::RebuildError;
use crate::index::SeriesIndex;
use crate::series::{self, Tags};

/// Parallel key/name/tags vectors flushed to the index in one call.
#[derive(Debug)]
pub struct SeriesBatch {
    keys: Vec<Vec<u8>>,
    names: Vec<Vec<u8>>,
    tags: Vec<Tags>,
    batch_size: usize,
    verbose: bool,
    flushes: usize,
}

impl SeriesBatch {
    pub fn new(batch_size: usize, verbose: bool) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            keys: Vec::with_capacity(batch_size),
            names: Vec::with_capacity(batch_size),
            tags: Vec::with_capacity(batch_size),
            batch_size,
            verbose,
            flushes: 0,
        }
    }

    /// Queue the series of a series+field key, flushing when the batch
    /// fills up.
    pub fn add<I: SeriesIndex + ?Sized>(
        &mut self,
        index: &mut I,
        composite_key: &[u8],
    ) -> Result<(), RebuildError> {
        let (series_key, _field) = series::series_and_field(composite_key);
        let (name, tags) = series::parse_key(series_key);
        if self.verbose {
            info!(
                name = %String::from_utf8_lossy(&name),
                tags = %tags,
                "series"
            );
        }

        self.keys.push(series_key.to_vec());
        self.names.push(name);
        self.tags.push(tags);
        if self.keys.len() >= self.batch_size {
            self.flush(index)?;
        }
        Ok(())
    }

    /// Insert queued series, if any.
    pub fn flush<I: SeriesIndex + ?Sized>(&mut self, index: &mut I) -> Result<(), RebuildError> {
        if self.keys.is_empty() {
            return Ok(());
        }
        index
            .create_series_list_if_not_exists(&self.keys, &self.names, &self.tags)
            .map_err(RebuildError::CreateSeries)?;
        self.flushes += 1;
        if self.verbose {
            info!(series = self.keys.len(), "batch inserted");
        } else {
            debug!(series = self.keys.len(), "batch inserted");
        }
        self.keys.clear();
        self.names.clear();
        self.tags.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert calls made so far.
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}
