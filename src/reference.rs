// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A concrete [`ReferenceProvider`] over an indexed FASTA file, caching
//! recently fetched windows the way the calling code's own
//! `reference::Buffer` caches recently fetched contigs: adjacent reads
//! on the same contig tend to request overlapping windows, so a small
//! LRU avoids re-reading the FASTA index for each one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use bio::io::fasta;
use bio_types::genome::Interval;
use lru::LruCache;

use crate::adapter::ReferenceProvider;

/// Window cache capacity: small, since the adapter only ever asks for
/// one window per read and callers typically process reads in
/// coordinate order.
const CACHE_CAPACITY: usize = 8;

pub struct FastaReferenceProvider {
    reader: RefCell<fasta::IndexedReader<File>>,
    contig_lengths: HashMap<String, u64>,
    cache: RefCell<LruCache<Interval, Vec<u8>>>,
}

impl FastaReferenceProvider {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = fasta::IndexedReader::from_file(&path)
            .with_context(|| format!("failed to open indexed FASTA at {:?}", path.as_ref()))?;
        let contig_lengths = reader
            .index
            .sequences()
            .into_iter()
            .map(|seq| (seq.name, seq.len))
            .collect();
        Ok(FastaReferenceProvider {
            reader: RefCell::new(reader),
            contig_lengths,
            cache: RefCell::new(LruCache::new(CACHE_CAPACITY)),
        })
    }
}

impl ReferenceProvider for FastaReferenceProvider {
    fn fetch(&self, contig: &str, start1: u64, stop1: u64) -> Result<Vec<u8>> {
        let key = Interval::new(contig.to_string(), (start1 - 1)..stop1);
        if let Some(cached) = self.cache.borrow_mut().get(&key) {
            return Ok(cached.clone());
        }

        let mut reader = self.reader.borrow_mut();
        reader
            .fetch(contig, start1 - 1, stop1)
            .with_context(|| format!("failed to seek to {}:{}-{}", contig, start1, stop1))?;
        let mut seq = Vec::new();
        reader
            .read(&mut seq)
            .with_context(|| format!("failed to read {}:{}-{}", contig, start1, stop1))?;

        self.cache.borrow_mut().put(key, seq.clone());
        Ok(seq)
    }

    fn contig_length(&self, contig: &str) -> Result<u64> {
        self.contig_lengths
            .get(contig)
            .copied()
            .with_context(|| format!("contig {} not found in reference index", contig))
    }
}
