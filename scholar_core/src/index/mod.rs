//! Local full-text index of previously retrieved records (tantivy).
//!
//! One writer per index, guarded by a mutex; readers never touch it and see
//! the last committed snapshot. The directory is owned through [`IndexLock`].

mod lock;

pub use lock::{IndexLock, LOCK_FILE};

use crate::error::IndexError;
use crate::query::StructuredQuery;
use crate::record::{AccessLevel, ResultRecord, ScholarlyFields, SourceTag};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, Order, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info, warn};

const WRITER_HEAP_BYTES: usize = 50_000_000;
const WRITER_THREADS: usize = 1;
/// Upper bound on hits collected by one search.
pub const MAX_SEARCH_RESULTS: usize = 10_000;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub live_docs: u64,
    pub deleted_docs: u64,
    pub total_docs: u64,
    pub size_bytes: u64,
}

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    source: Field,
    title: Field,
    authors: Field,
    abstract_text: Field,
    journal: Field,
    venue: Field,
    keywords: Field,
    url: Field,
    snippet: Field,
    access: Field,
    publication_date: Field,
    pdf_url: Field,
    retrieved_at: Field,
    relevance: Field,
    doi: Field,
    preprint_id: Field,
    pmid: Field,
    year: Field,
    citation_count: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let fields = Fields {
        id: builder.add_text_field("id", STRING | STORED),
        source: builder.add_text_field("source", STRING | STORED),
        title: builder.add_text_field("title", TEXT | STORED),
        authors: builder.add_text_field("authors", TEXT | STORED),
        abstract_text: builder.add_text_field("abstract", TEXT | STORED),
        journal: builder.add_text_field("journal", TEXT | STORED),
        venue: builder.add_text_field("venue", TEXT | STORED),
        keywords: builder.add_text_field("keywords", TEXT | STORED),
        url: builder.add_text_field("url", STORED),
        snippet: builder.add_text_field("snippet", STORED),
        access: builder.add_text_field("access", STORED),
        publication_date: builder.add_text_field("publication_date", STORED),
        pdf_url: builder.add_text_field("pdf_url", STORED),
        retrieved_at: builder.add_i64_field("retrieved_at", INDEXED | STORED | FAST),
        relevance: builder.add_f64_field("relevance", STORED),
        doi: builder.add_text_field("doi", STRING | STORED),
        preprint_id: builder.add_text_field("preprint_id", STRING | STORED),
        pmid: builder.add_text_field("pmid", STRING | STORED),
        year: builder.add_i64_field("year", INDEXED | STORED | FAST),
        citation_count: builder.add_u64_field("citation_count", STORED | FAST),
    };
    (builder.build(), fields)
}

/// Strip characters that would end a quoted query-parser phrase.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace(['"', '\\'], " ").trim())
}

pub struct LocalIndex {
    path: PathBuf,
    index: Index,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    lock: Mutex<Option<IndexLock>>,
    closed: AtomicBool,
    fields: Fields,
}

impl LocalIndex {
    /// Open or create the index stored in `dir`, taking its lock.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IndexError> {
        let lock = IndexLock::acquire(dir.as_ref())?;
        let path = lock.dir().to_path_buf();
        let (schema, fields) = build_schema();

        let directory = MmapDirectory::open(&path).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, schema)?;
        let writer: IndexWriter = index.writer_with_num_threads(WRITER_THREADS, WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        info!(target: "scholar.index", path = %path.display(), "Opened local index");
        Ok(Self {
            path,
            index,
            reader,
            writer: Mutex::new(Some(writer)),
            lock: Mutex::new(Some(lock)),
            closed: AtomicBool::new(false),
            fields,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> Result<MutexGuard<'_, Option<IndexWriter>>, IndexError> {
        let guard = self.writer.lock().map_err(|_| IndexError::Poisoned)?;
        if guard.is_none() {
            return Err(IndexError::Closed);
        }
        Ok(guard)
    }

    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.is_closed() {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<(), IndexError> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Upsert `records` by identifier; returns how many were written.
    pub fn ingest(&self, records: &[ResultRecord]) -> Result<usize, IndexError> {
        let mut guard = self.writer()?;
        let Some(writer) = guard.as_mut() else {
            return Err(IndexError::Closed);
        };

        let mut written = 0;
        for record in records {
            if record.id.is_empty() {
                debug!(target: "scholar.index", title = %record.title, "Skipping record without id");
                continue;
            }
            writer.delete_term(Term::from_field_text(self.fields.id, &record.id));
            writer.add_document(self.to_document(record))?;
            written += 1;
        }
        self.commit(writer)?;
        debug!(target: "scholar.index", written, "Ingested records");
        Ok(written)
    }

    pub fn ingest_one(&self, record: &ResultRecord) -> Result<(), IndexError> {
        self.ingest(std::slice::from_ref(record)).map(|_| ())
    }

    pub fn delete(&self, id: &str) -> Result<(), IndexError> {
        let mut guard = self.writer()?;
        let Some(writer) = guard.as_mut() else {
            return Err(IndexError::Closed);
        };
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        self.commit(writer)
    }

    pub fn delete_all(&self) -> Result<(), IndexError> {
        let mut guard = self.writer()?;
        let Some(writer) = guard.as_mut() else {
            return Err(IndexError::Closed);
        };
        writer.delete_all_documents()?;
        self.commit(writer)?;
        info!(target: "scholar.index", "Cleared local index");
        Ok(())
    }

    /// Full-text search with the query's filters applied.
    ///
    /// A query with neither terms nor filters lists everything, most recently
    /// retrieved first.
    pub fn search(
        &self,
        query: &StructuredQuery,
        max_results: usize,
    ) -> Result<Vec<ResultRecord>, IndexError> {
        self.ensure_open()?;
        let searcher = self.reader.searcher();
        let live = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
        let limit = max_results.min(live).min(MAX_SEARCH_RESULTS).max(1);
        let clauses = self.build_clauses(query);

        let addresses: Vec<DocAddress> = if clauses.is_empty() {
            searcher
                .search(
                    &AllQuery,
                    &TopDocs::with_limit(limit)
                        .order_by_fast_field::<i64>("retrieved_at", Order::Desc),
                )?
                .into_iter()
                .map(|(_, address)| address)
                .collect()
        } else {
            let boolean = BooleanQuery::new(clauses);
            searcher
                .search(&boolean, &TopDocs::with_limit(limit))?
                .into_iter()
                .map(|(_, address)| address)
                .collect()
        };

        let mut records = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(record) = self.from_document(&doc) {
                records.push(record);
            }
        }
        debug!(target: "scholar.index", count = records.len(), "Local search complete");
        Ok(records)
    }

    fn build_clauses(&self, query: &StructuredQuery) -> Vec<(Occur, Box<dyn Query>)> {
        let f = &self.fields;
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![f.title, f.abstract_text, f.authors, f.keywords, f.journal, f.venue],
        );
        parser.set_field_boost(f.title, 2.0);

        let mut sources: Vec<String> = Vec::new();
        let text = query.combined_terms();
        if !text.trim().is_empty() {
            sources.push(text);
        }
        if let Some(author) = &query.filters.author {
            sources.push(format!("authors:{}", quote(author)));
        }
        if query.filters.has_year_bounds() {
            let from = query.filters.year_from.unwrap_or(0);
            let to = query.filters.year_to.unwrap_or(9999);
            sources.push(format!("year:[{} TO {}]", from, to));
        }
        if let Some(doc_type) = &query.filters.doc_type {
            let value = quote(doc_type);
            sources.push(format!("(venue:{} OR journal:{})", value, value));
        }

        sources
            .into_iter()
            .map(|source| {
                let (parsed, errors) = parser.parse_query_lenient(&source);
                if !errors.is_empty() {
                    debug!(target: "scholar.index", %source, ?errors, "Lenient query parse dropped parts");
                }
                (Occur::Must, parsed)
            })
            .collect()
    }

    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        self.ensure_open()?;
        let searcher = self.reader.searcher();
        let live_docs = searcher.num_docs();
        let (deleted_docs, total_docs) = searcher
            .segment_readers()
            .iter()
            .fold((0u64, 0u64), |(deleted, total), segment| {
                (
                    deleted + u64::from(segment.num_deleted_docs()),
                    total + u64::from(segment.max_doc()),
                )
            });

        let mut size_bytes = 0u64;
        for entry in fs::read_dir(&self.path)? {
            let metadata = entry?.metadata()?;
            if metadata.is_file() {
                size_bytes += metadata.len();
            }
        }

        Ok(IndexStats {
            live_docs,
            deleted_docs,
            total_docs,
            size_bytes,
        })
    }

    /// Merge all searchable segments and collect unused files.
    pub fn optimize(&self) -> Result<(), IndexError> {
        let mut guard = self.writer()?;
        let Some(writer) = guard.as_mut() else {
            return Err(IndexError::Closed);
        };
        let segments = self.index.searchable_segment_ids()?;
        if !segments.is_empty() {
            writer.merge(&segments).wait()?;
        }
        writer.garbage_collect_files().wait()?;
        self.reader.reload()?;
        info!(target: "scholar.index", merged = segments.len(), "Optimized local index");
        Ok(())
    }

    /// Commit, stop the writer and release the directory lock. Later calls
    /// fail with [`IndexError::Closed`].
    pub fn close(&self) -> Result<(), IndexError> {
        let writer = {
            let mut guard = self.writer.lock().map_err(|_| IndexError::Poisoned)?;
            self.closed.store(true, Ordering::SeqCst);
            guard.take()
        };
        let Some(mut writer) = writer else {
            return Ok(());
        };
        let outcome = writer
            .commit()
            .map(|_| ())
            .and_then(|_| writer.wait_merging_threads());
        if let Ok(mut lock) = self.lock.lock() {
            if let Some(mut lock) = lock.take() {
                lock.release();
            }
        }
        info!(target: "scholar.index", path = %self.path.display(), "Closed local index");
        outcome.map_err(IndexError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn to_document(&self, record: &ResultRecord) -> TantivyDocument {
        let f = &self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, &record.id);
        doc.add_text(f.source, record.source.as_str());
        doc.add_text(f.title, &record.title);
        doc.add_text(f.authors, &record.authors);
        doc.add_text(f.url, &record.url);
        doc.add_text(f.snippet, &record.snippet);
        doc.add_text(f.access, record.access.as_str());
        doc.add_i64(f.retrieved_at, record.retrieved_at.timestamp_millis());
        doc.add_f64(f.relevance, record.relevance);

        if let Some(scholarly) = &record.scholarly {
            let optional = [
                (f.abstract_text, &scholarly.abstract_text),
                (f.journal, &scholarly.journal),
                (f.venue, &scholarly.venue),
                (f.doi, &scholarly.doi),
                (f.preprint_id, &scholarly.preprint_id),
                (f.pmid, &scholarly.pmid),
                (f.pdf_url, &scholarly.pdf_url),
            ];
            for (field, value) in optional {
                if let Some(value) = value {
                    doc.add_text(field, value);
                }
            }
            for keyword in &scholarly.keywords {
                doc.add_text(f.keywords, keyword);
            }
            if let Some(date) = scholarly.publication_date {
                doc.add_text(f.publication_date, date.format(DATE_FORMAT).to_string());
                doc.add_i64(f.year, i64::from(chrono::Datelike::year(&date)));
            }
            if let Some(citations) = scholarly.citation_count {
                doc.add_u64(f.citation_count, citations);
            }
        }
        doc
    }

    fn from_document(&self, doc: &TantivyDocument) -> Option<ResultRecord> {
        let f = &self.fields;
        let text = |field: Field| -> Option<String> {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };

        let id = text(f.id)?;
        let source = match text(f.source).as_deref().map(str::parse::<SourceTag>) {
            Some(Ok(source)) => source,
            _ => {
                warn!(target: "scholar.index", %id, "Stored document has no known source");
                return None;
            }
        };
        let retrieved_at = doc
            .get_first(f.retrieved_at)
            .and_then(|v| v.as_i64())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        let relevance = doc
            .get_first(f.relevance)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let authors = text(f.authors).unwrap_or_default();
        let abstract_text = text(f.abstract_text);

        let mut record = ResultRecord::new(source, id, text(f.title).unwrap_or_default())
            .with_url(text(f.url).unwrap_or_default())
            .with_snippet(text(f.snippet).unwrap_or_default())
            .with_access(
                text(f.access)
                    .map(|a| AccessLevel::parse(&a))
                    .unwrap_or_default(),
            )
            .with_retrieved_at(retrieved_at)
            .with_relevance(relevance);

        if !authors.is_empty() || abstract_text.is_some() {
            record = record.with_scholarly(ScholarlyFields {
                doi: text(f.doi),
                preprint_id: text(f.preprint_id),
                pmid: text(f.pmid),
                abstract_text,
                publication_date: text(f.publication_date)
                    .and_then(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT).ok()),
                journal: text(f.journal),
                venue: text(f.venue),
                keywords: doc
                    .get_all(f.keywords)
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect(),
                citation_count: doc.get_first(f.citation_count).and_then(|v| v.as_u64()),
                pdf_url: text(f.pdf_url),
            });
        }
        Some(record.with_authors(authors))
    }
}

impl Drop for LocalIndex {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                warn!(target: "scholar.index", error = %e, "Failed to close index on drop");
            }
        }
    }
}
