//! Tantivy index over item search text
//!
//! One document per live item, keyed by item id. Upserts replace the previous
//! document under a single writer guard and become visible atomically on commit.
//! Queries are conjunctive over normalized word tokens, optionally restricted
//! to one clipboard.

use crate::config::SearchSettings;
use crate::interface::{ClipboardId, Item, ItemId};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::tokenizer::{
    LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenFilter, TokenStream, Tokenizer,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use thiserror::Error;
use tracing::warn;

pub const TOKENIZER_NAME: &str = "dropmind_words";

/// Dropped at index and query time
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on",
    "or", "our", "she", "so", "such", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "was", "we", "were", "will", "with", "you", "your",
];

/// Token filter that removes tokens shorter than `min_len` characters.
#[derive(Clone)]
struct MinLengthFilter {
    min_len: usize,
}

impl TokenFilter for MinLengthFilter {
    type Tokenizer<T: Tokenizer> = MinLengthFilterWrapper<T>;

    fn transform<T: Tokenizer>(self, tokenizer: T) -> Self::Tokenizer<T> {
        MinLengthFilterWrapper { inner: tokenizer, min_len: self.min_len }
    }
}

#[derive(Clone)]
struct MinLengthFilterWrapper<T> {
    inner: T,
    min_len: usize,
}

impl<T: Tokenizer> Tokenizer for MinLengthFilterWrapper<T> {
    type TokenStream<'a> = MinLengthTokenStream<T::TokenStream<'a>>;

    fn token_stream<'a>(&'a mut self, text: &'a str) -> Self::TokenStream<'a> {
        MinLengthTokenStream {
            inner: self.inner.token_stream(text),
            min_len: self.min_len,
        }
    }
}

struct MinLengthTokenStream<T> {
    inner: T,
    min_len: usize,
}

impl<T: TokenStream> TokenStream for MinLengthTokenStream<T> {
    fn advance(&mut self) -> bool {
        while self.inner.advance() {
            if self.inner.token().text.chars().count() >= self.min_len {
                return true;
            }
        }
        false
    }

    fn token(&self) -> &tantivy::tokenizer::Token {
        self.inner.token()
    }

    fn token_mut(&mut self) -> &mut tantivy::tokenizer::Token {
        self.inner.token_mut()
    }
}

/// Lower-case, split on non-alphanumerics, drop short tokens and stop words
pub fn build_analyzer(settings: &SearchSettings) -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(MinLengthFilter { min_len: settings.min_token_len.max(1) })
        .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|w| w.to_string())))
        .build()
}

fn collect_tokens(analyzer: &mut TextAnalyzer, text: &str) -> BTreeSet<String> {
    let mut stream = analyzer.token_stream(text);
    let mut tokens = BTreeSet::new();
    while let Some(token) = stream.next() {
        tokens.insert(token.text.clone());
    }
    tokens
}

/// Normalized token set of `text`, identical to what the index stores
pub fn tokenize(text: &str, settings: &SearchSettings) -> BTreeSet<String> {
    collect_tokens(&mut build_analyzer(settings), text)
}

/// Error type for indexer operations
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("Directory error: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

/// What the index currently holds for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchIndexEntry {
    pub item_id: ItemId,
    pub clipboard_id: ClipboardId,
    pub tokens: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

/// Tantivy-based indexer with word tokenization
pub struct Indexer {
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    analyzer: TextAnalyzer,
    item_id_field: Field,
    clipboard_id_field: Field,
    tokens_field: Field,
    token_list_field: Field,
    updated_at_field: Field,
}

impl Indexer {
    /// Open or create an indexer at the given path
    pub fn new(path: &Path, settings: &SearchSettings) -> IndexerResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let index = Index::open_or_create(dir, Self::build_schema())?;
        let analyzer = Self::register_tokenizer(&index, settings);

        let writer = index.writer(50_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Ok(Self::from_parts(index, writer, reader, analyzer))
    }

    /// Create an in-memory indexer
    pub fn new_in_memory(settings: &SearchSettings) -> IndexerResult<Self> {
        let index = Index::create_in_ram(Self::build_schema());
        let analyzer = Self::register_tokenizer(&index, settings);

        let writer = index.writer(15_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Ok(Self::from_parts(index, writer, reader, analyzer))
    }

    fn from_parts(index: Index, writer: IndexWriter, reader: IndexReader, analyzer: TextAnalyzer) -> Self {
        let schema = index.schema();
        Self {
            item_id_field: schema.get_field("item_id").unwrap(),
            clipboard_id_field: schema.get_field("clipboard_id").unwrap(),
            tokens_field: schema.get_field("tokens").unwrap(),
            token_list_field: schema.get_field("token_list").unwrap(),
            updated_at_field: schema.get_field("updated_at").unwrap(),
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
            analyzer,
        }
    }

    fn build_schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_i64_field("item_id", STORED | FAST | INDEXED);
        builder.add_i64_field("clipboard_id", STORED | FAST | INDEXED);

        let tokens_indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::Basic);
        builder.add_text_field("tokens", TextOptions::default().set_indexing_options(tokens_indexing));

        // Normalized tokens as indexed, space-joined, for inspection
        builder.add_text_field("token_list", STORED);
        builder.add_i64_field("updated_at", STORED);
        builder.build()
    }

    fn register_tokenizer(index: &Index, settings: &SearchSettings) -> TextAnalyzer {
        let analyzer = build_analyzer(settings);
        index.tokenizers().register(TOKENIZER_NAME, analyzer.clone());
        analyzer
    }

    pub fn tokenize(&self, text: &str) -> BTreeSet<String> {
        collect_tokens(&mut self.analyzer.clone(), text)
    }

    /// Stage an insert-or-replace of the item's document. Visible after `commit`.
    pub fn add_document(&self, item: &Item) -> IndexerResult<()> {
        let tokens = self.tokenize(&item.search_text);
        let writer = self.writer.read();

        // Delete existing document with same ID (upsert semantics)
        writer.delete_term(Term::from_field_i64(self.item_id_field, item.id));

        let mut doc = tantivy::TantivyDocument::default();
        doc.add_i64(self.item_id_field, item.id);
        doc.add_i64(self.clipboard_id_field, item.clipboard_id);
        doc.add_text(self.tokens_field, &item.search_text);
        doc.add_text(self.token_list_field, tokens.into_iter().collect::<Vec<_>>().join(" "));
        doc.add_i64(self.updated_at_field, item.updated_at.timestamp_micros());

        writer.add_document(doc)?;
        Ok(())
    }

    /// Stage removal of an item's document. A missing document is a no-op.
    pub fn delete_document(&self, item_id: ItemId) -> IndexerResult<()> {
        let writer = self.writer.read();
        writer.delete_term(Term::from_field_i64(self.item_id_field, item_id));
        Ok(())
    }

    /// Publish staged changes. On failure they are rolled back, so a later
    /// commit cannot flush them.
    pub fn commit(&self) -> IndexerResult<()> {
        let mut writer = self.writer.write();
        if let Err(e) = writer.commit() {
            Self::discard_staged(&mut writer);
            return Err(e.into());
        }
        drop(writer);
        self.reader.write().reload()?;
        Ok(())
    }

    /// Drop every change staged since the last commit
    pub fn rollback(&self) {
        Self::discard_staged(&mut self.writer.write());
    }

    fn discard_staged(writer: &mut IndexWriter) {
        if let Err(e) = writer.rollback() {
            warn!(error = %e, "Failed to roll back staged index changes");
        }
    }

    /// Insert or replace one item and commit
    pub fn index(&self, item: &Item) -> IndexerResult<()> {
        if let Err(e) = self.add_document(item) {
            self.rollback();
            return Err(e);
        }
        self.commit()
    }

    /// Evict one item and commit
    pub fn remove(&self, item_id: ItemId) -> IndexerResult<()> {
        self.delete_document(item_id)?;
        self.commit()
    }

    /// Evict many items in one commit
    pub fn remove_many(&self, item_ids: &[ItemId]) -> IndexerResult<()> {
        if item_ids.is_empty() {
            return Ok(());
        }
        for id in item_ids {
            self.delete_document(*id)?;
        }
        self.commit()
    }

    /// Ids of items holding every token, within `clipboard` when given.
    /// Order is unspecified; ranking happens on hydrated items.
    pub fn query(&self, tokens: &BTreeSet<String>, clipboard: Option<ClipboardId>) -> IndexerResult<Vec<ItemId>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(self.tokens_field, token);
                (Occur::Must, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
            })
            .collect();
        if let Some(clipboard_id) = clipboard {
            let term = Term::from_field_i64(self.clipboard_id_field, clipboard_id);
            clauses.push((Occur::Must, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>));
        }
        let query = BooleanQuery::new(clauses);

        let reader = self.reader.read();
        let searcher = reader.searcher();
        let addresses = searcher.search(&query, &DocSetCollector)?;

        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: tantivy::TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.item_id_field).and_then(|v| v.as_i64()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// The committed entry for an item, if any
    pub fn entry(&self, item_id: ItemId) -> IndexerResult<Option<SearchIndexEntry>> {
        let reader = self.reader.read();
        let searcher = reader.searcher();
        let query = TermQuery::new(Term::from_field_i64(self.item_id_field, item_id), IndexRecordOption::Basic);
        let Some(address) = searcher.search(&query, &DocSetCollector)?.into_iter().next() else {
            return Ok(None);
        };

        let doc: tantivy::TantivyDocument = searcher.doc(address)?;
        let clipboard_id = doc.get_first(self.clipboard_id_field).and_then(|v| v.as_i64()).unwrap_or(0);
        let tokens = doc
            .get_first(self.token_list_field)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let updated_at = doc
            .get_first(self.updated_at_field)
            .and_then(|v| v.as_i64())
            .and_then(|micros| Utc.timestamp_micros(micros).single())
            .unwrap_or_else(Utc::now);

        Ok(Some(SearchIndexEntry { item_id, clipboard_id, tokens, updated_at }))
    }

    pub fn clear(&self) -> IndexerResult<()> {
        let mut writer = self.writer.write();
        if let Err(e) = writer.delete_all_documents().and_then(|_| writer.commit()) {
            Self::discard_staged(&mut writer);
            return Err(e.into());
        }
        drop(writer);
        self.reader.write().reload()?;
        Ok(())
    }

    /// Get the number of documents in the index
    pub fn num_docs(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }
}
