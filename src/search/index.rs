//! # Item Index
//!
//! A RAM tantivy index over six weighted fields. Every query term becomes
//! three clauses per field, each scoring a constant:
//!
//! | clause | weight |
//! |---|---|
//! | exact term | 1.0 |
//! | prefix | 0.6 |
//! | fuzzy (edit distance 1, 2 for long terms) | 0.3 |
//!
//! A document's score is the sum of its matching clauses, each times the
//! field boost. Hits are then reranked with a bonus for a label equal to or
//! starting with the whole query and for a URL starting with it.
//!
//! Only ids are stored in tantivy. The items themselves stay here, in
//! insertion order, which also breaks score ties.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;
use tantivy::collector::TopDocs;
use tantivy::query::{
    BooleanQuery, ConstScoreQuery, FuzzyTermQuery, Occur, Query, TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Value,
};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::{
    Index, IndexReader, IndexWriter, ReloadPolicy, Score, TantivyDocument, TantivyError, Term,
};

use crate::search::item::SearchIndexItem;

const TOKENIZER_NAME: &str = "item";

/// One indexing thread; the smallest budget tantivy accepts is 15 MB.
const WRITER_HEAP_BYTES: usize = 20_000_000;

const EXACT_WEIGHT: Score = 1.0;
const PREFIX_WEIGHT: Score = 0.6;
const FUZZY_WEIGHT: Score = 0.3;

const LABEL_EXACT_BONUS: Score = 10.0;
const LABEL_PREFIX_BONUS: Score = 5.0;
const URL_PREFIX_BONUS: Score = 4.0;

/// Shortest query term that gets fuzzy matching.
const FUZZY_MIN_LEN: usize = 4;

#[derive(Debug)]
pub enum IndexError {
    Tantivy(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Tantivy(msg) => write!(f, "Search index error: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<TantivyError> for IndexError {
    fn from(e: TantivyError) -> Self {
        IndexError::Tantivy(e.to_string())
    }
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Fields {
    id: Field,
    label: Field,
    url: Field,
    keywords: Field,
    sub_label: Field,
    kind: Field,
    route: Field,
}

impl Fields {
    /// Searchable fields and their boosts.
    fn weighted(&self) -> [(Field, Score); 6] {
        [
            (self.label, 3.0),
            (self.url, 2.0),
            (self.keywords, 1.5),
            (self.sub_label, 1.0),
            (self.kind, 1.0),
            (self.route, 0.5),
        ]
    }
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let text = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqs),
    );

    let fields = Fields {
        id: builder.add_text_field("id", STRING | STORED),
        label: builder.add_text_field("label", text.clone()),
        url: builder.add_text_field("url", text.clone()),
        keywords: builder.add_text_field("keywords", text.clone()),
        sub_label: builder.add_text_field("sub_label", text.clone()),
        kind: builder.add_text_field("type", text.clone()),
        route: builder.add_text_field("route", text),
    };
    (builder.build(), fields)
}

/// Lowercased runs of alphanumerics.
fn build_tokenizer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .build()
}

fn constant(query: impl Query + 'static, score: Score) -> (Occur, Box<dyn Query>) {
    (
        Occur::Should,
        Box::new(ConstScoreQuery::new(Box::new(query), score)),
    )
}

// ============================================================================
// Documents
// ============================================================================

/// An item ready to index, with the lowercased label and URL the rerank
/// compares against.
#[derive(Debug, Clone)]
pub struct Document {
    item: SearchIndexItem,
    label: String,
    url: Option<String>,
}

impl Document {
    pub fn prepare(item: SearchIndexItem) -> Self {
        Self {
            label: item.label.to_lowercase(),
            url: item.url().map(str::to_lowercase),
            item,
        }
    }

    pub fn item(&self) -> &SearchIndexItem {
        &self.item
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }

    fn to_tantivy(&self, fields: &Fields) -> TantivyDocument {
        let item = &self.item;
        let mut doc = TantivyDocument::new();
        doc.add_text(fields.id, &item.id);
        doc.add_text(fields.label, &item.label);
        if let Some(url) = item.url() {
            doc.add_text(fields.url, url);
        }
        for keyword in &item.keywords {
            doc.add_text(fields.keywords, keyword);
        }
        if let Some(sub_label) = &item.sub_label {
            doc.add_text(fields.sub_label, sub_label);
        }
        doc.add_text(fields.kind, item.type_name());
        if let Some(route) = item.route() {
            doc.add_text(fields.route, route);
        }
        doc
    }

    fn bonus(&self, whole: &str) -> Score {
        let mut bonus = 0.0;
        if self.label == whole {
            bonus += LABEL_EXACT_BONUS;
        } else if self.label.starts_with(whole) {
            bonus += LABEL_PREFIX_BONUS;
        }
        if self.url.as_deref().is_some_and(|url| url.starts_with(whole)) {
            bonus += URL_PREFIX_BONUS;
        }
        bonus
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub item: SearchIndexItem,
    pub score: Score,
}

// ============================================================================
// Index
// ============================================================================

/// Adds, removes and clears are staged until [`ItemIndex::commit`].
pub struct ItemIndex {
    fields: Fields,
    reader: IndexReader,
    writer: IndexWriter,
    analyzer: TextAnalyzer,
    /// Insertion sequence → document.
    docs: BTreeMap<u64, Document>,
    ids: HashMap<String, u64>,
    next_seq: u64,
}

impl fmt::Debug for ItemIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemIndex")
            .field("documents", &self.ids.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl ItemIndex {
    pub fn new() -> Result<Self, IndexError> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(TOKENIZER_NAME, build_tokenizer());

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;

        Ok(Self {
            fields,
            reader,
            writer,
            analyzer: build_tokenizer(),
            docs: BTreeMap::new(),
            ids: HashMap::new(),
            next_seq: 0,
        })
    }

    /// Stages `doc`, replacing any document with the same id.
    pub fn add(&mut self, doc: Document) -> Result<(), IndexError> {
        self.remove(doc.id());
        self.writer.add_document(doc.to_tantivy(&self.fields))?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(doc.id().to_string(), seq);
        self.docs.insert(seq, doc);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let Some(seq) = self.ids.remove(id) else {
            return false;
        };
        self.docs.remove(&seq);
        self.writer
            .delete_term(Term::from_field_text(self.fields.id, id));
        true
    }

    pub fn clear(&mut self) -> Result<(), IndexError> {
        self.writer.delete_all_documents()?;
        self.docs.clear();
        self.ids.clear();
        Ok(())
    }

    /// Publishes staged changes to searches.
    pub fn commit(&mut self) -> Result<(), IndexError> {
        self.writer.commit()?;
        self.reader.reload()?;
        debug!(
            "Search index committed with {} documents",
            self.reader.searcher().num_docs()
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// Query text split the way indexed text is.
    fn terms(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(stream.token().text.clone());
        }
        terms
    }

    fn build_query(&self, terms: &[String]) -> BooleanQuery {
        let mut clauses = Vec::new();
        for text in terms {
            let length = text.chars().count();
            for (field, boost) in self.fields.weighted() {
                let term = Term::from_field_text(field, text);
                clauses.push(constant(
                    TermQuery::new(term.clone(), IndexRecordOption::Basic),
                    boost * EXACT_WEIGHT,
                ));
                clauses.push(constant(
                    FuzzyTermQuery::new_prefix(term.clone(), 0, true),
                    boost * PREFIX_WEIGHT,
                ));
                if length >= FUZZY_MIN_LEN {
                    let distance = if length >= 8 { 2 } else { 1 };
                    clauses.push(constant(
                        FuzzyTermQuery::new(term, distance, true),
                        boost * FUZZY_WEIGHT,
                    ));
                }
            }
        }
        BooleanQuery::new(clauses)
    }

    /// Ranked hits for `query`, at most `limit`. Sees committed changes only.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError> {
        let terms = self.terms(query);
        if terms.is_empty() || self.docs.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        // Every match is collected so the rerank sees all of them
        let matches = searcher.search(
            &self.build_query(&terms),
            &TopDocs::with_limit(self.docs.len()),
        )?;

        let whole = query.trim().to_lowercase();
        let mut ranked: Vec<(u64, Score)> = Vec::with_capacity(matches.len());
        for (score, address) in matches {
            let stored: TantivyDocument = searcher.doc(address)?;
            let Some(seq) = stored
                .get_first(self.fields.id)
                .and_then(|value| value.as_str())
                .and_then(|id| self.ids.get(id))
            else {
                continue;
            };
            let Some(doc) = self.docs.get(seq) else {
                continue;
            };
            ranked.push((*seq, score + doc.bonus(&whole)));
        }

        ranked.sort_by(|(a_seq, a), (b_seq, b)| {
            b.partial_cmp(a)
                .unwrap_or(Ordering::Equal)
                .then(a_seq.cmp(b_seq))
        });
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .filter_map(|(seq, score)| {
                let doc = self.docs.get(&seq)?;
                Some(SearchHit {
                    item: doc.item.clone(),
                    score,
                })
            })
            .collect())
    }
}
