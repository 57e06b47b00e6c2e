use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{DocId, Index, IndexReader, IndexWriter, Score, SegmentReader, TantivyDocument};

use super::backend::{BackendHits, BackendQuery, DocumentPatch, IndexBackend};
use crate::context::RequestContext;
use crate::error::{SearchError, SearchResult};
use crate::model::IndexDocument;
use crate::model::types::document_id;

const SCHEMA_VERSION: &str = "v2";

/// Default writer heap, shared by all indexing threads.
pub const DEFAULT_WRITER_HEAP: usize = 50_000_000;

#[derive(Clone, Copy)]
pub struct Fields {
    pub id: Field,
    pub space_id: Field,
    pub item_id: Field,
    pub path: Field,
    pub path_ancestors: Field,
    pub name: Field,
    pub content: Field,
    pub tags: Field,
    pub mime_type: Field,
    pub size: Field,
    pub mtime: Field,
    pub trashed: Field,
    pub degraded: Field,
}

/// Embedded tantivy index.
///
/// The writer (and with it the directory lock) is taken on the first write,
/// so read-only handles can share an index another process is writing.
/// Writers are serialized behind one mutex; every write commits and reloads
/// the reader so the next search observes it. Searches never take the lock.
pub struct TantivyBackend {
    index: Index,
    writer: Mutex<Option<IndexWriter>>,
    writer_heap: usize,
    reader: IndexReader,
    fields: Fields,
}

impl TantivyBackend {
    pub fn open_or_create(path: &Path, writer_heap: usize) -> SearchResult<Self> {
        let schema = build_schema();
        std::fs::create_dir_all(path)?;
        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, schema)?
        };
        tracing::info!(path = %path.display(), "opened tantivy index");
        Self::from_index(index, writer_heap)
    }

    /// Volatile index, for tests and benchmarks.
    pub fn in_ram() -> SearchResult<Self> {
        Self::from_index(Index::create_in_ram(build_schema()), DEFAULT_WRITER_HEAP)
    }

    fn from_index(index: Index, writer_heap: usize) -> SearchResult<Self> {
        let fields = fields_from_schema(&index.schema())?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            writer: Mutex::new(None),
            writer_heap,
            reader,
            fields,
        })
    }

    /// Runs `f` with the index writer, opening it on first use.
    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut IndexWriter) -> SearchResult<T>,
    ) -> SearchResult<T> {
        let mut slot = self.writer.lock();
        let writer = match slot.take() {
            Some(writer) => writer,
            None => {
                let writer: IndexWriter = self.index.writer(self.writer_heap)?;
                tracing::debug!(heap = self.writer_heap, "acquired tantivy index writer");
                writer
            }
        };
        f(slot.insert(writer))
    }

    fn to_tantivy(&self, doc: &IndexDocument) -> TantivyDocument {
        let f = &self.fields;
        let mut d = TantivyDocument::default();
        d.add_text(f.id, doc.id());
        d.add_text(f.space_id, &doc.space_id);
        d.add_text(f.item_id, &doc.item_id);
        d.add_text(f.path, &doc.path);
        for ancestor in doc.path_ancestors() {
            d.add_text(f.path_ancestors, ancestor);
        }
        d.add_text(f.name, &doc.name);
        d.add_text(f.content, &doc.content);
        for tag in &doc.tags {
            d.add_text(f.tags, tag);
        }
        d.add_text(f.mime_type, &doc.mime_type);
        d.add_u64(f.size, doc.size);
        d.add_i64(f.mtime, doc.mtime);
        d.add_bool(f.trashed, doc.trashed);
        d.add_bool(f.degraded, doc.degraded);
        d
    }

    fn from_tantivy(&self, doc: &TantivyDocument) -> IndexDocument {
        let f = &self.fields;
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };
        IndexDocument {
            space_id: text(f.space_id),
            item_id: text(f.item_id),
            path: text(f.path),
            name: text(f.name),
            mime_type: text(f.mime_type),
            size: doc.get_first(f.size).and_then(|v| v.as_u64()).unwrap_or(0),
            mtime: doc.get_first(f.mtime).and_then(|v| v.as_i64()).unwrap_or(0),
            tags: doc
                .get_all(f.tags)
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect::<BTreeSet<_>>(),
            content: text(f.content),
            trashed: doc
                .get_first(f.trashed)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            degraded: doc
                .get_first(f.degraded)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }

    fn id_term(&self, space_id: &str, item_id: &str) -> Term {
        Term::from_field_text(self.fields.id, &document_id(space_id, item_id))
    }

    fn lookup(&self, space_id: &str, item_id: &str) -> SearchResult<Option<IndexDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(self.id_term(space_id, item_id), IndexRecordOption::Basic);
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top.first() {
            Some((_, addr)) => {
                let doc: TantivyDocument = searcher.doc(*addr)?;
                Ok(Some(self.from_tantivy(&doc)))
            }
            None => Ok(None),
        }
    }

    /// Writes under an already held writer lock, then commits and reloads.
    fn write_locked(&self, writer: &mut IndexWriter, docs: &[IndexDocument]) -> SearchResult<()> {
        for doc in docs {
            writer.delete_term(self.id_term(&doc.space_id, &doc.item_id));
            writer.add_document(self.to_tantivy(doc))?;
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    fn build_query(&self, q: &BackendQuery) -> SearchResult<Box<dyn Query>> {
        let f = &self.fields;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if !q.query.trim().is_empty() {
            let mut parser = QueryParser::for_index(&self.index, vec![f.name, f.content, f.tags]);
            parser.set_conjunction_by_default();
            clauses.push((Occur::Must, parser.parse_query(&q.query)?));
        } else {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }

        let spaces = q
            .spaces
            .iter()
            .map(|space| {
                (
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(f.space_id, space),
                        IndexRecordOption::Basic,
                    )) as Box<dyn Query>,
                )
            })
            .collect();
        clauses.push((Occur::Must, Box::new(BooleanQuery::new(spaces))));

        if let Some(scope) = &q.path_scope {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(f.path_ancestors, scope),
                    IndexRecordOption::Basic,
                )),
            ));
        }

        if !q.include_trashed {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_bool(f.trashed, false),
                    IndexRecordOption::Basic,
                )),
            ));
        }

        Ok(Box::new(BooleanQuery::new(clauses)))
    }
}

impl IndexBackend for TantivyBackend {
    fn name(&self) -> &'static str {
        "tantivy"
    }

    fn upsert(&self, ctx: &RequestContext, docs: &[IndexDocument]) -> SearchResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        ctx.check()?;
        self.with_writer(|writer| self.write_locked(writer, docs))
    }

    fn get(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
    ) -> SearchResult<Option<IndexDocument>> {
        ctx.check()?;
        self.lookup(space_id, item_id)
    }

    fn patch(
        &self,
        ctx: &RequestContext,
        space_id: &str,
        item_id: &str,
        patch: &DocumentPatch,
    ) -> SearchResult<bool> {
        ctx.check()?;
        // Read-modify-write under the writer lock so concurrent patches of
        // one document cannot drop each other's change.
        self.with_writer(|writer| {
            let Some(mut doc) = self.lookup(space_id, item_id)? else {
                return Ok(false);
            };
            patch.apply(&mut doc);
            self.write_locked(writer, std::slice::from_ref(&doc))?;
            Ok(true)
        })
    }

    fn search(&self, ctx: &RequestContext, q: &BackendQuery) -> SearchResult<BackendHits> {
        ctx.check()?;
        if q.spaces.is_empty() || q.limit == 0 {
            return Ok(BackendHits::default());
        }
        let query = self.build_query(q)?;
        let searcher = self.reader.searcher();
        let top = TopDocs::with_limit(q.limit)
            .and_offset(q.offset)
            .tweak_score(id_tie_break);
        let (top_docs, total) = searcher.search(&query, &(top, Count))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for ((score, _), addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            hits.push((self.from_tantivy(&doc), score));
        }
        Ok(BackendHits {
            hits,
            total: total as u64,
        })
    }

    fn doc_count(&self, ctx: &RequestContext) -> SearchResult<u64> {
        ctx.check()?;
        Ok(self.reader.searcher().num_docs())
    }
}

type TieBreak = Box<dyn FnMut(DocId, Score) -> (Score, Reverse<String>)>;

/// Ranks by score, then by ascending document id so equal scores page
/// stably across segment merges and re-upserts.
fn id_tie_break(segment: &SegmentReader) -> TieBreak {
    let ids = match segment.fast_fields().str("id") {
        Ok(column) => column,
        Err(e) => {
            tracing::warn!(error = %e, "id fast field unreadable, ties fall back to doc order");
            None
        }
    };
    Box::new(move |doc, score| {
        let mut id = String::new();
        if let Some(ids) = &ids {
            let found = ids.term_ords(doc).next().map(|ord| ids.ord_to_str(ord, &mut id));
            if !matches!(found, Some(Ok(true))) {
                id.clear();
            }
        }
        (score, Reverse(id))
    })
}

pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED | FAST);
    schema_builder.add_text_field("space_id", STRING | STORED);
    schema_builder.add_text_field("item_id", STRING | STORED);
    schema_builder.add_text_field("path", STRING | STORED);
    schema_builder.add_text_field("path_ancestors", STRING);
    schema_builder.add_text_field("name", TEXT | STORED);
    schema_builder.add_text_field("content", TEXT | STORED);
    schema_builder.add_text_field("tags", TEXT | STORED);
    schema_builder.add_text_field("mime_type", STRING | STORED);
    schema_builder.add_u64_field("size", STORED);
    schema_builder.add_i64_field("mtime", INDEXED | STORED);
    schema_builder.add_bool_field("trashed", INDEXED | STORED);
    schema_builder.add_bool_field("degraded", STORED);
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> SearchResult<Fields> {
    let field = |name: &str| {
        schema.get_field(name).map_err(|_| {
            SearchError::EngineUnavailable(format!(
                "index schema missing {name}; remove the index directory to rebuild"
            ))
        })
    };
    Ok(Fields {
        id: field("id")?,
        space_id: field("space_id")?,
        item_id: field("item_id")?,
        path: field("path")?,
        path_ancestors: field("path_ancestors")?,
        name: field("name")?,
        content: field("content")?,
        tags: field("tags")?,
        mime_type: field("mime_type")?,
        size: field("size")?,
        mtime: field("mtime")?,
        trashed: field("trashed")?,
        degraded: field("degraded")?,
    })
}

pub fn index_dir(base: &Path) -> SearchResult<PathBuf> {
    let dir = base.join("index").join(SCHEMA_VERSION);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(item: &str, path: &str, content: &str) -> IndexDocument {
        let mut d = IndexDocument {
            space_id: "s1".into(),
            item_id: item.into(),
            content: content.into(),
            mime_type: "text/plain".into(),
            size: content.len() as u64,
            mtime: 10,
            ..IndexDocument::default()
        };
        d.relocate(path);
        d
    }

    fn query(q: &str) -> BackendQuery {
        BackendQuery {
            query: q.into(),
            spaces: vec!["s1".into()],
            limit: 10,
            ..BackendQuery::default()
        }
    }

    #[test]
    fn documents_round_trip_through_stored_fields() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        let mut d = doc("1", "/dir/a.txt", "hello world");
        d.tags.insert("red".into());
        backend.upsert(&ctx, std::slice::from_ref(&d))?;
        assert_eq!(backend.get(&ctx, "s1", "1")?, Some(d));
        assert_eq!(backend.get(&ctx, "s1", "2")?, None);
        Ok(())
    }

    #[test]
    fn repeated_upserts_keep_only_latest() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        backend.upsert(&ctx, &[doc("1", "/a.txt", "first version")])?;
        backend.upsert(&ctx, &[doc("1", "/a.txt", "second version")])?;
        backend.upsert(&ctx, &[doc("1", "/a.txt", "second version")])?;

        assert_eq!(backend.doc_count(&ctx)?, 1);
        assert_eq!(backend.search(&ctx, &query("first"))?.total, 0);
        let hits = backend.search(&ctx, &query("second"))?;
        assert_eq!(hits.total, 1);
        assert_eq!(hits.hits[0].0.content, "second version");
        Ok(())
    }

    #[test]
    fn trashed_documents_hidden_unless_requested() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        backend.upsert(&ctx, &[doc("1", "/a.txt", "needle")])?;
        assert!(backend.patch(&ctx, "s1", "1", &DocumentPatch::Trashed(true))?);

        assert_eq!(backend.search(&ctx, &query("needle"))?.total, 0);
        let mut with_trash = query("needle");
        with_trash.include_trashed = true;
        assert_eq!(backend.search(&ctx, &with_trash)?.total, 1);

        assert!(backend.patch(&ctx, "s1", "1", &DocumentPatch::Trashed(false))?);
        assert_eq!(backend.search(&ctx, &query("needle"))?.total, 1);
        Ok(())
    }

    #[test]
    fn patch_of_unknown_document_reports_false() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        assert!(!backend.patch(&ctx, "s1", "404", &DocumentPatch::Relocate("/x".into()))?);
        assert_eq!(backend.doc_count(&ctx)?, 0);
        Ok(())
    }

    #[test]
    fn scope_filters_by_space_and_subtree() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        let mut other_space = doc("9", "/docs/c.txt", "shared term");
        other_space.space_id = "s2".into();
        backend.upsert(
            &ctx,
            &[
                doc("1", "/docs/a.txt", "shared term"),
                doc("2", "/misc/b.txt", "shared term"),
                other_space,
            ],
        )?;

        assert_eq!(backend.search(&ctx, &query("shared"))?.total, 2);

        let mut scoped = query("shared");
        scoped.path_scope = Some("/docs".into());
        let hits = backend.search(&ctx, &scoped)?;
        assert_eq!(hits.total, 1);
        assert_eq!(hits.hits[0].0.item_id, "1");

        let mut no_spaces = query("shared");
        no_spaces.spaces.clear();
        assert_eq!(backend.search(&ctx, &no_spaces)?.total, 0);
        Ok(())
    }

    #[test]
    fn name_and_tag_fields_are_searchable() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        let mut d = doc("1", "/reports/quarterly.pdf", "");
        d.tags.insert("finance".into());
        backend.upsert(&ctx, &[d])?;
        assert_eq!(backend.search(&ctx, &query("quarterly"))?.total, 1);
        assert_eq!(backend.search(&ctx, &query("tags:finance"))?.total, 1);
        assert_eq!(backend.search(&ctx, &query(""))?.total, 1);
        Ok(())
    }

    #[test]
    fn malformed_query_is_bad_query() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        backend.upsert(&ctx, &[doc("1", "/a.txt", "x")])?;
        let err = backend.search(&ctx, &query("nosuchfield:abc")).unwrap_err();
        assert!(matches!(err, SearchError::BadQuery(_)), "{err:?}");
        Ok(())
    }

    #[test]
    fn offset_pages_through_results() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        let docs: Vec<_> = (0..3)
            .map(|i| doc(&i.to_string(), &format!("/{i}.txt"), "pagination needle"))
            .collect();
        backend.upsert(&ctx, &docs)?;
        let mut page = query("pagination");
        page.limit = 2;
        page.offset = 2;
        let hits = backend.search(&ctx, &page)?;
        assert_eq!(hits.total, 3);
        assert_eq!(hits.hits.len(), 1);
        Ok(())
    }

    #[test]
    fn equal_scores_order_by_document_id() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        for item in ["c", "b", "a"] {
            backend.upsert(&ctx, &[doc(item, &format!("/{item}.txt"), "same words")])?;
        }
        // Re-upserting moves "a" to the newest segment.
        backend.upsert(&ctx, &[doc("a", "/a.txt", "same words")])?;

        for q in ["", "same"] {
            let hits = backend.search(&ctx, &query(q))?;
            let order: Vec<_> = hits.hits.iter().map(|(d, _)| d.item_id.as_str()).collect();
            assert_eq!(order, ["a", "b", "c"], "query {q:?}");
        }

        let mut second_page = query("same");
        second_page.limit = 2;
        second_page.offset = 2;
        let hits = backend.search(&ctx, &second_page)?;
        assert_eq!(hits.hits.len(), 1);
        assert_eq!(hits.hits[0].0.item_id, "c");
        Ok(())
    }

    #[test]
    fn read_only_handle_opens_while_another_writes() -> SearchResult<()> {
        let dir = TempDir::new()?;
        let path = index_dir(dir.path())?;
        let ctx = RequestContext::background();
        let writer = TantivyBackend::open_or_create(&path, DEFAULT_WRITER_HEAP)?;
        writer.upsert(&ctx, &[doc("1", "/a.txt", "shared index")])?;

        let reader = TantivyBackend::open_or_create(&path, DEFAULT_WRITER_HEAP)?;
        let hits = reader.search(&ctx, &query("shared"))?;
        assert_eq!(hits.total, 1);
        assert_eq!(reader.get(&ctx, "s1", "1")?.map(|d| d.path), Some("/a.txt".into()));

        let err = reader
            .upsert(&ctx, &[doc("2", "/b.txt", "second writer")])
            .unwrap_err();
        assert!(matches!(err, SearchError::EngineUnavailable(_)), "{err:?}");
        writer.upsert(&ctx, &[doc("2", "/b.txt", "first writer keeps going")])?;
        Ok(())
    }

    #[test]
    fn degraded_marker_is_stored() -> SearchResult<()> {
        let backend = TantivyBackend::in_ram()?;
        let ctx = RequestContext::background();
        let mut d = doc("1", "/a.pdf", "");
        d.degraded = true;
        backend.upsert(&ctx, &[d])?;
        assert!(backend.get(&ctx, "s1", "1")?.unwrap().degraded);
        Ok(())
    }

    #[test]
    fn on_disk_index_survives_reopen() -> SearchResult<()> {
        let dir = TempDir::new()?;
        let path = index_dir(dir.path())?;
        {
            let backend = TantivyBackend::open_or_create(&path, DEFAULT_WRITER_HEAP)?;
            backend.upsert(&RequestContext::background(), &[doc("1", "/a.txt", "persisted")])?;
        }
        let backend = TantivyBackend::open_or_create(&path, DEFAULT_WRITER_HEAP)?;
        let hits = backend.search(&RequestContext::background(), &query("persisted"))?;
        assert_eq!(hits.total, 1);
        Ok(())
    }
}
