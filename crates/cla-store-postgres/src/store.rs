//! Postgres implementation of the `DocumentStore` port.
//!
//! Every document is one row of `cla_store.documents` with its fields in a
//! JSONB column. Filters translate to JSONB containment so the GIN index
//! serves them. Single-document updates lock the matched row with
//! `FOR UPDATE` and write it back in the same transaction; a concurrent
//! updater blocks on the row lock and re-evaluates its filter against the
//! committed version, so guards such as "no element matches" stay atomic
//! with the write they protect.
//!
//! All SQL is runtime-checked (sqlx::query, not sqlx::query!).

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use cla_store::document::*;
use cla_store::error::DbError;
use cla_store::store::{DocumentStore, Result};

const SCHEMA_SQL: &str = include_str!("../migrations/001_documents.sql");

type Row = (Uuid, Value);

/// Postgres-backed document store.
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema, table and indexes when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        info!("cla_store schema ready");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await.map_err(|e| anyhow!(e))?)
    }

    /// Serialize create-if-absent and upsert paths of one collection; row
    /// locks cannot cover a row that does not exist yet.
    async fn lock_collection(
        tx: &mut Transaction<'static, Postgres>,
        collection: &str,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("cla_store.documents/{collection}"))
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn insert_row(
        tx: &mut Transaction<'static, Postgres>,
        collection: &str,
        fields: Fields,
    ) -> Result<DocId> {
        let id = DocId::generate();
        sqlx::query("INSERT INTO cla_store.documents (id, collection, doc) VALUES ($1, $2, $3)")
            .bind(id.0)
            .bind(collection)
            .bind(Value::Object(fields))
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(id)
    }

    /// The first row matching `filter`, locked until the transaction ends.
    async fn select_for_update(
        tx: &mut Transaction<'static, Postgres>,
        collection: &str,
        filter: &DocFilter,
    ) -> Result<Option<Row>> {
        let mut qb = QueryBuilder::new("SELECT id, doc FROM cla_store.documents");
        push_where(&mut qb, collection, filter);
        qb.push(" ORDER BY seq LIMIT 1 FOR UPDATE");
        Ok(qb
            .build_query_as::<Row>()
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?)
    }

    async fn write_doc(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
        fields: Fields,
    ) -> Result<()> {
        sqlx::query("UPDATE cla_store.documents SET doc = $2 WHERE id = $1")
            .bind(id)
            .bind(Value::Object(fields))
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<()> {
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

// ── Filter translation ──

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, collection: &str, filter: &DocFilter) {
    qb.push(" WHERE collection = ");
    qb.push_bind(collection.to_string());
    for cond in filter.conds() {
        qb.push(" AND ");
        push_cond(qb, cond);
    }
}

fn push_cond(qb: &mut QueryBuilder<'_, Postgres>, cond: &Cond) {
    match cond {
        Cond::IdEq(id) => {
            qb.push("id = ");
            qb.push_bind(id.0);
        }
        Cond::IdIn(ids) => {
            qb.push("id = ANY(");
            qb.push_bind(ids.iter().map(|id| id.0).collect::<Vec<Uuid>>());
            qb.push(")");
        }
        Cond::Eq(field, value) => {
            let mut probe = Fields::new();
            probe.insert(field.clone(), value.clone());
            qb.push("doc @> ");
            qb.push_bind(Value::Object(probe));
        }
        Cond::In(field, values) => {
            qb.push("jsonb_build_array(doc -> ");
            qb.push_bind(field.clone());
            qb.push(") <@ ");
            qb.push_bind(Value::Array(values.clone()));
        }
        Cond::ElemMatch {
            array,
            elem,
            exists,
        } => {
            if !exists {
                qb.push("NOT ");
            }
            qb.push("(");
            push_array_of(qb, array);
            qb.push(" @> ");
            qb.push_bind(Value::Array(vec![elem.to_json()]));
            qb.push(")");
        }
    }
}

/// `doc -> array` when it is an array, else an empty one.
fn push_array_of(qb: &mut QueryBuilder<'_, Postgres>, array: &str) {
    qb.push("(CASE WHEN jsonb_typeof(doc -> ");
    qb.push_bind(array.to_string());
    qb.push(") = 'array' THEN doc -> ");
    qb.push_bind(array.to_string());
    qb.push(" ELSE '[]'::jsonb END)");
}

fn to_document((id, doc): Row) -> Result<Document> {
    match doc {
        Value::Object(fields) => Ok(Document::new(DocId(id), fields)),
        _ => Err(DbError::System(anyhow!("document {id} is not an object"))),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_one(&self, collection: &str, fields: Fields) -> Result<DocId> {
        let mut tx = self.begin().await?;
        let id = Self::insert_row(&mut tx, collection, fields).await?;
        Self::commit(tx).await?;
        Ok(id)
    }

    async fn insert_if_absent(
        &self,
        collection: &str,
        filter: &DocFilter,
        fields: Fields,
    ) -> Result<Option<DocId>> {
        let mut tx = self.begin().await?;
        Self::lock_collection(&mut tx, collection).await?;
        if Self::select_for_update(&mut tx, collection, filter)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let id = Self::insert_row(&mut tx, collection, fields).await?;
        Self::commit(tx).await?;
        Ok(Some(id))
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &DocFilter,
        fields: Fields,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        let mut tx = self.begin().await?;
        if upsert {
            Self::lock_collection(&mut tx, collection).await?;
        }
        let outcome = match Self::select_for_update(&mut tx, collection, filter).await? {
            Some((id, _)) => {
                Self::write_doc(&mut tx, id, fields).await?;
                ReplaceOutcome {
                    matched: 1,
                    upserted: None,
                }
            }
            None if upsert => ReplaceOutcome {
                matched: 0,
                upserted: Some(Self::insert_row(&mut tx, collection, fields).await?),
            },
            None => ReplaceOutcome::default(),
        };
        Self::commit(tx).await?;
        Ok(outcome)
    }

    async fn delete_many(&self, collection: &str, filter: &DocFilter) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM cla_store.documents");
        push_where(&mut qb, collection, filter);
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &DocFilter,
        update: &Update,
    ) -> Result<UpdateOutcome> {
        let mut tx = self.begin().await?;
        let Some((id, doc)) = Self::select_for_update(&mut tx, collection, filter).await? else {
            return Ok(UpdateOutcome::default());
        };
        let mut fields = to_document((id, doc))?.fields;

        let applied = update.apply(&mut fields)?;
        if applied.modified {
            Self::write_doc(&mut tx, id, fields).await?;
        }
        Self::commit(tx).await?;
        debug!(collection, %id, modified = applied.modified, "pg update_one");

        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(applied.modified),
            removed: applied.removed,
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: &DocFilter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let mut qb = QueryBuilder::new("SELECT id, doc FROM cla_store.documents");
        push_where(&mut qb, collection, filter);
        qb.push(" ORDER BY seq");
        let rows = qb
            .build_query_as::<Row>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|row| {
                let doc = to_document(row)?;
                Ok(Document::new(doc.id, projection.apply(&doc.fields)))
            })
            .collect()
    }

    async fn count_array_elems(
        &self,
        collection: &str,
        filter: &DocFilter,
        array: &str,
        elem: &ElemFilter,
    ) -> Result<u64> {
        let mut qb = QueryBuilder::new(
            "SELECT COUNT(*) FROM cla_store.documents CROSS JOIN LATERAL jsonb_array_elements(",
        );
        push_array_of(&mut qb, array);
        qb.push(") AS e(elem)");
        push_where(&mut qb, collection, filter);
        qb.push(" AND e.elem @> ");
        qb.push_bind(elem.to_json());

        let (count,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sql_of(filter: &DocFilter) -> String {
        let mut qb = QueryBuilder::new("SELECT id, doc FROM cla_store.documents");
        push_where(&mut qb, "links", filter);
        qb.sql().to_string()
    }

    #[test]
    fn empty_filter_scopes_to_collection() {
        assert_eq!(
            sql_of(&DocFilter::new()),
            "SELECT id, doc FROM cla_store.documents WHERE collection = $1"
        );
    }

    #[test]
    fn conditions_are_bound_not_inlined() {
        let sql = sql_of(
            &DocFilter::new()
                .eq("link_id", "l'1")
                .no_elem_match("signings", ElemFilter::new().with("email", "a@x.com")),
        );
        assert!(!sql.contains("l'1"));
        assert!(!sql.contains("a@x.com"));
        assert!(sql.contains("doc @> $2"));
        assert!(sql.contains("NOT ("));
    }

    #[test]
    fn non_object_row_is_a_system_error() {
        let err = to_document((Uuid::new_v4(), json!([1]))).unwrap_err();
        assert!(matches!(err, DbError::System(_)));
    }
}
