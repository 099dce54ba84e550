//! Signature PDF object store.
//!
//! One document per object in `signature_pdfs`, keyed by (kind, key), holding
//! the base64 payload and its sha256 content hash.

use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbError, DbResultExt, ErrorCode, ModelResult};

pub const SIGNATURE_PDFS: &str = "signature_pdfs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PdfKind {
    /// The org's countersignature page, per link.
    OrgSignature,
    /// The unsigned signature page of a CLA language.
    Blank,
    /// A corporation's signed CLA, per (link, corporation).
    CorpSigning,
}

impl PdfKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::OrgSignature => "org_signature",
            Self::Blank => "blank",
            Self::CorpSigning => "corp_signing",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPdf {
    kind: String,
    key: String,
    hash: String,
    data: String,
}

/// sha256 of `bytes`, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn corp_key(link_id: &str, corp_id: &str) -> String {
    format!("{link_id}/{corp_id}")
}

#[derive(Debug, Clone)]
pub struct PdfRepository {
    pdfs: Collection,
}

impl PdfRepository {
    pub fn new(pdfs: Collection) -> Self {
        Self { pdfs }
    }

    fn filter(kind: PdfKind, key: &str) -> DocFilter {
        DocFilter::new().eq("kind", kind.as_str()).eq("key", key)
    }

    async fn put(&self, kind: PdfKind, key: &str, pdf: &[u8]) -> ModelResult<String> {
        let stored = StoredPdf {
            kind: kind.as_str().to_string(),
            key: key.to_string(),
            hash: content_hash(pdf),
            data: BASE64.encode(pdf),
        };
        self.pdfs
            .new_doc(&Self::filter(kind, key), to_fields(&stored)?)
            .await?;
        debug!(kind = kind.as_str(), key, hash = %stored.hash, "stored pdf");
        Ok(stored.hash)
    }

    async fn get(&self, kind: PdfKind, key: &str, hash: Option<&str>) -> Result<Vec<u8>, DbError> {
        let mut filter = Self::filter(kind, key);
        if let Some(hash) = hash {
            filter = filter.eq("hash", hash);
        }
        let stored: StoredPdf = self
            .pdfs
            .get_doc(&filter, &Projection::all())
            .await?
            .decode()?;
        BASE64
            .decode(stored.data)
            .map_err(|e| DbError::System(anyhow!("corrupt pdf {key}: {e}")))
    }

    async fn hash_of(&self, kind: PdfKind, key: &str) -> Result<Option<String>, DbError> {
        let docs = self
            .pdfs
            .get_docs(&Self::filter(kind, key), &Projection::of(&["hash"]))
            .await?;
        Ok(docs
            .first()
            .and_then(|d| d.str_field("hash"))
            .map(str::to_string))
    }

    // ── Org signature ──

    /// Store the org signature of a link; returns its content hash.
    pub async fn upload_org_signature(&self, link_id: &str, pdf: &[u8]) -> ModelResult<String> {
        self.put(PdfKind::OrgSignature, link_id, pdf).await
    }

    pub async fn download_org_signature(&self, link_id: &str) -> ModelResult<Vec<u8>> {
        self.get(PdfKind::OrgSignature, link_id, None)
            .await
            .or_no_record(ErrorCode::NoDbRecord)
    }

    /// The org signature only if its content still has this hash.
    pub async fn download_org_signature_by_hash(
        &self,
        link_id: &str,
        hash: &str,
    ) -> ModelResult<Vec<u8>> {
        self.get(PdfKind::OrgSignature, link_id, Some(hash))
            .await
            .or_no_record(ErrorCode::NoDbRecord)
    }

    /// Content hash of the current org signature, if one was uploaded.
    pub async fn org_signature_hash(&self, link_id: &str) -> ModelResult<Option<String>> {
        Ok(self.hash_of(PdfKind::OrgSignature, link_id).await?)
    }

    // ── Blank signature ──

    pub async fn upload_blank_signature(&self, language: &str, pdf: &[u8]) -> ModelResult<String> {
        self.put(PdfKind::Blank, language, pdf).await
    }

    pub async fn download_blank_signature(&self, language: &str) -> ModelResult<Vec<u8>> {
        self.get(PdfKind::Blank, language, None)
            .await
            .or_no_record(ErrorCode::NoDbRecord)
    }

    // ── Corporation signing ──

    pub(crate) async fn upload_corp_signing(
        &self,
        link_id: &str,
        corp_id: &str,
        pdf: &[u8],
    ) -> ModelResult<String> {
        self.put(PdfKind::CorpSigning, &corp_key(link_id, corp_id), pdf)
            .await
    }

    pub(crate) async fn download_corp_signing(
        &self,
        link_id: &str,
        corp_id: &str,
    ) -> Result<Vec<u8>, DbError> {
        self.get(PdfKind::CorpSigning, &corp_key(link_id, corp_id), None)
            .await
    }
}
