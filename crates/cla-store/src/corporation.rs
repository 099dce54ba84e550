//! Corporate signing records, embedded in the `signings` array of
//! corporation links. One record per corporation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbResultExt, ErrorCode, ModelError, ModelResult};
use crate::filters::*;
use crate::pdf::PdfRepository;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CorpSigningElem {
    corp_id: String,
    admin_email: String,
    admin_name: String,
    corporation_name: String,
    date: String,
    cla_language: String,
    cla_hash: String,
    org_signature_hash: String,
    signing_info: SigningInfo,
    domains: Vec<String>,
    pdf_uploaded: bool,
}

const SUMMARY_FIELDS: &[&str] = &[
    "cla_language",
    "admin_email",
    "admin_name",
    "corporation_name",
    "date",
    "pdf_uploaded",
];

fn signings_projection(fields: &[&str]) -> Projection {
    Projection::array_fields(FIELD_SIGNINGS, fields)
}

/// Two addresses belong to the same organization when the last two labels
/// of their domains agree.
pub fn is_similar_emails(email1: &str, email2: &str) -> bool {
    let d1 = corp_id(email1);
    let d2 = corp_id(email2);
    let mut l1 = d1.rsplit('.');
    let mut l2 = d2.rsplit('.');
    let mut shared = 0;
    loop {
        match (l1.next(), l2.next()) {
            (Some(a), Some(b)) if a == b => shared += 1,
            (Some(_), Some(_)) => return shared >= 2,
            _ => return true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorporationSigningRepository {
    links: Collection,
    pdfs: PdfRepository,
}

impl CorporationSigningRepository {
    pub fn new(links: Collection, pdfs: PdfRepository) -> Self {
        Self { links, pdfs }
    }

    /// Record a corporation's signature against the CLA text in `cla`. A
    /// second signature from the same corporation fails with
    /// `no_link_or_resigned`.
    pub async fn sign_as_corporation(
        &self,
        link_id: &str,
        opt: &CorpSigningCreateOpt,
        cla: &ClaInfo,
    ) -> ModelResult<()> {
        let corp = corp_id(&opt.admin_email);
        let elem = CorpSigningElem {
            corp_id: corp.clone(),
            admin_email: opt.admin_email.clone(),
            admin_name: opt.admin_name.clone(),
            corporation_name: opt.corporation_name.clone(),
            date: if opt.date.is_empty() {
                today()
            } else {
                opt.date.clone()
            },
            cla_language: opt.cla_language.clone(),
            cla_hash: cla.cla_hash.clone(),
            org_signature_hash: cla.org_signature_hash.clone(),
            signing_info: opt.signing_info.clone(),
            domains: vec![corp.clone()],
            pdf_uploaded: false,
        };

        let filter = doc_filter_of_link(link_id)
            .no_elem_match(FIELD_SIGNINGS, elem_filter_of_corp_signing(&opt.admin_email));
        self.links
            .push_array_elem(FIELD_SIGNINGS, &filter, to_fields(&elem)?)
            .await
            .or_no_record(ErrorCode::NoLinkOrResigned)?;

        info!(link_id, corp_id = %corp, "corporation signed");
        Ok(())
    }

    async fn signings_of_link(
        &self,
        link_id: &str,
        elem: &ElemFilter,
        fields: &[&str],
    ) -> ModelResult<Option<Document>> {
        let docs = self
            .links
            .get_array_elem(
                FIELD_SIGNINGS,
                &doc_filter_of_link(link_id),
                Some(elem),
                &signings_projection(fields),
            )
            .await?;
        Ok(docs.into_iter().next())
    }

    /// Signatures on a link, optionally only those in `language`.
    pub async fn list_corporation_signings(
        &self,
        link_id: &str,
        language: Option<&str>,
    ) -> ModelResult<Vec<CorporationSigningSummary>> {
        let mut elem = ElemFilter::new();
        if let Some(language) = language.filter(|l| !l.is_empty()) {
            elem.insert(FIELD_CLA_LANGUAGE, language);
        }
        let doc = self
            .signings_of_link(link_id, &elem, SUMMARY_FIELDS)
            .await?
            .ok_or_else(|| ModelError::new(ErrorCode::NoLink, format!("no link {link_id}")))?;
        Ok(doc.decode_array(FIELD_SIGNINGS)?)
    }

    async fn corp_signing<T: serde::de::DeserializeOwned>(
        &self,
        link_id: &str,
        email: &str,
        fields: &[&str],
    ) -> ModelResult<T> {
        let unsigned = || {
            ModelError::new(
                ErrorCode::NoLinkOrUnsigned,
                format!("{} has not signed link {link_id}", corp_id(email)),
            )
        };
        let doc = self
            .signings_of_link(link_id, &elem_filter_of_corp_signing(email), fields)
            .await?
            .ok_or_else(unsigned)?;
        doc.decode_array::<T>(FIELD_SIGNINGS)?
            .into_iter()
            .next()
            .ok_or_else(unsigned)
    }

    pub async fn get_corporation_signing_summary(
        &self,
        link_id: &str,
        email: &str,
    ) -> ModelResult<CorporationSigningSummary> {
        self.corp_signing(link_id, email, SUMMARY_FIELDS).await
    }

    pub async fn get_corporation_signing_detail(
        &self,
        link_id: &str,
        email: &str,
    ) -> ModelResult<CorporationSigningDetail> {
        let mut fields = SUMMARY_FIELDS.to_vec();
        fields.extend(["signing_info", "cla_hash", "org_signature_hash"]);
        self.corp_signing(link_id, email, &fields).await
    }

    /// The CLA text a corporation already committed to for `language`, if
    /// any corporation has signed in that language.
    pub async fn get_cla_info_signed(
        &self,
        link_id: &str,
        language: &str,
    ) -> ModelResult<Option<ClaInfo>> {
        let doc = self
            .signings_of_link(
                link_id,
                &ElemFilter::new().with(FIELD_CLA_LANGUAGE, language),
                &["cla_language", "cla_hash", "org_signature_hash"],
            )
            .await?
            .ok_or_else(|| ModelError::new(ErrorCode::NoLink, format!("no link {link_id}")))?;
        Ok(doc.decode_array::<ClaInfo>(FIELD_SIGNINGS)?.into_iter().next())
    }

    // ── Email domains ──

    /// Allow employees of `sub_email`'s domain under the corporation of
    /// `admin_email`. The domain must share its last two labels with the
    /// admin's.
    pub async fn add_corp_email_domain(
        &self,
        link_id: &str,
        admin_email: &str,
        sub_email: &str,
    ) -> ModelResult<()> {
        check_email_format(sub_email)?;
        if !is_similar_emails(admin_email, sub_email) {
            return Err(ModelError::new(
                ErrorCode::UnmatchedEmailDomain,
                format!("{} is not a domain of {}", corp_id(sub_email), corp_id(admin_email)),
            ));
        }

        let elem = elem_filter_of_corp_signing(admin_email);
        let filter = doc_filter_of_link(link_id).elem_match(FIELD_SIGNINGS, elem.clone());
        self.links
            .add_to_array_elem_set(
                FIELD_SIGNINGS,
                &filter,
                &elem,
                FIELD_DOMAINS,
                Value::from(corp_id(sub_email)),
                false,
            )
            .await
            .or_no_record(ErrorCode::NoLinkOrUnsigned)
    }

    pub async fn get_corp_signing_email_domains(
        &self,
        link_id: &str,
        admin_email: &str,
    ) -> ModelResult<Vec<String>> {
        #[derive(Deserialize)]
        struct Domains {
            #[serde(default)]
            domains: Vec<String>,
        }
        let doc = self
            .signings_of_link(link_id, &elem_filter_of_corp_signing(admin_email), &[FIELD_DOMAINS])
            .await?
            .ok_or_else(|| ModelError::new(ErrorCode::NoLink, format!("no link {link_id}")))?;
        Ok(doc
            .decode_array::<Domains>(FIELD_SIGNINGS)?
            .into_iter()
            .next()
            .map(|d| d.domains)
            .unwrap_or_default())
    }

    // ── Signed PDFs ──

    /// Store the corporation's signed CLA and mark its record as uploaded.
    pub async fn upload_corporation_signing_pdf(
        &self,
        link_id: &str,
        admin_email: &str,
        pdf: &[u8],
    ) -> ModelResult<()> {
        let elem = elem_filter_of_corp_signing(admin_email);
        let filter = doc_filter_of_link(link_id);
        if !self
            .links
            .array_elem_exists(FIELD_SIGNINGS, &filter, &elem)
            .await?
        {
            return Err(ModelError::new(
                ErrorCode::NoLinkOrUnsigned,
                format!("{} has not signed link {link_id}", corp_id(admin_email)),
            ));
        }

        self.pdfs
            .upload_corp_signing(link_id, &corp_id(admin_email), pdf)
            .await?;

        let mut fields = Fields::new();
        fields.insert(FIELD_PDF_UPLOADED.into(), Value::Bool(true));
        self.links
            .update_array_elem(
                FIELD_SIGNINGS,
                &filter.elem_match(FIELD_SIGNINGS, elem.clone()),
                &elem,
                fields,
                false,
            )
            .await
            .or_no_record(ErrorCode::NoLinkOrUnsigned)
    }

    pub async fn download_corporation_signing_pdf(
        &self,
        link_id: &str,
        email: &str,
    ) -> ModelResult<Vec<u8>> {
        self.pdfs
            .download_corp_signing(link_id, &corp_id(email))
            .await
            .or_no_record(ErrorCode::NoDbRecord)
    }

    pub async fn is_corp_signing_pdf_uploaded(&self, link_id: &str, email: &str) -> ModelResult<bool> {
        let elem = elem_filter_of_corp_signing(email).with(FIELD_PDF_UPLOADED, true);
        Ok(self
            .links
            .array_elem_exists(FIELD_SIGNINGS, &doc_filter_of_link(link_id), &elem)
            .await?)
    }

    /// Corporation ids whose signed PDF is on file.
    pub async fn list_corps_with_pdf_uploaded(&self, link_id: &str) -> ModelResult<Vec<String>> {
        let elem = ElemFilter::new().with(FIELD_PDF_UPLOADED, true);
        let Some(doc) = self
            .signings_of_link(link_id, &elem, &[FIELD_CORP_ID])
            .await?
        else {
            return Ok(vec![]);
        };
        Ok(doc
            .array(FIELD_SIGNINGS)
            .iter()
            .filter_map(|e| e.get(FIELD_CORP_ID).and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }
}
