//! Corporate signing flow.
//!
//! The first corporation to sign a link in a given language fixes which CLA
//! text (and org signature) every later corporate signature in that language
//! is bound to. That read-decide-write sequence runs under the serialization
//! lock of the link's org/repo scope; everything else is lock-free.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cla::ClaRepository;
use crate::corporation::CorporationSigningRepository;
use crate::error::{ErrorCode, ModelError, ModelResult};
use crate::links::LinkRepository;
use crate::lock::{LockKey, LockProvider};
use crate::pdf::{content_hash, PdfRepository};
use crate::types::*;
use crate::verification::{purpose_of_signing, VerificationCodeRepository};

/// A corporate admin's signing submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporationSigningRequest {
    #[serde(flatten)]
    pub signing: CorpSigningCreateOpt,
    pub verification_code: String,
    /// Hash of the CLA text the admin was shown.
    pub cla_hash: String,
}

/// Keep only the fields the template defines.
fn signing_info_of_template(info: &SigningInfo, fields: &[ClaField]) -> SigningInfo {
    fields
        .iter()
        .filter_map(|f| info.get(&f.id).map(|v| (f.id.clone(), v.clone())))
        .collect()
}

#[derive(Clone)]
pub struct CorporationSigningFlow {
    pub(crate) links: LinkRepository,
    pub(crate) clas: ClaRepository,
    pub(crate) corporations: CorporationSigningRepository,
    pub(crate) pdfs: PdfRepository,
    pub(crate) codes: VerificationCodeRepository,
    pub(crate) locks: Arc<dyn LockProvider>,
}

impl CorporationSigningFlow {
    pub async fn sign(&self, link_id: &str, req: &CorporationSigningRequest) -> ModelResult<()> {
        let admin_email = &req.signing.admin_email;
        check_email_format(admin_email)?;
        self.codes
            .check_verification_code(admin_email, &req.verification_code, &purpose_of_signing(link_id))
            .await?;

        let language = req.signing.cla_language.as_str();
        let link = self.links.get_link(link_id).await?;

        // The guard, when taken, is held until the record is written.
        let (cla_info, _guard) = match self
            .corporations
            .get_cla_info_signed(link_id, language)
            .await?
        {
            Some(info) => (info, None),
            None => {
                let guard = self
                    .locks
                    .acquire(&LockKey::for_org_repo(&link.org_repo))
                    .await?;
                // Another signer may have committed while we waited.
                let info = match self
                    .corporations
                    .get_cla_info_signed(link_id, language)
                    .await?
                {
                    Some(info) => info,
                    None => {
                        let info = self
                            .cla_info_to_sign(link_id, language)
                            .await?
                            .ok_or_else(|| ModelError::invalid_parameter("no cla for this language"))?;
                        info!(link_id, language, cla_hash = %info.cla_hash, "corporate cla text fixed");
                        info
                    }
                };
                (info, Some(guard))
            }
        };

        if cla_info.cla_hash != req.cla_hash {
            return Err(ModelError::invalid_parameter("invalid cla"));
        }

        match self.pdfs.org_signature_hash(link_id).await? {
            Some(current) if current == cla_info.org_signature_hash => {}
            Some(_) => {
                warn!(link_id, "org signature changed since the cla text was fixed");
                return Err(ModelError::new(
                    ErrorCode::OrgSignatureChanged,
                    "org signature changed",
                ));
            }
            None => {
                return Err(ModelError::new(
                    ErrorCode::NotReadyToSign,
                    "the org signature is not uploaded",
                ))
            }
        }

        let template = self.clas.get(&link.cla_id, false).await?;
        let mut signing = req.signing.clone();
        signing.signing_info = signing_info_of_template(&signing.signing_info, &template.fields);
        signing.date = today();

        self.corporations
            .sign_as_corporation(link_id, &signing, &cla_info)
            .await
    }

    /// The CLA the link is bound to right now, if it is in `language`.
    pub async fn cla_info_to_sign(
        &self,
        link_id: &str,
        language: &str,
    ) -> ModelResult<Option<ClaInfo>> {
        let link = self.links.get_link(link_id).await?;
        if link.cla_language != language {
            return Ok(None);
        }
        let template = self.clas.get(&link.cla_id, true).await?;
        let Some(org_signature_hash) = self.pdfs.org_signature_hash(link_id).await? else {
            return Err(ModelError::new(
                ErrorCode::NotReadyToSign,
                "the org signature is not uploaded",
            ));
        };
        Ok(Some(ClaInfo {
            cla_language: template.language,
            cla_hash: content_hash(template.text.as_bytes()),
            org_signature_hash,
            fields: template.fields,
        }))
    }
}

impl std::fmt::Debug for CorporationSigningFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorporationSigningFlow").finish_non_exhaustive()
    }
}
