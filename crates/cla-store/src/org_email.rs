use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbResultExt, ErrorCode, ModelResult};
use crate::types::OrgEmailCreateInfo;

pub const ORG_EMAILS: &str = "org_emails";

/// Org notification mailboxes, one document per address.
#[derive(Debug, Clone)]
pub struct OrgEmailRepository {
    emails: Collection,
}

impl OrgEmailRepository {
    pub fn new(emails: Collection) -> Self {
        Self { emails }
    }

    /// Create or overwrite the record for `info.email`.
    pub async fn create_org_email(&self, info: &OrgEmailCreateInfo) -> ModelResult<()> {
        self.emails
            .new_doc(
                &DocFilter::new().eq("email", info.email.as_str()),
                to_fields(info)?,
            )
            .await?;
        Ok(())
    }

    pub async fn get_org_email_info(&self, email: &str) -> ModelResult<OrgEmailCreateInfo> {
        let doc = self
            .emails
            .get_doc(&DocFilter::new().eq("email", email), &Projection::all())
            .await
            .or_no_record(ErrorCode::NoDbRecord)?;
        Ok(doc.decode()?)
    }
}
