use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{AgencyId, CompanyId};

/// Module key checked before any booking operation.
pub const BOOKINGS_MODULE: &str = "bookings";

/// Who is asking, and on behalf of which agency. Passed explicitly on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub company_id: CompanyId,
    pub agency_id: AgencyId,
    /// Recorded on audit entries.
    pub actor: String,
}

impl RequestContext {
    pub fn new(company_id: CompanyId, agency_id: AgencyId, actor: impl Into<String>) -> Self {
        Self {
            company_id,
            agency_id,
            actor: actor.into(),
        }
    }
}

/// Permission collaborator: whether a module is switched on for a company's agency.
#[async_trait]
pub trait ModuleGate: Send + Sync {
    async fn is_module_active(&self, company_id: CompanyId, agency_id: AgencyId, module: &str) -> bool;
}

/// Gate that activates every module everywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl ModuleGate for AllowAll {
    async fn is_module_active(&self, _company_id: CompanyId, _agency_id: AgencyId, _module: &str) -> bool {
        true
    }
}
