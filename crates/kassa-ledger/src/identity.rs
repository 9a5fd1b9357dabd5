//! # Identity & Role Registry
//!
//! Resolves the identity the chat front end authenticated into a
//! [`StaffProfile`]. Every inbound action passes through here before it
//! reaches a service, so services can trust the profile they receive.

use kassa_core::{CoreError, StaffProfile};
use kassa_db::Database;
use tracing::debug;

use crate::error::LedgerResult;

#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    db: Database,
}

impl IdentityRegistry {
    pub fn new(db: Database) -> Self {
        IdentityRegistry { db }
    }

    /// Resolves an external chat identity.
    ///
    /// Unknown and deactivated identities are both `Unauthorized`; neither
    /// may act.
    pub async fn resolve_chat(&self, chat_id: i64) -> LedgerResult<StaffProfile> {
        let staff = self
            .db
            .staff()
            .get_by_chat_id(chat_id)
            .await?
            .ok_or_else(|| CoreError::unauthorized(format!("chat {} is not registered", chat_id)))?;

        Self::ensure_active(staff)
    }

    /// Resolves a staff id.
    pub async fn resolve(&self, staff_id: &str) -> LedgerResult<StaffProfile> {
        let staff = self
            .db
            .staff()
            .get_by_id(staff_id)
            .await?
            .ok_or_else(|| CoreError::unauthorized(format!("staff {} is not registered", staff_id)))?;

        Self::ensure_active(staff)
    }

    fn ensure_active(staff: StaffProfile) -> LedgerResult<StaffProfile> {
        if !staff.is_active {
            debug!(staff_id = %staff.id, "Rejecting deactivated staff");
            return Err(CoreError::unauthorized(format!("{} is deactivated", staff.display_name)).into());
        }
        Ok(staff)
    }
}
