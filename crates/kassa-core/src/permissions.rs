//! # Permissions
//!
//! Role dispatch as a pure `(role, action) -> bool` table.
//!
//! ## The Table
//! ```text
//! ┌──────────────────┬─────────┬─────────┬─────────────────────────────┐
//! │ Action           │ Admin   │ Manager │ Cashier                     │
//! ├──────────────────┼─────────┼─────────┼─────────────────────────────┤
//! │ OpenShift        │   ✓     │   ✓     │ ✓ unless policy forbids     │
//! │ CloseShift       │   ✓     │   ✓     │ only if policy allows       │
//! │ PostSale         │   ✓     │   ✓     │   ✓                         │
//! │ PostRefund       │   ✓     │   ✓     │   ✓                         │
//! │ ViewReport       │   ✓     │   ✓     │   ✓                         │
//! │ AdjustStock      │   ✓     │   ✓     │   ✗                         │
//! └──────────────────┴─────────┴─────────┴─────────────────────────────┘
//! ```
//!
//! Configuration can only narrow the cashier's shift rows; it never grants
//! anything the static table denies.
//!
//! Location scoping: admins act anywhere; managers and cashiers only at
//! their home location.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::{Role, StaffProfile};

/// Something an operator may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenShift,
    CloseShift,
    PostSale,
    PostRefund,
    ViewReport,
    AdjustStock,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phrase = match self {
            Action::OpenShift => "open shifts",
            Action::CloseShift => "close shifts",
            Action::PostSale => "post sales",
            Action::PostRefund => "post refunds",
            Action::ViewReport => "view reports",
            Action::AdjustStock => "adjust stock",
        };
        f.write_str(phrase)
    }
}

/// Deployment policy for the cashier's shift rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftPolicy {
    pub cashier_can_open_shift: bool,
    pub cashier_can_close_shift: bool,
}

impl Default for ShiftPolicy {
    /// Cashiers open their own shifts; closing is left to a manager.
    fn default() -> Self {
        ShiftPolicy {
            cashier_can_open_shift: true,
            cashier_can_close_shift: false,
        }
    }
}

/// The static table, before any policy narrowing.
pub const fn role_allows(role: Role, action: Action) -> bool {
    match role {
        Role::Admin | Role::Manager => true,
        Role::Cashier => matches!(
            action,
            Action::OpenShift
                | Action::CloseShift
                | Action::PostSale
                | Action::PostRefund
                | Action::ViewReport
        ),
    }
}

/// The table with the deployment policy applied.
pub fn is_permitted(role: Role, action: Action, policy: &ShiftPolicy) -> bool {
    if !role_allows(role, action) {
        return false;
    }

    match (role, action) {
        (Role::Cashier, Action::OpenShift) => policy.cashier_can_open_shift,
        (Role::Cashier, Action::CloseShift) => policy.cashier_can_close_shift,
        _ => true,
    }
}

/// Checks that `staff` may perform `action`, optionally at `location_id`.
///
/// ## Order of Checks
/// 1. Inactive staff are rejected outright
/// 2. Role table (with policy)
/// 3. Location scope, skipped for admins and location-less actions
///
/// ## Example
/// ```rust,ignore
/// authorize(&cashier, Action::CloseShift, Some(&shift.location_id), &policy)?;
/// ```
pub fn authorize(
    staff: &StaffProfile,
    action: Action,
    location_id: Option<&str>,
    policy: &ShiftPolicy,
) -> CoreResult<()> {
    if !staff.is_active {
        return Err(CoreError::unauthorized(format!(
            "{} is deactivated",
            staff.display_name
        )));
    }

    if !is_permitted(staff.role, action, policy) {
        return Err(CoreError::unauthorized(format!(
            "role {} may not {}",
            staff.role, action
        )));
    }

    if staff.role == Role::Admin {
        return Ok(());
    }

    if let Some(location_id) = location_id {
        if staff.location_id.as_deref() != Some(location_id) {
            return Err(CoreError::unauthorized(format!(
                "{} is not assigned to location {}",
                staff.display_name, location_id
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
