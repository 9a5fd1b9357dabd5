//! # Staff Repository
//!
//! Staff profiles keyed by their external chat identity. Role changes and
//! deactivation are admin actions; profiles that posted ledger rows are
//! never deleted (the foreign keys from `ledger_transactions` forbid it).

use sqlx::{SqliteExecutor, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use kassa_core::{Role, StaffProfile};

#[derive(Debug, Clone)]
pub struct StaffRepository {
    pool: SqlitePool,
}

impl StaffRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StaffRepository { pool }
    }

    pub async fn insert(&self, staff: &StaffProfile) -> DbResult<()> {
        debug!(id = %staff.id, role = %staff.role, chat_id = staff.chat_id, "Inserting staff");

        sqlx::query(
            r#"
            INSERT INTO staff (id, display_name, role, chat_id, location_id, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&staff.id)
        .bind(&staff.display_name)
        .bind(staff.role)
        .bind(staff.chat_id)
        .bind(&staff.location_id)
        .bind(staff.is_active)
        .bind(staff.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches a profile by id on any executor (pool or open transaction).
    pub async fn fetch<'e, E>(executor: E, id: &str) -> DbResult<Option<StaffProfile>>
    where
        E: SqliteExecutor<'e>,
    {
        let staff = sqlx::query_as::<_, StaffProfile>(
            "SELECT id, display_name, role, chat_id, location_id, is_active, created_at FROM staff WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(staff)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<StaffProfile>> {
        Self::fetch(&self.pool, id).await
    }

    /// Resolves the chat identity the front end authenticated.
    pub async fn get_by_chat_id(&self, chat_id: i64) -> DbResult<Option<StaffProfile>> {
        let staff = sqlx::query_as::<_, StaffProfile>(
            "SELECT id, display_name, role, chat_id, location_id, is_active, created_at FROM staff WHERE chat_id = ?1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(staff)
    }

    pub async fn list_for_location(&self, location_id: &str) -> DbResult<Vec<StaffProfile>> {
        let staff = sqlx::query_as::<_, StaffProfile>(
            "SELECT id, display_name, role, chat_id, location_id, is_active, created_at FROM staff WHERE location_id = ?1 ORDER BY display_name, id",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(staff)
    }

    pub async fn set_role(&self, id: &str, role: Role) -> DbResult<()> {
        debug!(id = %id, role = %role, "Changing staff role");

        let result = sqlx::query("UPDATE staff SET role = ?2 WHERE id = ?1")
            .bind(id)
            .bind(role)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Staff", id));
        }
        Ok(())
    }

    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        debug!(id = %id, active, "Changing staff activation");

        let result = sqlx::query("UPDATE staff SET is_active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Staff", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::fixture;

    #[tokio::test]
    async fn test_lookup_by_chat_id() {
        let fx = fixture().await;

        let found = fx.db.staff().get_by_chat_id(1002).await.unwrap().unwrap();
        assert_eq!(found.id, fx.cashier.id);
        assert_eq!(found.role, Role::Cashier);
        assert!(fx.db.staff().get_by_chat_id(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chat_id_is_unique() {
        let fx = fixture().await;
        let mut clone = fx.cashier.clone();
        clone.id = kassa_core::new_id();

        let err = fx.db.staff().insert(&clone).await.unwrap_err();
        assert!(err.is_unique_on("staff.chat_id"));
    }

    #[tokio::test]
    async fn test_role_change_and_deactivation() {
        let fx = fixture().await;
        let repo = fx.db.staff();

        repo.set_role(&fx.cashier.id, Role::Manager).await.unwrap();
        repo.set_active(&fx.cashier.id, false).await.unwrap();

        let updated = repo.get_by_id(&fx.cashier.id).await.unwrap().unwrap();
        assert_eq!(updated.role, Role::Manager);
        assert!(!updated.is_active);

        assert!(matches!(
            repo.set_role("missing", Role::Admin).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_for_location_is_sorted() {
        let fx = fixture().await;
        let names: Vec<_> = fx
            .db
            .staff()
            .list_for_location(&fx.location.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.display_name)
            .collect();
        assert_eq!(names, ["Malika", "Timur"]);
    }
}
