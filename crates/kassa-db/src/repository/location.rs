//! # Location Repository
//!
//! Locations are created by an admin and never deleted once a shift refers
//! to them; they are deactivated instead.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use kassa_core::Location;

#[derive(Debug, Clone)]
pub struct LocationRepository {
    pool: SqlitePool,
}

impl LocationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LocationRepository { pool }
    }

    pub async fn insert(&self, location: &Location) -> DbResult<()> {
        debug!(id = %location.id, name = %location.name, "Inserting location");

        sqlx::query(
            r#"
            INSERT INTO locations (id, name, address, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&location.id)
        .bind(&location.name)
        .bind(&location.address)
        .bind(location.is_active)
        .bind(location.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Location>> {
        let location = sqlx::query_as::<_, Location>(
            "SELECT id, name, address, is_active, created_at FROM locations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(location)
    }

    pub async fn list_active(&self) -> DbResult<Vec<Location>> {
        let locations = sqlx::query_as::<_, Location>(
            r#"
            SELECT id, name, address, is_active, created_at
            FROM locations
            WHERE is_active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(locations)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE locations SET is_active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Location", id));
        }

        Ok(())
    }

    /// Takes the write lock on behalf of a location's shift lifecycle.
    ///
    /// Must be the first statement of the transaction. Serializes every
    /// open/close at the location, which is what keeps "at most one OPEN
    /// shift" true without relying on the unique index alone.
    pub async fn lock(conn: &mut SqliteConnection, id: &str) -> DbResult<Location> {
        let touched = sqlx::query("UPDATE locations SET name = name WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if touched.rows_affected() == 0 {
            return Err(DbError::not_found("Location", id));
        }

        let location = sqlx::query_as::<_, Location>(
            "SELECT id, name, address, is_active, created_at FROM locations WHERE id = ?1",
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::location;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let loc = location("Airport");
        db.locations().insert(&loc).await.unwrap();

        let fetched = db.locations().get_by_id(&loc.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Airport");
        assert!(db.locations().get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.locations().insert(&location("Airport")).await.unwrap();

        let err = db.locations().insert(&location("Airport")).await.unwrap_err();
        assert!(err.is_unique_on("locations.name"));
    }

    #[tokio::test]
    async fn test_deactivated_location_leaves_active_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let loc = location("Harbor");
        db.locations().insert(&loc).await.unwrap();
        db.locations().set_active(&loc.id, false).await.unwrap();

        assert!(db.locations().list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_missing_location() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();

        let err = LocationRepository::lock(&mut tx, "nope").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
