//! Shared fixtures for the service tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kassa_core::{new_id, Category, Location, Product, Role, StaffProfile};
use kassa_db::{Database, DbConfig};

use crate::config::ServiceSettings;
use crate::sink::{EventPublisher, MemorySink, SinkWorkers};

/// A location with a manager, a cashier and one product (price 5.00,
/// stock 10).
pub struct Fixture {
    pub db: Database,
    pub location: Location,
    pub manager: StaffProfile,
    pub cashier: StaffProfile,
    pub product: Product,
}

pub fn location(name: &str) -> Location {
    Location {
        id: new_id(),
        name: name.to_string(),
        address: None,
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn staff(name: &str, role: Role, chat_id: i64, location_id: &str) -> StaffProfile {
    StaffProfile {
        id: new_id(),
        display_name: name.to_string(),
        role,
        chat_id,
        location_id: Some(location_id.to_string()),
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn product(name: &str, location_id: &str, category_id: Option<&str>) -> Product {
    let now = Utc::now();
    Product {
        id: new_id(),
        category_id: category_id.map(str::to_string),
        location_id: location_id.to_string(),
        name: name.to_string(),
        unit: "pcs".to_string(),
        price_minor: 500,
        stock_quantity: 10,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// In-memory store; one connection, so nothing runs concurrently.
pub async fn fixture() -> Fixture {
    fixture_with(DbConfig::in_memory()).await
}

/// File store with several connections, for tests that race writers.
pub async fn file_fixture() -> Fixture {
    fixture_with(file_db_config()).await
}

pub fn file_db_config() -> DbConfig {
    let path: PathBuf = std::env::temp_dir().join(format!("kassa-test-{}.db", new_id()));
    DbConfig::new(path)
        .max_connections(4)
        .busy_timeout(Duration::from_secs(5))
}

pub async fn fixture_with(config: DbConfig) -> Fixture {
    let db = Database::new(config).await.unwrap();

    let location = location("Central");
    db.locations().insert(&location).await.unwrap();

    let manager = staff("Malika", Role::Manager, 1001, &location.id);
    let cashier = staff("Timur", Role::Cashier, 1002, &location.id);
    db.staff().insert(&manager).await.unwrap();
    db.staff().insert(&cashier).await.unwrap();

    let category = Category {
        id: new_id(),
        name: "Drinks".to_string(),
        is_active: true,
    };
    db.catalog().insert_category(&category).await.unwrap();

    let product = product("Beer", &location.id, Some(&category.id));
    db.catalog().insert_product(&product).await.unwrap();

    Fixture {
        db,
        location,
        manager,
        cashier,
        product,
    }
}

/// Publisher wired to one in-memory sink on the audit lane.
pub fn memory_events() -> (EventPublisher, SinkWorkers, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let (publisher, workers) = EventPublisher::builder().audit(sink.clone()).spawn();
    (publisher, workers, sink)
}

pub fn settings() -> Arc<ServiceSettings> {
    Arc::new(ServiceSettings::default())
}
