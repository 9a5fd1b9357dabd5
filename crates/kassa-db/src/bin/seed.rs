//! # Seed Data Generator
//!
//! Populates a database with one location, its staff and a small catalog
//! for development against the runner.
//!
//! ## Usage
//! ```bash
//! # Seed ./kassa_dev.db
//! cargo run -p kassa-db --bin seed
//!
//! # Specify database path and location name
//! cargo run -p kassa-db --bin seed -- --db ./data/kassa.db --location "Harbor"
//! ```
//!
//! ## Generated Data
//! - One location
//! - An admin (chat id 100), a manager (101) and two cashiers (102, 103)
//! - Categories with a handful of products each, stock 0 - 60

use chrono::Utc;
use std::env;
use kassa_core::{new_id, Category, Location, Product, Role, StaffProfile};
use kassa_db::{Database, DbConfig};

/// Categories and their products with prices in minor units.
const CATALOG: &[(&str, &[(&str, &str, i64)])] = &[
    (
        "Drinks",
        &[
            ("Beer", "bottle", 500),
            ("Cider", "bottle", 650),
            ("Mineral Water", "bottle", 150),
            ("Cola", "can", 200),
            ("Espresso", "cup", 250),
        ],
    ),
    (
        "Snacks",
        &[
            ("Peanuts", "pack", 300),
            ("Crisps", "pack", 350),
            ("Pretzels", "pack", 275),
        ],
    ),
    (
        "Kitchen",
        &[
            ("Burger", "pcs", 1200),
            ("Fries", "pcs", 450),
            ("Soup of the Day", "bowl", 800),
        ],
    ),
];

const STAFF: &[(&str, Role, i64)] = &[
    ("Admin", Role::Admin, 100),
    ("Malika", Role::Manager, 101),
    ("Timur", Role::Cashier, 102),
    ("Aziza", Role::Cashier, 103),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./kassa_dev.db");
    let mut location_name = String::from("Central");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--location" | "-l" => {
                if i + 1 < args.len() {
                    location_name = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kassa Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>         Database file path (default: ./kassa_dev.db)");
                println!("  -l, --location <NAME>   Location name (default: Central)");
                println!("  -h, --help              Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Kassa Seed Data Generator");
    println!("=========================");
    println!("Database: {}", db_path);
    println!("Location: {}", location_name);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.locations().list_active().await?;
    if existing.iter().any(|l| l.name == location_name) {
        println!("⚠ Location '{}' already exists", location_name);
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    let now = Utc::now();
    let location = Location {
        id: new_id(),
        name: location_name,
        address: None,
        is_active: true,
        created_at: now,
    };
    db.locations().insert(&location).await?;
    println!("✓ Location {} ({})", location.name, location.id);

    for (name, role, chat_id) in STAFF {
        let profile = StaffProfile {
            id: new_id(),
            display_name: (*name).to_string(),
            role: *role,
            chat_id: *chat_id,
            // Admins are not tied to one location.
            location_id: (*role != Role::Admin).then(|| location.id.clone()),
            is_active: true,
            created_at: now,
        };
        if let Err(e) = db.staff().insert(&profile).await {
            eprintln!("Failed to insert staff {}: {}", name, e);
            continue;
        }
        println!("✓ {} {} (chat id {})", role, name, chat_id);
    }

    let mut generated = 0;
    for (category_idx, (category_name, products)) in CATALOG.iter().enumerate() {
        let category = match db
            .catalog()
            .list_categories()
            .await?
            .into_iter()
            .find(|c| c.name == *category_name)
        {
            Some(existing) => existing,
            None => {
                let category = Category {
                    id: new_id(),
                    name: (*category_name).to_string(),
                    is_active: true,
                };
                db.catalog().insert_category(&category).await?;
                category
            }
        };

        for (product_idx, (name, unit, price_minor)) in products.iter().enumerate() {
            let product = Product {
                id: new_id(),
                category_id: Some(category.id.clone()),
                location_id: location.id.clone(),
                name: (*name).to_string(),
                unit: (*unit).to_string(),
                price_minor: *price_minor,
                stock_quantity: ((category_idx * 7 + product_idx * 13) % 61) as i64,
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            if let Err(e) = db.catalog().insert_product(&product).await {
                eprintln!("Failed to insert {}: {}", product.name, e);
                continue;
            }
            generated += 1;
        }
    }

    println!("✓ Generated {} products", generated);
    println!();
    println!("Done. Open a shift with chat id 101 to start.");

    db.close().await;
    Ok(())
}
