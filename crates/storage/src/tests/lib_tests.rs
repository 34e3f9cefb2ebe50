use super::*;
use rust_decimal_macros::dec;

async fn seeded_org(storage: &Storage) -> (StoredOrganization, UserId) {
    let org = storage
        .create_organization("Tap Room", dec!(0.50))
        .await
        .expect("org");
    let user = storage
        .upsert_user("alice@example.com", "Alice")
        .await
        .expect("user");
    storage
        .set_user_organization(user, org.organization_id, Role::Admin)
        .await
        .expect("attach");
    (org, user)
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("barkeep_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn upserting_user_by_email_reuses_the_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage
        .upsert_user("bob@example.com", "Bob")
        .await
        .expect("user");
    let second = storage
        .upsert_user("bob@example.com", "Robert")
        .await
        .expect("user");
    assert_eq!(first, second);

    let user = storage
        .user_by_email("bob@example.com")
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(user.name, "Robert");
    assert!(user.organization_id.is_none());
    assert!(user.role.is_none());
}

#[tokio::test]
async fn organization_admin_presence_tracks_role_assignment() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let org = storage
        .create_organization("Cellar", dec!(0))
        .await
        .expect("org");
    assert!(!storage
        .organization_has_admin(org.organization_id)
        .await
        .expect("check"));

    let user = storage
        .upsert_user("carol@example.com", "Carol")
        .await
        .expect("user");
    storage
        .set_user_organization(user, org.organization_id, Role::Admin)
        .await
        .expect("attach");
    assert!(storage
        .organization_has_admin(org.organization_id)
        .await
        .expect("check"));
}

#[tokio::test]
async fn creating_a_product_seeds_a_zero_inventory_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, _user) = seeded_org(&storage).await;
    let category = storage
        .create_category(org.organization_id, "Draft", true)
        .await
        .expect("category");
    let product = storage
        .create_product(
            org.organization_id,
            category,
            "House Lager",
            Some("0.5l"),
            dec!(4.50),
            Some(dec!(9.00)),
        )
        .await
        .expect("product");

    let inventory = storage
        .inventory_for_product(org.organization_id, product)
        .await
        .expect("inventory")
        .expect("row present");
    assert_eq!(inventory.quantity, dec!(0));
    assert!(inventory.adjusted_price.is_none());

    let stored = storage
        .product_by_id(org.organization_id, product)
        .await
        .expect("product fetch")
        .expect("present");
    assert_eq!(stored.category_name, "Draft");
    assert!(stored.dynamic_pricing);
    assert_eq!(stored.base_price, dec!(4.50));
    assert_eq!(stored.max_price, Some(dec!(9.00)));
}

#[tokio::test]
async fn inventory_listing_prefers_adjusted_price_and_filters_by_category() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, user) = seeded_org(&storage).await;
    let draft = storage
        .create_category(org.organization_id, "Draft", true)
        .await
        .expect("category");
    let bottles = storage
        .create_category(org.organization_id, "Bottles", false)
        .await
        .expect("category");
    let lager = storage
        .create_product(org.organization_id, draft, "Lager", None, dec!(4), None)
        .await
        .expect("product");
    let _stout = storage
        .create_product(org.organization_id, bottles, "Stout", None, dec!(6), None)
        .await
        .expect("product");

    let inventory = storage
        .inventory_for_product(org.organization_id, lager)
        .await
        .expect("inventory")
        .expect("row");
    storage
        .apply_inventory_changes(&[InventoryChange {
            inventory_id: inventory.inventory_id,
            new_quantity: dec!(10),
            adjusted_price: Some(dec!(4.50)),
            transaction: NewTransaction {
                kind: TransactionKind::Add,
                quantity_change: dec!(10),
                quantity_before: dec!(0),
                quantity_after: dec!(10),
                price_before: dec!(4),
                price_after: dec!(4.50),
                reference: None,
                notes: None,
                created_by: Some(user),
                station_id: None,
            },
        }])
        .await
        .expect("apply");

    let all = storage
        .list_inventory(org.organization_id, None)
        .await
        .expect("list");
    assert_eq!(all.len(), 2);

    let only_draft = storage
        .list_inventory(org.organization_id, Some(draft))
        .await
        .expect("list");
    assert_eq!(only_draft.len(), 1);
    assert_eq!(only_draft[0].product_id, lager);
    assert_eq!(only_draft[0].quantity, dec!(10));
    assert_eq!(only_draft[0].price, dec!(4.50));
}

#[tokio::test]
async fn inventory_change_batch_rolls_back_as_a_unit() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, user) = seeded_org(&storage).await;
    let category = storage
        .create_category(org.organization_id, "Draft", false)
        .await
        .expect("category");
    let product = storage
        .create_product(org.organization_id, category, "Pils", None, dec!(3), None)
        .await
        .expect("product");
    let inventory = storage
        .inventory_for_product(org.organization_id, product)
        .await
        .expect("inventory")
        .expect("row");

    let good = InventoryChange {
        inventory_id: inventory.inventory_id,
        new_quantity: dec!(5),
        adjusted_price: None,
        transaction: NewTransaction {
            kind: TransactionKind::Add,
            quantity_change: dec!(5),
            quantity_before: dec!(0),
            quantity_after: dec!(5),
            price_before: dec!(3),
            price_after: dec!(3),
            reference: None,
            notes: None,
            created_by: Some(user),
            station_id: None,
        },
    };
    let mut bad = good.clone();
    bad.inventory_id = InventoryId(9999);

    let result = storage.apply_inventory_changes(&[good, bad]).await;
    assert!(result.is_err());

    let unchanged = storage
        .inventory_for_product(org.organization_id, product)
        .await
        .expect("inventory")
        .expect("row");
    assert_eq!(unchanged.quantity, dec!(0));
    let history = storage
        .list_transactions_for_product(org.organization_id, product)
        .await
        .expect("history");
    assert!(history.is_empty());
}

#[tokio::test]
async fn transaction_history_is_newest_first() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, user) = seeded_org(&storage).await;
    let category = storage
        .create_category(org.organization_id, "Draft", false)
        .await
        .expect("category");
    let product = storage
        .create_product(org.organization_id, category, "Ale", None, dec!(5), None)
        .await
        .expect("product");
    let inventory = storage
        .inventory_for_product(org.organization_id, product)
        .await
        .expect("inventory")
        .expect("row");

    for (qty_before, qty_after, kind) in [
        (dec!(0), dec!(10), TransactionKind::Add),
        (dec!(10), dec!(8), TransactionKind::Remove),
    ] {
        storage
            .apply_inventory_changes(&[InventoryChange {
                inventory_id: inventory.inventory_id,
                new_quantity: qty_after,
                adjusted_price: None,
                transaction: NewTransaction {
                    kind,
                    quantity_change: qty_after - qty_before,
                    quantity_before: qty_before,
                    quantity_after: qty_after,
                    price_before: dec!(5),
                    price_after: dec!(5),
                    reference: None,
                    notes: None,
                    created_by: Some(user),
                    station_id: None,
                },
            }])
            .await
            .expect("apply");
    }

    let history = storage
        .list_transactions_for_product(org.organization_id, product)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Remove);
    assert_eq!(history[1].kind, TransactionKind::Add);
    assert_eq!(history[0].quantity_change, dec!(-2));
}

#[tokio::test]
async fn sale_stat_rows_only_cover_sale_transactions() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, user) = seeded_org(&storage).await;
    let category = storage
        .create_category(org.organization_id, "Draft", false)
        .await
        .expect("category");
    let product = storage
        .create_product(org.organization_id, category, "Bock", None, dec!(5), None)
        .await
        .expect("product");
    let inventory = storage
        .inventory_for_product(org.organization_id, product)
        .await
        .expect("inventory")
        .expect("row");

    storage
        .apply_inventory_changes(&[
            InventoryChange {
                inventory_id: inventory.inventory_id,
                new_quantity: dec!(10),
                adjusted_price: None,
                transaction: NewTransaction {
                    kind: TransactionKind::Add,
                    quantity_change: dec!(10),
                    quantity_before: dec!(0),
                    quantity_after: dec!(10),
                    price_before: dec!(5),
                    price_after: dec!(5),
                    reference: None,
                    notes: None,
                    created_by: Some(user),
                    station_id: None,
                },
            },
            InventoryChange {
                inventory_id: inventory.inventory_id,
                new_quantity: dec!(7),
                adjusted_price: None,
                transaction: NewTransaction {
                    kind: TransactionKind::Sale,
                    quantity_change: dec!(-3),
                    quantity_before: dec!(10),
                    quantity_after: dec!(7),
                    price_before: dec!(5),
                    price_after: dec!(5),
                    reference: Some("SALE-1".into()),
                    notes: None,
                    created_by: Some(user),
                    station_id: None,
                },
            },
        ])
        .await
        .expect("apply");

    let stats = storage
        .sale_stat_rows(org.organization_id)
        .await
        .expect("stats");
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].quantity_change, dec!(-3));
    assert_eq!(stats[0].created_by, Some(user));
}

#[tokio::test]
async fn station_assignments_replace_and_scope_by_user() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, alice) = seeded_org(&storage).await;
    let bob = storage
        .upsert_user("bob@example.com", "Bob")
        .await
        .expect("user");
    storage
        .set_user_organization(bob, org.organization_id, Role::Staff)
        .await
        .expect("attach");

    let front = storage
        .create_station(org.organization_id, "Front Bar", None, true)
        .await
        .expect("station");
    let back = storage
        .create_station(org.organization_id, "Back Bar", Some("garden"), true)
        .await
        .expect("station");
    storage
        .replace_station_users(front, &[alice, bob])
        .await
        .expect("assign");
    storage
        .replace_station_users(back, &[bob])
        .await
        .expect("assign");

    let bobs = storage
        .list_stations_for_user(org.organization_id, bob)
        .await
        .expect("stations");
    assert_eq!(bobs.len(), 2);

    storage
        .replace_station_users(front, &[alice])
        .await
        .expect("reassign");
    let bobs = storage
        .list_stations_for_user(org.organization_id, bob)
        .await
        .expect("stations");
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].station_id, back);

    let fetched = storage
        .station_by_id(org.organization_id, front)
        .await
        .expect("station")
        .expect("present");
    assert_eq!(fetched.user_ids, vec![alice]);
}

#[tokio::test]
async fn category_names_are_unique_per_organization() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, _user) = seeded_org(&storage).await;
    let other = storage
        .create_organization("Second Bar", dec!(0))
        .await
        .expect("org");

    storage
        .create_category(org.organization_id, "Draft", false)
        .await
        .expect("category");
    assert!(storage
        .category_name_exists(org.organization_id, "Draft")
        .await
        .expect("check"));
    assert!(!storage
        .category_name_exists(other.organization_id, "Draft")
        .await
        .expect("check"));

    // Same name in a different organization is fine.
    storage
        .create_category(other.organization_id, "Draft", false)
        .await
        .expect("category");
}

#[tokio::test]
async fn deactivated_products_drop_out_of_active_listings() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (org, _user) = seeded_org(&storage).await;
    let category = storage
        .create_category(org.organization_id, "Draft", false)
        .await
        .expect("category");
    let product = storage
        .create_product(org.organization_id, category, "Kolsch", None, dec!(4), None)
        .await
        .expect("product");

    assert_eq!(
        storage
            .list_active_products(org.organization_id)
            .await
            .expect("list")
            .len(),
        1
    );
    assert!(storage
        .deactivate_product(org.organization_id, product)
        .await
        .expect("deactivate"));
    assert!(storage
        .list_active_products(org.organization_id)
        .await
        .expect("list")
        .is_empty());

    // Still reachable directly, flagged inactive.
    let stored = storage
        .product_by_id(org.organization_id, product)
        .await
        .expect("fetch")
        .expect("present");
    assert!(!stored.active);
}
