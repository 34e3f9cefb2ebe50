use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    CategoryId, InventoryId, OrganizationId, ProductId, Role, StationId, TransactionId,
    TransactionKind, UserId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub role: Option<Role>,
    pub organization_id: Option<OrganizationId>,
}

#[derive(Debug, Clone)]
pub struct StoredOrganization {
    pub organization_id: OrganizationId,
    pub name: String,
    pub price_increase_step: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredCategory {
    pub category_id: CategoryId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub dynamic_pricing: bool,
}

#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub product_id: ProductId,
    pub organization_id: OrganizationId,
    pub category_id: CategoryId,
    pub category_name: String,
    pub dynamic_pricing: bool,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub max_price: Option<Decimal>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct StoredInventory {
    pub inventory_id: InventoryId,
    pub organization_id: OrganizationId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub adjusted_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredInventoryLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub category_id: CategoryId,
    pub quantity: Decimal,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredTransaction {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub quantity_change: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub price_before: Decimal,
    pub price_after: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
    pub station_id: Option<StationId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredStation {
    pub station_id: StationId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone)]
pub struct SaleStatRow {
    pub created_by: Option<UserId>,
    pub station_id: Option<StationId>,
    pub quantity_change: Decimal,
    pub price_before: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub quantity_change: Decimal,
    pub quantity_before: Decimal,
    pub quantity_after: Decimal,
    pub price_before: Decimal,
    pub price_after: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
    pub station_id: Option<StationId>,
}

/// One inventory mutation plus its audit record. `adjusted_price` is written
/// as given, so callers that do not reprice must pass the current value back.
#[derive(Debug, Clone)]
pub struct InventoryChange {
    pub inventory_id: InventoryId,
    pub new_quantity: Decimal,
    pub adjusted_price: Option<Decimal>,
    pub transaction: NewTransaction,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn upsert_user(&self, email: &str, name: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (email, name) VALUES (?, ?)
             ON CONFLICT(email) DO UPDATE SET name=excluded.name
             RETURNING id",
        )
        .bind(email)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, email, name, role, organization_id FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(stored_user_from_row).transpose()
    }

    pub async fn user_by_id(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row =
            sqlx::query("SELECT id, email, name, role, organization_id FROM users WHERE id = ?")
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(stored_user_from_row).transpose()
    }

    pub async fn set_user_organization(
        &self,
        user_id: UserId,
        organization_id: OrganizationId,
        role: Role,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET organization_id = ?, role = ? WHERE id = ?")
            .bind(organization_id.0)
            .bind(role_to_text(role))
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn organization_has_admin(&self, organization_id: OrganizationId) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE organization_id = ? AND role = 'admin')",
        )
        .bind(organization_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    pub async fn list_users_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(
            "SELECT id, email, name, role, organization_id
             FROM users
             WHERE organization_id = ?
             ORDER BY lower(name) ASC",
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stored_user_from_row).collect()
    }

    pub async fn create_organization(
        &self,
        name: &str,
        price_increase_step: Decimal,
    ) -> Result<StoredOrganization> {
        let row = sqlx::query(
            "INSERT INTO organizations (name, price_increase_step) VALUES (?, ?)
             RETURNING id, name, price_increase_step, created_at, updated_at",
        )
        .bind(name)
        .bind(price_increase_step.to_string())
        .fetch_one(&self.pool)
        .await?;
        stored_organization_from_row(row)
    }

    pub async fn organization_by_id(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Option<StoredOrganization>> {
        let row = sqlx::query(
            "SELECT id, name, price_increase_step, created_at, updated_at
             FROM organizations WHERE id = ?",
        )
        .bind(organization_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(stored_organization_from_row).transpose()
    }

    pub async fn list_organizations(&self) -> Result<Vec<StoredOrganization>> {
        let rows = sqlx::query(
            "SELECT id, name, price_increase_step, created_at, updated_at
             FROM organizations ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stored_organization_from_row).collect()
    }

    pub async fn update_organization(
        &self,
        organization_id: OrganizationId,
        name: &str,
        price_increase_step: Decimal,
    ) -> Result<Option<StoredOrganization>> {
        let row = sqlx::query(
            "UPDATE organizations
             SET name = ?, price_increase_step = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?
             RETURNING id, name, price_increase_step, created_at, updated_at",
        )
        .bind(name)
        .bind(price_increase_step.to_string())
        .bind(organization_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(stored_organization_from_row).transpose()
    }

    pub async fn category_name_exists(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM categories WHERE organization_id = ? AND name = ?)",
        )
        .bind(organization_id.0)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    pub async fn create_category(
        &self,
        organization_id: OrganizationId,
        name: &str,
        dynamic_pricing: bool,
    ) -> Result<CategoryId> {
        let rec = sqlx::query(
            "INSERT INTO categories (organization_id, name, dynamic_pricing)
             VALUES (?, ?, ?) RETURNING id",
        )
        .bind(organization_id.0)
        .bind(name)
        .bind(dynamic_pricing)
        .fetch_one(&self.pool)
        .await?;
        Ok(CategoryId(rec.get::<i64, _>(0)))
    }

    pub async fn category_by_id(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
    ) -> Result<Option<StoredCategory>> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, dynamic_pricing
             FROM categories WHERE organization_id = ? AND id = ?",
        )
        .bind(organization_id.0)
        .bind(category_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(stored_category_from_row))
    }

    pub async fn list_categories(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<StoredCategory>> {
        let rows = sqlx::query(
            "SELECT id, organization_id, name, dynamic_pricing
             FROM categories WHERE organization_id = ?
             ORDER BY lower(name) ASC",
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(stored_category_from_row).collect())
    }

    pub async fn delete_category(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
    ) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM categories WHERE organization_id = ? AND id = ?")
            .bind(organization_id.0)
            .bind(category_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn category_product_count(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products WHERE organization_id = ? AND category_id = ?",
        )
        .bind(organization_id.0)
        .bind(category_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Creates the product together with its zero-quantity inventory row.
    pub async fn create_product(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
        name: &str,
        description: Option<&str>,
        base_price: Decimal,
        max_price: Option<Decimal>,
    ) -> Result<ProductId> {
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO products (organization_id, category_id, name, description, base_price, max_price)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(organization_id.0)
        .bind(category_id.0)
        .bind(name)
        .bind(description)
        .bind(base_price.to_string())
        .bind(max_price.map(|p| p.to_string()))
        .fetch_one(&mut *tx)
        .await?;
        let product_id = ProductId(rec.get::<i64, _>(0));

        sqlx::query(
            "INSERT INTO inventory (organization_id, product_id, quantity) VALUES (?, ?, '0')",
        )
        .bind(organization_id.0)
        .bind(product_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(product_id)
    }

    pub async fn product_by_id(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<StoredProduct>> {
        let row = sqlx::query(
            "SELECT p.id, p.organization_id, p.category_id, c.name, c.dynamic_pricing,
                    p.name, p.description, p.base_price, p.max_price, p.active
             FROM products p
             INNER JOIN categories c ON c.id = p.category_id
             WHERE p.organization_id = ? AND p.id = ?",
        )
        .bind(organization_id.0)
        .bind(product_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(stored_product_from_row).transpose()
    }

    pub async fn list_active_products(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<StoredProduct>> {
        let rows = sqlx::query(
            "SELECT p.id, p.organization_id, p.category_id, c.name, c.dynamic_pricing,
                    p.name, p.description, p.base_price, p.max_price, p.active
             FROM products p
             INNER JOIN categories c ON c.id = p.category_id
             WHERE p.organization_id = ? AND p.active = 1
             ORDER BY lower(p.name) ASC",
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stored_product_from_row).collect()
    }

    pub async fn update_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        category_id: CategoryId,
        name: &str,
        description: Option<&str>,
        base_price: Decimal,
        max_price: Option<Decimal>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE products
             SET category_id = ?, name = ?, description = ?, base_price = ?, max_price = ?,
                 updated_at = CURRENT_TIMESTAMP
             WHERE organization_id = ? AND id = ?",
        )
        .bind(category_id.0)
        .bind(name)
        .bind(description)
        .bind(base_price.to_string())
        .bind(max_price.map(|p| p.to_string()))
        .bind(organization_id.0)
        .bind(product_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn deactivate_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE products SET active = 0, updated_at = CURRENT_TIMESTAMP
             WHERE organization_id = ? AND id = ? AND active = 1",
        )
        .bind(organization_id.0)
        .bind(product_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn inventory_for_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Option<StoredInventory>> {
        let row = sqlx::query(
            "SELECT id, organization_id, product_id, quantity, adjusted_price, updated_at
             FROM inventory WHERE organization_id = ? AND product_id = ?",
        )
        .bind(organization_id.0)
        .bind(product_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(stored_inventory_from_row).transpose()
    }

    pub async fn list_inventory(
        &self,
        organization_id: OrganizationId,
        category_id: Option<CategoryId>,
    ) -> Result<Vec<StoredInventoryLine>> {
        let rows = if let Some(category_id) = category_id {
            sqlx::query(
                "SELECT p.id, p.name, p.category_id, i.quantity,
                        COALESCE(i.adjusted_price, p.base_price), i.updated_at
                 FROM inventory i
                 INNER JOIN products p ON p.id = i.product_id
                 WHERE i.organization_id = ? AND p.active = 1 AND p.category_id = ?
                 ORDER BY lower(p.name) ASC",
            )
            .bind(organization_id.0)
            .bind(category_id.0)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT p.id, p.name, p.category_id, i.quantity,
                        COALESCE(i.adjusted_price, p.base_price), i.updated_at
                 FROM inventory i
                 INNER JOIN products p ON p.id = i.product_id
                 WHERE i.organization_id = ? AND p.active = 1
                 ORDER BY lower(p.name) ASC",
            )
            .bind(organization_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter()
            .map(|r| {
                Ok(StoredInventoryLine {
                    product_id: ProductId(r.get::<i64, _>(0)),
                    product_name: r.get::<String, _>(1),
                    category_id: CategoryId(r.get::<i64, _>(2)),
                    quantity: decimal_from_text(r.get::<String, _>(3))?,
                    price: decimal_from_text(r.get::<String, _>(4))?,
                    updated_at: r.get::<DateTime<Utc>, _>(5),
                })
            })
            .collect()
    }

    /// Applies a batch of inventory mutations and their audit records in one
    /// transaction. A sale touching several products either lands completely
    /// or not at all.
    pub async fn apply_inventory_changes(
        &self,
        changes: &[InventoryChange],
    ) -> Result<Vec<TransactionId>> {
        let mut tx = self.pool.begin().await?;
        let mut transaction_ids = Vec::with_capacity(changes.len());

        for change in changes {
            let updated = sqlx::query(
                "UPDATE inventory
                 SET quantity = ?, adjusted_price = ?, updated_at = CURRENT_TIMESTAMP
                 WHERE id = ?",
            )
            .bind(change.new_quantity.to_string())
            .bind(change.adjusted_price.map(|p| p.to_string()))
            .bind(change.inventory_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                anyhow::bail!("inventory row {} disappeared", change.inventory_id.0);
            }

            let record = &change.transaction;
            let rec = sqlx::query(
                "INSERT INTO inventory_transactions
                     (inventory_id, kind, quantity_change, quantity_before, quantity_after,
                      price_before, price_after, reference, notes, created_by, station_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(change.inventory_id.0)
            .bind(kind_to_text(record.kind))
            .bind(record.quantity_change.to_string())
            .bind(record.quantity_before.to_string())
            .bind(record.quantity_after.to_string())
            .bind(record.price_before.to_string())
            .bind(record.price_after.to_string())
            .bind(record.reference.as_deref())
            .bind(record.notes.as_deref())
            .bind(record.created_by.map(|id| id.0))
            .bind(record.station_id.map(|id| id.0))
            .fetch_one(&mut *tx)
            .await?;
            transaction_ids.push(TransactionId(rec.get::<i64, _>(0)));
        }

        tx.commit().await?;
        Ok(transaction_ids)
    }

    pub async fn list_transactions_for_product(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
    ) -> Result<Vec<StoredTransaction>> {
        let rows = sqlx::query(
            "SELECT t.id, t.kind, t.quantity_change, t.quantity_before, t.quantity_after,
                    t.price_before, t.price_after, t.reference, t.notes, t.created_by,
                    t.station_id, t.created_at
             FROM inventory_transactions t
             INNER JOIN inventory i ON i.id = t.inventory_id
             WHERE i.organization_id = ? AND i.product_id = ?
             ORDER BY t.id DESC",
        )
        .bind(organization_id.0)
        .bind(product_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stored_transaction_from_row).collect()
    }

    pub async fn sale_stat_rows(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<SaleStatRow>> {
        let rows = sqlx::query(
            "SELECT t.created_by, t.station_id, t.quantity_change, t.price_before
             FROM inventory_transactions t
             INNER JOIN inventory i ON i.id = t.inventory_id
             WHERE i.organization_id = ? AND t.kind = 'sale'",
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(SaleStatRow {
                    created_by: r.get::<Option<i64>, _>(0).map(UserId),
                    station_id: r.get::<Option<i64>, _>(1).map(StationId),
                    quantity_change: decimal_from_text(r.get::<String, _>(2))?,
                    price_before: decimal_from_text(r.get::<String, _>(3))?,
                })
            })
            .collect()
    }

    pub async fn create_station(
        &self,
        organization_id: OrganizationId,
        name: &str,
        description: Option<&str>,
        active: bool,
    ) -> Result<StationId> {
        let rec = sqlx::query(
            "INSERT INTO stations (organization_id, name, description, active)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(organization_id.0)
        .bind(name)
        .bind(description)
        .bind(active)
        .fetch_one(&self.pool)
        .await?;
        Ok(StationId(rec.get::<i64, _>(0)))
    }

    pub async fn replace_station_users(
        &self,
        station_id: StationId,
        user_ids: &[UserId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM station_users WHERE station_id = ?")
            .bind(station_id.0)
            .execute(&mut *tx)
            .await?;
        for user_id in user_ids {
            sqlx::query("INSERT OR IGNORE INTO station_users (station_id, user_id) VALUES (?, ?)")
                .bind(station_id.0)
                .bind(user_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn station_by_id(
        &self,
        organization_id: OrganizationId,
        station_id: StationId,
    ) -> Result<Option<StoredStation>> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, description, active
             FROM stations WHERE organization_id = ? AND id = ?",
        )
        .bind(organization_id.0)
        .bind(station_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut station = stored_station_from_row(row);
        station.user_ids = self.station_user_ids(station.station_id).await?;
        Ok(Some(station))
    }

    pub async fn list_stations(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<StoredStation>> {
        let rows = sqlx::query(
            "SELECT id, organization_id, name, description, active
             FROM stations WHERE organization_id = ?
             ORDER BY lower(name) ASC",
        )
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;
        let mut stations: Vec<StoredStation> =
            rows.into_iter().map(stored_station_from_row).collect();
        for station in &mut stations {
            station.user_ids = self.station_user_ids(station.station_id).await?;
        }
        Ok(stations)
    }

    pub async fn list_stations_for_user(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<Vec<StoredStation>> {
        let rows = sqlx::query(
            "SELECT s.id, s.organization_id, s.name, s.description, s.active
             FROM stations s
             INNER JOIN station_users su ON su.station_id = s.id
             WHERE s.organization_id = ? AND su.user_id = ?
             ORDER BY lower(s.name) ASC",
        )
        .bind(organization_id.0)
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        let mut stations: Vec<StoredStation> =
            rows.into_iter().map(stored_station_from_row).collect();
        for station in &mut stations {
            station.user_ids = self.station_user_ids(station.station_id).await?;
        }
        Ok(stations)
    }

    pub async fn update_station(
        &self,
        organization_id: OrganizationId,
        station_id: StationId,
        name: &str,
        description: Option<&str>,
        active: bool,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE stations SET name = ?, description = ?, active = ?
             WHERE organization_id = ? AND id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(active)
        .bind(organization_id.0)
        .bind(station_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn delete_station(
        &self,
        organization_id: OrganizationId,
        station_id: StationId,
    ) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM stations WHERE organization_id = ? AND id = ?")
            .bind(organization_id.0)
            .bind(station_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn station_user_ids(&self, station_id: StationId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT user_id FROM station_users WHERE station_id = ? ORDER BY user_id ASC",
        )
        .bind(station_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>(0)))
            .collect())
    }
}

fn stored_user_from_row(r: sqlx::sqlite::SqliteRow) -> Result<StoredUser> {
    Ok(StoredUser {
        user_id: UserId(r.get::<i64, _>(0)),
        email: r.get::<String, _>(1),
        name: r.get::<String, _>(2),
        role: role_from_text(r.get::<Option<String>, _>(3)),
        organization_id: r.get::<Option<i64>, _>(4).map(OrganizationId),
    })
}

fn stored_organization_from_row(r: sqlx::sqlite::SqliteRow) -> Result<StoredOrganization> {
    Ok(StoredOrganization {
        organization_id: OrganizationId(r.get::<i64, _>(0)),
        name: r.get::<String, _>(1),
        price_increase_step: decimal_from_text(r.get::<String, _>(2))?,
        created_at: r.get::<DateTime<Utc>, _>(3),
        updated_at: r.get::<DateTime<Utc>, _>(4),
    })
}

fn stored_category_from_row(r: sqlx::sqlite::SqliteRow) -> StoredCategory {
    StoredCategory {
        category_id: CategoryId(r.get::<i64, _>(0)),
        organization_id: OrganizationId(r.get::<i64, _>(1)),
        name: r.get::<String, _>(2),
        dynamic_pricing: r.get::<bool, _>(3),
    }
}

fn stored_product_from_row(r: sqlx::sqlite::SqliteRow) -> Result<StoredProduct> {
    Ok(StoredProduct {
        product_id: ProductId(r.get::<i64, _>(0)),
        organization_id: OrganizationId(r.get::<i64, _>(1)),
        category_id: CategoryId(r.get::<i64, _>(2)),
        category_name: r.get::<String, _>(3),
        dynamic_pricing: r.get::<bool, _>(4),
        name: r.get::<String, _>(5),
        description: r.get::<Option<String>, _>(6),
        base_price: decimal_from_text(r.get::<String, _>(7))?,
        max_price: r
            .get::<Option<String>, _>(8)
            .map(decimal_from_text)
            .transpose()?,
        active: r.get::<bool, _>(9),
    })
}

fn stored_inventory_from_row(r: sqlx::sqlite::SqliteRow) -> Result<StoredInventory> {
    Ok(StoredInventory {
        inventory_id: InventoryId(r.get::<i64, _>(0)),
        organization_id: OrganizationId(r.get::<i64, _>(1)),
        product_id: ProductId(r.get::<i64, _>(2)),
        quantity: decimal_from_text(r.get::<String, _>(3))?,
        adjusted_price: r
            .get::<Option<String>, _>(4)
            .map(decimal_from_text)
            .transpose()?,
        updated_at: r.get::<DateTime<Utc>, _>(5),
    })
}

fn stored_transaction_from_row(r: sqlx::sqlite::SqliteRow) -> Result<StoredTransaction> {
    Ok(StoredTransaction {
        transaction_id: TransactionId(r.get::<i64, _>(0)),
        kind: kind_from_text(&r.get::<String, _>(1)),
        quantity_change: decimal_from_text(r.get::<String, _>(2))?,
        quantity_before: decimal_from_text(r.get::<String, _>(3))?,
        quantity_after: decimal_from_text(r.get::<String, _>(4))?,
        price_before: decimal_from_text(r.get::<String, _>(5))?,
        price_after: decimal_from_text(r.get::<String, _>(6))?,
        reference: r.get::<Option<String>, _>(7),
        notes: r.get::<Option<String>, _>(8),
        created_by: r.get::<Option<i64>, _>(9).map(UserId),
        station_id: r.get::<Option<i64>, _>(10).map(StationId),
        created_at: r.get::<DateTime<Utc>, _>(11),
    })
}

fn stored_station_from_row(r: sqlx::sqlite::SqliteRow) -> StoredStation {
    StoredStation {
        station_id: StationId(r.get::<i64, _>(0)),
        organization_id: OrganizationId(r.get::<i64, _>(1)),
        name: r.get::<String, _>(2),
        description: r.get::<Option<String>, _>(3),
        active: r.get::<bool, _>(4),
        user_ids: Vec::new(),
    }
}

// Money and quantities live as canonical decimal strings in SQLite; a parse
// failure here means a corrupted row, not caller error.
fn decimal_from_text(value: String) -> Result<Decimal> {
    Decimal::from_str(value.trim())
        .with_context(|| format!("invalid decimal value '{value}' in database"))
}

fn role_to_text(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Staff => "staff",
    }
}

fn role_from_text(value: Option<String>) -> Option<Role> {
    match value.as_deref() {
        Some("admin") => Some(Role::Admin),
        Some("staff") => Some(Role::Staff),
        _ => None,
    }
}

fn kind_to_text(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Sale => "sale",
        TransactionKind::Add => "add",
        TransactionKind::Remove => "remove",
        TransactionKind::Adjust => "adjust",
    }
}

fn kind_from_text(value: &str) -> TransactionKind {
    match value {
        "sale" => TransactionKind::Sale,
        "remove" => TransactionKind::Remove,
        "adjust" => TransactionKind::Adjust,
        _ => TransactionKind::Add,
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
