use std::collections::HashMap;

use rust_decimal::Decimal;
use shared::{
    domain::{CategoryId, OrganizationId, ProductId, StationId, TransactionKind, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        InventoryPayload, StationSalesStats, StockRequest, TransactionPayload, UserSalesStats,
    },
};
use storage::{InventoryChange, NewTransaction, StoredInventory, StoredTransaction};
use tracing::debug;

use crate::{catalog::require_product, internal, ApiContext};

pub async fn list_inventory(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    category_id: Option<CategoryId>,
) -> Result<Vec<InventoryPayload>, ApiError> {
    let lines = ctx
        .storage
        .list_inventory(organization_id, category_id)
        .await
        .map_err(internal)?;
    Ok(lines
        .into_iter()
        .map(|line| InventoryPayload {
            product_id: line.product_id,
            product_name: line.product_name,
            category_id: line.category_id,
            quantity: line.quantity,
            price: line.price,
            updated_at: line.updated_at,
        })
        .collect())
}

pub async fn product_inventory(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
) -> Result<InventoryPayload, ApiError> {
    let product = require_product(ctx, organization_id, product_id).await?;
    let inventory = require_inventory(ctx, organization_id, product_id, &product.name).await?;
    Ok(InventoryPayload {
        product_id,
        product_name: product.name,
        category_id: product.category_id,
        quantity: inventory.quantity,
        price: inventory.adjusted_price.unwrap_or(product.base_price),
        updated_at: inventory.updated_at,
    })
}

pub async fn add_stock(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    user_id: UserId,
    request: &StockRequest,
) -> Result<InventoryPayload, ApiError> {
    debug!(product_id = request.product_id.0, quantity = %request.quantity, "adding stock");
    require_positive_quantity(request.quantity)?;
    let (product, inventory) = stocked_product(ctx, organization_id, request.product_id).await?;
    let new_quantity = inventory.quantity + request.quantity;
    record_stock_change(
        ctx,
        &inventory,
        new_quantity,
        TransactionKind::Add,
        effective_price(&inventory, product.base_price),
        request.notes.clone(),
        user_id,
    )
    .await?;
    product_inventory(ctx, organization_id, request.product_id).await
}

pub async fn remove_stock(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    user_id: UserId,
    request: &StockRequest,
) -> Result<InventoryPayload, ApiError> {
    require_positive_quantity(request.quantity)?;
    let (product, inventory) = stocked_product(ctx, organization_id, request.product_id).await?;
    let new_quantity = inventory.quantity - request.quantity;
    if new_quantity < Decimal::ZERO {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!(
                "insufficient stock for {}. Available: {}, Requested: {}",
                product.name, inventory.quantity, request.quantity
            ),
        ));
    }
    record_stock_change(
        ctx,
        &inventory,
        new_quantity,
        TransactionKind::Remove,
        effective_price(&inventory, product.base_price),
        request.notes.clone(),
        user_id,
    )
    .await?;
    product_inventory(ctx, organization_id, request.product_id).await
}

/// Sets the counted quantity; the transaction records the delta between the
/// count and what the books said.
pub async fn adjust_stock(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    user_id: UserId,
    request: &StockRequest,
) -> Result<InventoryPayload, ApiError> {
    if request.quantity < Decimal::ZERO {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "quantity must not be negative",
        ));
    }
    let (product, inventory) = stocked_product(ctx, organization_id, request.product_id).await?;
    record_stock_change(
        ctx,
        &inventory,
        request.quantity,
        TransactionKind::Adjust,
        effective_price(&inventory, product.base_price),
        request.notes.clone(),
        user_id,
    )
    .await?;
    product_inventory(ctx, organization_id, request.product_id).await
}

pub async fn transaction_history(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
) -> Result<Vec<TransactionPayload>, ApiError> {
    // History stays readable for soft-deleted products, so only the product's
    // existence is checked here.
    ctx.storage
        .product_by_id(organization_id, product_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "product not found"))?;
    let transactions = ctx
        .storage
        .list_transactions_for_product(organization_id, product_id)
        .await
        .map_err(internal)?;
    Ok(transactions.into_iter().map(transaction_payload).collect())
}

pub async fn user_sales_stats(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<Vec<UserSalesStats>, ApiError> {
    let rows = ctx
        .storage
        .sale_stat_rows(organization_id)
        .await
        .map_err(internal)?;
    let users = ctx
        .storage
        .list_users_for_organization(organization_id)
        .await
        .map_err(internal)?;
    let names: HashMap<UserId, String> = users
        .into_iter()
        .map(|user| (user.user_id, user.name))
        .collect();

    let mut totals: HashMap<UserId, (Decimal, Decimal)> = HashMap::new();
    for row in rows {
        let Some(user_id) = row.created_by else {
            continue;
        };
        let units = -row.quantity_change;
        let entry = totals.entry(user_id).or_default();
        entry.0 += units;
        entry.1 += row.price_before * units;
    }

    let mut stats: Vec<UserSalesStats> = totals
        .into_iter()
        .map(|(user_id, (units_sold, revenue))| UserSalesStats {
            user_id,
            name: names.get(&user_id).cloned().unwrap_or_default(),
            units_sold,
            revenue,
        })
        .collect();
    stats.sort_by(|a, b| b.revenue.cmp(&a.revenue));
    Ok(stats)
}

pub async fn station_sales_stats(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<Vec<StationSalesStats>, ApiError> {
    let rows = ctx
        .storage
        .sale_stat_rows(organization_id)
        .await
        .map_err(internal)?;
    let stations = ctx
        .storage
        .list_stations(organization_id)
        .await
        .map_err(internal)?;
    let names: HashMap<StationId, String> = stations
        .into_iter()
        .map(|station| (station.station_id, station.name))
        .collect();

    let mut totals: HashMap<StationId, (Decimal, Decimal)> = HashMap::new();
    for row in rows {
        let Some(station_id) = row.station_id else {
            continue;
        };
        let units = -row.quantity_change;
        let entry = totals.entry(station_id).or_default();
        entry.0 += units;
        entry.1 += row.price_before * units;
    }

    let mut stats: Vec<StationSalesStats> = totals
        .into_iter()
        .map(|(station_id, (units_sold, revenue))| StationSalesStats {
            station_id,
            name: names.get(&station_id).cloned().unwrap_or_default(),
            units_sold,
            revenue,
        })
        .collect();
    stats.sort_by(|a, b| b.revenue.cmp(&a.revenue));
    Ok(stats)
}

pub(crate) fn effective_price(inventory: &StoredInventory, base_price: Decimal) -> Decimal {
    inventory.adjusted_price.unwrap_or(base_price)
}

pub(crate) async fn require_inventory(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
    product_name: &str,
) -> Result<StoredInventory, ApiError> {
    ctx.storage
        .inventory_for_product(organization_id, product_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("no inventory found for product {product_name}"),
            )
        })
}

async fn stocked_product(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
) -> Result<(storage::StoredProduct, StoredInventory), ApiError> {
    let product = require_product(ctx, organization_id, product_id).await?;
    let inventory = require_inventory(ctx, organization_id, product_id, &product.name).await?;
    Ok((product, inventory))
}

async fn record_stock_change(
    ctx: &ApiContext,
    inventory: &StoredInventory,
    new_quantity: Decimal,
    kind: TransactionKind,
    price: Decimal,
    notes: Option<String>,
    user_id: UserId,
) -> Result<(), ApiError> {
    ctx.storage
        .apply_inventory_changes(&[InventoryChange {
            inventory_id: inventory.inventory_id,
            new_quantity,
            adjusted_price: inventory.adjusted_price,
            transaction: NewTransaction {
                kind,
                quantity_change: new_quantity - inventory.quantity,
                quantity_before: inventory.quantity,
                quantity_after: new_quantity,
                price_before: price,
                price_after: price,
                reference: None,
                notes,
                created_by: Some(user_id),
                station_id: None,
            },
        }])
        .await
        .map_err(internal)?;
    Ok(())
}

fn require_positive_quantity(quantity: Decimal) -> Result<(), ApiError> {
    if quantity <= Decimal::ZERO {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "quantity must be greater than 0",
        ));
    }
    Ok(())
}

fn transaction_payload(transaction: StoredTransaction) -> TransactionPayload {
    TransactionPayload {
        transaction_id: transaction.transaction_id,
        kind: transaction.kind,
        quantity_change: transaction.quantity_change,
        quantity_before: transaction.quantity_before,
        quantity_after: transaction.quantity_after,
        price_before: transaction.price_before,
        price_after: transaction.price_after,
        reference: transaction.reference,
        notes: transaction.notes,
        created_by: transaction.created_by,
        station_id: transaction.station_id,
        created_at: transaction.created_at,
    }
}
