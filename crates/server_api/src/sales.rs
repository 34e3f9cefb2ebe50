use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{
    domain::{InventoryId, OrganizationId, TransactionKind},
    error::{ApiError, ErrorCode},
    protocol::{SaleLine, SaleReceipt, SaleRequest},
};
use storage::{InventoryChange, NewTransaction, StoredUser};
use tracing::debug;

use crate::{catalog::require_product, internal, inventory::require_inventory, ApiContext};

/// Rings up a multi-item sale. Stock checks, pricing, and the dynamic price
/// bump are computed against a working snapshot so repeated items compound,
/// and the whole batch is committed atomically.
pub async fn process_sale(
    ctx: &ApiContext,
    user: &StoredUser,
    organization_id: OrganizationId,
    request: &SaleRequest,
) -> Result<SaleReceipt, ApiError> {
    if request.items.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "sale must contain at least one item",
        ));
    }

    if let Some(station_id) = request.station_id {
        ctx.storage
            .station_by_id(organization_id, station_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "station not found"))?;
    }

    let organization = ctx
        .storage
        .organization_by_id(organization_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "organization not found"))?;

    let reference = format!("SALE-{}", Utc::now().timestamp_millis());
    debug!(%reference, items = request.items.len(), "processing sale");

    // Working quantity/price per inventory row, so two lines for the same
    // product see each other's effects.
    let mut working: HashMap<InventoryId, (Decimal, Option<Decimal>)> = HashMap::new();
    let mut changes: Vec<InventoryChange> = Vec::with_capacity(request.items.len());
    let mut lines: Vec<SaleLine> = Vec::with_capacity(request.items.len());
    let mut total = Decimal::ZERO;

    for item in &request.items {
        if item.quantity <= Decimal::ZERO {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "item quantity must be greater than 0",
            ));
        }

        let product = require_product(ctx, organization_id, item.product_id).await?;
        let inventory =
            require_inventory(ctx, organization_id, item.product_id, &product.name).await?;

        let (quantity_before, adjusted_before) = working
            .get(&inventory.inventory_id)
            .copied()
            .unwrap_or((inventory.quantity, inventory.adjusted_price));

        let quantity_after = quantity_before - item.quantity;
        if quantity_after < Decimal::ZERO {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!(
                    "insufficient stock for {}. Available: {}, Requested: {}",
                    product.name, quantity_before, item.quantity
                ),
            ));
        }

        let price_before = adjusted_before.unwrap_or(product.base_price);
        let line_total = price_before * item.quantity;

        let mut price_after = price_before;
        if product.dynamic_pricing {
            price_after = price_before + organization.price_increase_step;
            if let Some(max_price) = product.max_price {
                if price_after > max_price {
                    price_after = max_price;
                }
            }
        }

        let adjusted_after = if product.dynamic_pricing {
            Some(price_after)
        } else {
            adjusted_before
        };
        working.insert(inventory.inventory_id, (quantity_after, adjusted_after));
        changes.push(InventoryChange {
            inventory_id: inventory.inventory_id,
            new_quantity: quantity_after,
            adjusted_price: adjusted_after,
            transaction: NewTransaction {
                kind: TransactionKind::Sale,
                quantity_change: -item.quantity,
                quantity_before,
                quantity_after,
                price_before,
                price_after,
                reference: Some(reference.clone()),
                notes: Some("POS sale".to_string()),
                created_by: Some(user.user_id),
                station_id: request.station_id,
            },
        });
        lines.push(SaleLine {
            product_id: item.product_id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: price_before,
            line_total,
        });
        total += line_total;
    }

    ctx.storage
        .apply_inventory_changes(&changes)
        .await
        .map_err(internal)?;

    Ok(SaleReceipt {
        reference,
        items: lines,
        total,
        notes: request.notes.clone(),
        completed_at: Utc::now(),
    })
}
