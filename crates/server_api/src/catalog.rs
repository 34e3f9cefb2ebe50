use rust_decimal::Decimal;
use shared::{
    domain::{CategoryId, OrganizationId, ProductId},
    error::{ApiError, ErrorCode},
    protocol::{CategoryRequest, CategorySummary, ProductPayload, ProductRequest},
};
use storage::{StoredCategory, StoredProduct};

use crate::{internal, ApiContext};

const MAX_NAME_BYTES: usize = 120;
const MAX_DESCRIPTION_BYTES: usize = 1000;

pub async fn create_category(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    request: &CategoryRequest,
) -> Result<CategorySummary, ApiError> {
    let name = validated_name(&request.name, "category name")?;
    if ctx
        .storage
        .category_name_exists(organization_id, name)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("category '{name}' already exists"),
        ));
    }
    let category_id = ctx
        .storage
        .create_category(organization_id, name, request.dynamic_pricing)
        .await
        .map_err(internal)?;
    Ok(CategorySummary {
        category_id,
        organization_id,
        name: name.to_string(),
        dynamic_pricing: request.dynamic_pricing,
    })
}

pub async fn list_categories(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<Vec<CategorySummary>, ApiError> {
    let categories = ctx
        .storage
        .list_categories(organization_id)
        .await
        .map_err(internal)?;
    Ok(categories.into_iter().map(category_summary).collect())
}

pub async fn get_category(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> Result<CategorySummary, ApiError> {
    let category = ctx
        .storage
        .category_by_id(organization_id, category_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "category not found"))?;
    Ok(category_summary(category))
}

/// Categories with live products cannot be deleted; the products would lose
/// their pricing flag.
pub async fn delete_category(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    category_id: CategoryId,
) -> Result<(), ApiError> {
    ctx.storage
        .category_by_id(organization_id, category_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "category not found"))?;

    let in_use = ctx
        .storage
        .category_product_count(organization_id, category_id)
        .await
        .map_err(internal)?;
    if in_use > 0 {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("category still has {in_use} products"),
        ));
    }

    ctx.storage
        .delete_category(organization_id, category_id)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn create_product(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    request: &ProductRequest,
) -> Result<ProductPayload, ApiError> {
    let name = validated_name(&request.name, "product name")?;
    let description = validated_description(request.description.as_deref())?;
    validate_prices(request.base_price, request.max_price)?;

    ctx.storage
        .category_by_id(organization_id, request.category_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "category not found"))?;

    let product_id = ctx
        .storage
        .create_product(
            organization_id,
            request.category_id,
            name,
            description,
            request.base_price,
            request.max_price,
        )
        .await
        .map_err(internal)?;

    let product = ctx
        .storage
        .product_by_id(organization_id, product_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "product vanished after insert"))?;
    Ok(product_payload(product))
}

pub async fn list_products(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<Vec<ProductPayload>, ApiError> {
    let products = ctx
        .storage
        .list_active_products(organization_id)
        .await
        .map_err(internal)?;
    Ok(products.into_iter().map(product_payload).collect())
}

pub async fn get_product(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
) -> Result<ProductPayload, ApiError> {
    let product = require_product(ctx, organization_id, product_id).await?;
    Ok(product_payload(product))
}

pub async fn update_product(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
    request: &ProductRequest,
) -> Result<ProductPayload, ApiError> {
    let name = validated_name(&request.name, "product name")?;
    let description = validated_description(request.description.as_deref())?;
    validate_prices(request.base_price, request.max_price)?;

    require_product(ctx, organization_id, product_id).await?;
    ctx.storage
        .category_by_id(organization_id, request.category_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "category not found"))?;

    ctx.storage
        .update_product(
            organization_id,
            product_id,
            request.category_id,
            name,
            description,
            request.base_price,
            request.max_price,
        )
        .await
        .map_err(internal)?;

    let product = ctx
        .storage
        .product_by_id(organization_id, product_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "product vanished after update"))?;
    Ok(product_payload(product))
}

pub async fn delete_product(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
) -> Result<(), ApiError> {
    require_product(ctx, organization_id, product_id).await?;
    ctx.storage
        .deactivate_product(organization_id, product_id)
        .await
        .map_err(internal)?;
    Ok(())
}

/// 404 for unknown or foreign products, 410 for soft-deleted ones.
pub(crate) async fn require_product(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    product_id: ProductId,
) -> Result<StoredProduct, ApiError> {
    let product = ctx
        .storage
        .product_by_id(organization_id, product_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "product not found"))?;
    if !product.active {
        return Err(ApiError::new(ErrorCode::Gone, "product has been deleted"));
    }
    Ok(product)
}

fn validated_name<'a>(raw: &'a str, label: &str) -> Result<&'a str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, format!("{label} is required")));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("{label} must not exceed {MAX_NAME_BYTES} characters"),
        ));
    }
    Ok(name)
}

fn validated_description(raw: Option<&str>) -> Result<Option<&str>, ApiError> {
    let description = raw.map(str::trim).filter(|d| !d.is_empty());
    if let Some(description) = description {
        if description.len() > MAX_DESCRIPTION_BYTES {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("description must not exceed {MAX_DESCRIPTION_BYTES} characters"),
            ));
        }
    }
    Ok(description)
}

fn validate_prices(base_price: Decimal, max_price: Option<Decimal>) -> Result<(), ApiError> {
    if base_price <= Decimal::ZERO {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "price must be greater than 0",
        ));
    }
    if let Some(max_price) = max_price {
        if max_price < base_price {
            return Err(ApiError::new(
                ErrorCode::Validation,
                "max price must not be below the base price",
            ));
        }
    }
    Ok(())
}

fn category_summary(category: StoredCategory) -> CategorySummary {
    CategorySummary {
        category_id: category.category_id,
        organization_id: category.organization_id,
        name: category.name,
        dynamic_pricing: category.dynamic_pricing,
    }
}

fn product_payload(product: StoredProduct) -> ProductPayload {
    ProductPayload {
        product_id: product.product_id,
        name: product.name,
        description: product.description,
        category_id: product.category_id,
        category_name: product.category_name,
        base_price: product.base_price,
        max_price: product.max_price,
        active: product.active,
    }
}
