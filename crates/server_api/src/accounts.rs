use shared::{
    domain::{OrganizationId, Role},
    error::{ApiError, ErrorCode},
    protocol::{MeResponse, OnboardingRequest, OrganizationPayload, OrganizationRequest, UserSummary},
};
use storage::{StoredOrganization, StoredUser};

use crate::{internal, ApiContext};

/// Upserts the user and picks where the browser should land after the cookie
/// is set: onboarding until an organization is attached, dashboard afterwards.
pub async fn login(ctx: &ApiContext, email: &str, name: &str) -> Result<(StoredUser, String), ApiError> {
    let email = email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::new(ErrorCode::Validation, "a valid email is required"));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "name is required"));
    }

    ctx.storage.upsert_user(&email, name).await.map_err(internal)?;
    let user = ctx
        .storage
        .user_by_email(&email)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "user vanished after upsert"))?;

    let redirect = if user.organization_id.is_none() {
        "/onboarding".to_string()
    } else {
        "/dashboard".to_string()
    };
    Ok((user, redirect))
}

pub fn me_response(user: &StoredUser) -> MeResponse {
    MeResponse {
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        organization_id: user.organization_id,
        needs_onboarding: user.organization_id.is_none(),
    }
}

/// Attaches the user to an organization. Idempotent for users that already
/// belong somewhere. The first member of an organization becomes its admin.
pub async fn finish_onboarding(
    ctx: &ApiContext,
    user: &StoredUser,
    request: &OnboardingRequest,
) -> Result<(), ApiError> {
    let Some(organization_id) = request.organization_id else {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "organization id required and terms must be accepted",
        ));
    };
    if !request.accept_terms {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "organization id required and terms must be accepted",
        ));
    }

    if user.organization_id.is_some() {
        return Ok(());
    }

    ctx.storage
        .organization_by_id(organization_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "organization not found"))?;

    let role = if ctx
        .storage
        .organization_has_admin(organization_id)
        .await
        .map_err(internal)?
    {
        Role::Staff
    } else {
        Role::Admin
    };
    ctx.storage
        .set_user_organization(user.user_id, organization_id, role)
        .await
        .map_err(internal)?;
    Ok(())
}

pub async fn create_organization(
    ctx: &ApiContext,
    request: &OrganizationRequest,
) -> Result<OrganizationPayload, ApiError> {
    let name = validated_organization_name(&request.name)?;
    let step = request.price_increase_step.unwrap_or_default();
    if step.is_sign_negative() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "price increase step must not be negative",
        ));
    }
    let organization = ctx
        .storage
        .create_organization(name, step)
        .await
        .map_err(internal)?;
    Ok(organization_payload(organization))
}

pub async fn get_organization(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<OrganizationPayload, ApiError> {
    let organization = ctx
        .storage
        .organization_by_id(organization_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "organization not found"))?;
    Ok(organization_payload(organization))
}

pub async fn list_organizations(ctx: &ApiContext) -> Result<Vec<OrganizationPayload>, ApiError> {
    let organizations = ctx.storage.list_organizations().await.map_err(internal)?;
    Ok(organizations.into_iter().map(organization_payload).collect())
}

pub async fn update_organization(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    request: &OrganizationRequest,
) -> Result<OrganizationPayload, ApiError> {
    let name = validated_organization_name(&request.name)?;
    let step = request.price_increase_step.unwrap_or_default();
    if step.is_sign_negative() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "price increase step must not be negative",
        ));
    }
    let organization = ctx
        .storage
        .update_organization(organization_id, name, step)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "organization not found"))?;
    Ok(organization_payload(organization))
}

pub async fn list_organization_users(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<Vec<UserSummary>, ApiError> {
    let users = ctx
        .storage
        .list_users_for_organization(organization_id)
        .await
        .map_err(internal)?;
    Ok(users
        .into_iter()
        .map(|user| UserSummary {
            user_id: user.user_id,
            email: user.email,
            name: user.name,
            role: user.role,
        })
        .collect())
}

fn validated_organization_name(raw: &str) -> Result<&str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "organization name is required"));
    }
    if name.len() > 120 {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "organization name must not exceed 120 characters",
        ));
    }
    Ok(name)
}

fn organization_payload(organization: StoredOrganization) -> OrganizationPayload {
    OrganizationPayload {
        organization_id: organization.organization_id,
        name: organization.name,
        price_increase_step: organization.price_increase_step,
        created_at: organization.created_at,
        updated_at: organization.updated_at,
    }
}
