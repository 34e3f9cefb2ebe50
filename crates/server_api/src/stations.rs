use shared::{
    domain::{OrganizationId, StationId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{StationPayload, StationRequest},
};
use storage::StoredStation;

use crate::{internal, ApiContext};

const MAX_NAME_BYTES: usize = 120;
const MAX_DESCRIPTION_BYTES: usize = 500;

pub async fn create_station(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    request: &StationRequest,
) -> Result<StationPayload, ApiError> {
    let name = validated_name(&request.name)?;
    let description = validated_description(request.description.as_deref())?;
    let user_ids = request.user_ids.clone().unwrap_or_default();
    ensure_users_in_organization(ctx, organization_id, &user_ids).await?;

    let station_id = ctx
        .storage
        .create_station(
            organization_id,
            name,
            description,
            request.active.unwrap_or(true),
        )
        .await
        .map_err(internal)?;
    if !user_ids.is_empty() {
        ctx.storage
            .replace_station_users(station_id, &user_ids)
            .await
            .map_err(internal)?;
    }
    get_station(ctx, organization_id, station_id).await
}

pub async fn list_stations(
    ctx: &ApiContext,
    organization_id: OrganizationId,
) -> Result<Vec<StationPayload>, ApiError> {
    let stations = ctx
        .storage
        .list_stations(organization_id)
        .await
        .map_err(internal)?;
    Ok(stations.into_iter().map(station_payload).collect())
}

pub async fn list_user_stations(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    user_id: UserId,
) -> Result<Vec<StationPayload>, ApiError> {
    let stations = ctx
        .storage
        .list_stations_for_user(organization_id, user_id)
        .await
        .map_err(internal)?;
    Ok(stations.into_iter().map(station_payload).collect())
}

pub async fn get_station(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    station_id: StationId,
) -> Result<StationPayload, ApiError> {
    let station = ctx
        .storage
        .station_by_id(organization_id, station_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "station not found"))?;
    Ok(station_payload(station))
}

pub async fn update_station(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    station_id: StationId,
    request: &StationRequest,
) -> Result<StationPayload, ApiError> {
    let name = validated_name(&request.name)?;
    let description = validated_description(request.description.as_deref())?;
    let existing = ctx
        .storage
        .station_by_id(organization_id, station_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "station not found"))?;

    ctx.storage
        .update_station(
            organization_id,
            station_id,
            name,
            description,
            request.active.unwrap_or(existing.active),
        )
        .await
        .map_err(internal)?;

    // Assignments are replaced only when the request names them.
    if let Some(user_ids) = &request.user_ids {
        ensure_users_in_organization(ctx, organization_id, user_ids).await?;
        ctx.storage
            .replace_station_users(station_id, user_ids)
            .await
            .map_err(internal)?;
    }
    get_station(ctx, organization_id, station_id).await
}

pub async fn delete_station(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    station_id: StationId,
) -> Result<(), ApiError> {
    let deleted = ctx
        .storage
        .delete_station(organization_id, station_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::new(ErrorCode::NotFound, "station not found"));
    }
    Ok(())
}

async fn ensure_users_in_organization(
    ctx: &ApiContext,
    organization_id: OrganizationId,
    user_ids: &[UserId],
) -> Result<(), ApiError> {
    for user_id in user_ids {
        let member = ctx
            .storage
            .user_by_id(*user_id)
            .await
            .map_err(internal)?
            .filter(|user| user.organization_id == Some(organization_id));
        if member.is_none() {
            return Err(ApiError::new(
                ErrorCode::Validation,
                format!("user {} is not part of the organization", user_id.0),
            ));
        }
    }
    Ok(())
}

fn validated_name(raw: &str) -> Result<&str, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "station name is required"));
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("station name must not exceed {MAX_NAME_BYTES} characters"),
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

fn station_payload(station: StoredStation) -> StationPayload {
    StationPayload {
        station_id: station.station_id,
        name: station.name,
        description: station.description,
        active: station.active,
        user_ids: station.user_ids,
    }
}
