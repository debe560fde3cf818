use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

use crate::{
    entities::catalog_service::{self, Entity as CatalogService},
    errors::ServiceError,
};

/// Looks up an active catalog entry by slug.
pub async fn find_active<C>(conn: &C, slug: &str) -> Result<catalog_service::Model, ServiceError>
where
    C: ConnectionTrait,
{
    CatalogService::find()
        .filter(catalog_service::Column::Slug.eq(slug))
        .filter(catalog_service::Column::Active.eq(true))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Service '{}' not found", slug)))
}

/// Resolves the fixed price of a service. Quote-only or unpriced entries
/// cannot go through checkout.
pub async fn resolve_price<C>(
    conn: &C,
    slug: &str,
) -> Result<(catalog_service::Model, Decimal), ServiceError>
where
    C: ConnectionTrait,
{
    let service = find_active(conn, slug).await?;
    match service.price {
        Some(price) if !service.quote_only => Ok((service, price)),
        _ => Err(ServiceError::NotFound(format!(
            "Service '{}' is priced on request only",
            slug
        ))),
    }
}
