use crate::auth::{RequireAuth, can_access_site};
use crate::server::response::{ApiError, StoreOptionExt, StoreResultExt};
use crate::store::Store;
use crate::types::{Permission, Site};

/// Returns true if the caller holds `required` on the site. Admin tokens
/// hold every level on every site.
pub fn check_site_permission(
    store: &dyn Store,
    auth: &RequireAuth,
    site: &Site,
    required: Permission,
) -> Result<bool, ApiError> {
    match &auth.user {
        _ if auth.is_admin() => Ok(true),
        Some(user) => {
            can_access_site(store, user, site, required).api_err("Failed to check site grant")
        }
        None => Ok(false),
    }
}

/// Loads a site the caller may act on. Callers without read access get a
/// 404 so site ids are not disclosed; read-only callers asking for more
/// get a 403.
pub fn load_site_with_permission(
    store: &dyn Store,
    auth: &RequireAuth,
    site_id: i64,
    required: Permission,
) -> Result<Site, ApiError> {
    let site = store
        .get_site(site_id)
        .api_err("Failed to get site")?
        .or_not_found("Site not found")?;

    if check_site_permission(store, auth, &site, required)? {
        return Ok(site);
    }
    if required != Permission::SITE_READ
        && check_site_permission(store, auth, &site, Permission::SITE_READ)?
    {
        return Err(ApiError::forbidden("Insufficient site permissions"));
    }
    Err(ApiError::not_found("Site not found"))
}
