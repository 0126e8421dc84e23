//! Permission checks consulted before any orchestrator operation.

use crate::error::Result;
use crate::store::Store;
use crate::types::{Permission, Site, User};

/// Returns true if the user may create new sites or database instances.
pub fn can_create_sites(user: &User) -> bool {
    user.can_create_sites
}

/// Returns true if the user holds `required` on the site.
/// Owners have full access; everyone else needs a grant.
pub fn can_access_site(
    store: &dyn Store,
    user: &User,
    site: &Site,
    required: Permission,
) -> Result<bool> {
    if site.owner_id == user.id {
        return Ok(true);
    }

    let grant = store.get_site_grant(&user.id, site.id)?;

    Ok(grant.is_some_and(|g| {
        g.allow_bits
            .expand_implied()
            .difference(g.deny_bits)
            .has(required)
    }))
}
