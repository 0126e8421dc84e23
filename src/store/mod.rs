mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>>;
    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;

    // Site operations
    /// Inserts a site and returns its new id. `site.id` is ignored.
    /// Container name and domain collisions surface as `Error::Conflict`.
    fn create_site(&self, site: &Site) -> Result<i64>;
    fn get_site(&self, id: i64) -> Result<Option<Site>>;
    fn get_site_by_container_name(&self, container_name: &str) -> Result<Option<Site>>;
    fn get_site_by_domain(&self, domain: &str) -> Result<Option<Site>>;
    fn list_sites(&self, cursor: i64, limit: i32) -> Result<Vec<Site>>;
    fn list_owner_sites(&self, owner_id: &str) -> Result<Vec<Site>>;
    fn list_database_instances(&self) -> Result<Vec<Site>>;
    /// Persists every user-editable field. Never touches `container_name`,
    /// `status` or `status_message`.
    fn update_site(&self, site: &Site) -> Result<()>;
    fn update_site_status(
        &self,
        id: i64,
        status: SiteStatus,
        message: Option<&str>,
    ) -> Result<()>;
    fn update_site_credentials(
        &self,
        id: i64,
        db_user: Option<&str>,
        db_password: Option<&str>,
    ) -> Result<()>;
    fn update_site_commit(&self, id: i64, commit: &str) -> Result<()>;
    fn delete_site(&self, id: i64) -> Result<bool>;

    // Site grant operations
    fn upsert_site_grant(&self, grant: &SiteGrant) -> Result<()>;
    fn delete_site_grant(&self, user_id: &str, site_id: i64) -> Result<bool>;
    fn get_site_grant(&self, user_id: &str, site_id: i64) -> Result<Option<SiteGrant>>;
    fn list_user_site_grants(&self, user_id: &str) -> Result<Vec<SiteGrant>>;

    // Compose config operations
    fn upsert_compose_config(&self, site_id: i64, content: &str) -> Result<()>;
    fn get_compose_config(&self, site_id: i64) -> Result<Option<ComposeConfig>>;
    fn delete_compose_config(&self, site_id: i64) -> Result<bool>;

    // Setting operations
    fn get_setting(&self, key: &str) -> Result<Option<Setting>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    fn list_settings(&self) -> Result<Vec<Setting>>;
    fn delete_setting(&self, key: &str) -> Result<bool>;

    // Admin token check
    fn has_admin_token(&self) -> Result<bool>;

    fn close(&self) -> Result<()>;
}
