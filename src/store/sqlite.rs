use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database. Used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Maps a unique-constraint failure on `sites` to a conflict naming the column.
/// A second database instance on an exposed port is a validation failure.
fn site_conflict(err: rusqlite::Error) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            if msg.contains("db_port") {
                Error::Validation(
                    "port is already exposed by another database instance".to_string(),
                )
            } else if msg.contains("container_name") {
                Error::Conflict("container name already allocated".to_string())
            } else if msg.contains("domain") {
                Error::Conflict("domain already in use".to_string())
            } else {
                Error::Conflict(msg)
            }
        }
        other => Error::from(other),
    }
}

const USER_COLUMNS: &str = "id, username, can_create_sites, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        can_create_sites: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at";

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        user_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
        last_used_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
    })
}

const SITE_COLUMNS: &str = "id, name, type, container_name, domain, include_www, ssl_enabled, ssl_config,
     status, status_message, db_type, db_host, db_port, db_name, db_user, db_password,
     php_version, deploy_options, github_repo, github_branch, github_token, github_last_commit,
     github_last_pull, sftp_enabled, sftp_username, sftp_password, sftp_port, owner_id,
     created_at, updated_at";

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    Ok(Site {
        id: row.get(0)?,
        name: row.get(1)?,
        site_type: parse_enum(row, 2)?,
        container_name: row.get(3)?,
        domain: row.get(4)?,
        include_www: row.get(5)?,
        ssl_enabled: row.get(6)?,
        ssl_config: parse_json(row, 7)?,
        status: parse_enum(row, 8)?,
        status_message: row.get(9)?,
        db_type: parse_enum(row, 10)?,
        db_host: row.get(11)?,
        db_port: row.get(12)?,
        db_name: row.get(13)?,
        db_user: row.get(14)?,
        db_password: row.get(15)?,
        php_version: row.get(16)?,
        deploy_options: parse_json(row, 17)?,
        github_repo: row.get(18)?,
        github_branch: row.get(19)?,
        github_token: row.get(20)?,
        github_last_commit: row.get(21)?,
        github_last_pull: row.get::<_, Option<String>>(22)?.map(|s| parse_datetime(&s)),
        sftp_enabled: row.get(23)?,
        sftp_username: row.get(24)?,
        sftp_password: row.get(25)?,
        sftp_port: row.get(26)?,
        owner_id: row.get(27)?,
        created_at: parse_datetime(&row.get::<_, String>(28)?),
        updated_at: parse_datetime(&row.get::<_, String>(29)?),
    })
}

const GRANT_COLUMNS: &str = "user_id, site_id, allow_bits, deny_bits, created_at, updated_at";

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<SiteGrant> {
    Ok(SiteGrant {
        user_id: row.get(0)?,
        site_id: row.get(1)?,
        allow_bits: Permission::from(row.get::<_, i64>(2)?),
        deny_bits: Permission::from(row.get::<_, i64>(3)?),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

impl SqliteStore {
    fn query_sites(&self, sql_where: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Site>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites {sql_where}"))?;
        let rows = stmt.query_map(args, site_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn query_site(&self, sql_where: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<Site>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SITE_COLUMNS} FROM sites {sql_where}"),
            args,
            site_from_row,
        )
        .optional()
        .map_err(Error::from)
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO users (id, username, can_create_sites, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.username,
                user.can_create_sites,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], user_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET username = ?1, can_create_sites = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                user.username,
                user.can_create_sites,
                format_datetime(&user.updated_at),
                user.id
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO tokens (id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.is_admin,
                token.user_id,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::TokenLookupCollision)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
            params![id],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], token_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE user_id = ?1 ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], token_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Site operations

    fn create_site(&self, site: &Site) -> Result<i64> {
        if site.container_name.trim().is_empty() {
            return Err(Error::Provisioning(
                "refusing to persist a site without a container name".to_string(),
            ));
        }

        let conn = self.conn();
        conn.execute(
            "INSERT INTO sites (name, type, container_name, domain, include_www, ssl_enabled,
                 ssl_config, status, status_message, db_type, db_host, db_port, db_name, db_user,
                 db_password, php_version, deploy_options, github_repo, github_branch,
                 github_token, github_last_commit, github_last_pull, sftp_enabled, sftp_username,
                 sftp_password, sftp_port, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
            params![
                site.name,
                site.site_type.as_str(),
                site.container_name,
                site.domain,
                site.include_www,
                site.ssl_enabled,
                serde_json::to_string(&site.ssl_config)?,
                site.status.as_str(),
                site.status_message,
                site.db_type.as_str(),
                site.db_host,
                site.db_port,
                site.db_name,
                site.db_user,
                site.db_password,
                site.php_version,
                serde_json::to_string(&site.deploy_options)?,
                site.github_repo,
                site.github_branch,
                site.github_token,
                site.github_last_commit,
                site.github_last_pull.as_ref().map(format_datetime),
                site.sftp_enabled,
                site.sftp_username,
                site.sftp_password,
                site.sftp_port,
                site.owner_id,
                format_datetime(&site.created_at),
                format_datetime(&site.updated_at),
            ],
        )
        .map_err(site_conflict)?;

        Ok(conn.last_insert_rowid())
    }

    fn get_site(&self, id: i64) -> Result<Option<Site>> {
        self.query_site("WHERE id = ?1", &[&id])
    }

    fn get_site_by_container_name(&self, container_name: &str) -> Result<Option<Site>> {
        self.query_site("WHERE container_name = ?1", &[&container_name])
    }

    fn get_site_by_domain(&self, domain: &str) -> Result<Option<Site>> {
        self.query_site("WHERE domain = ?1 AND type <> 'database'", &[&domain])
    }

    fn list_sites(&self, cursor: i64, limit: i32) -> Result<Vec<Site>> {
        self.query_sites("WHERE id > ?1 ORDER BY id LIMIT ?2", &[&cursor, &limit])
    }

    fn list_owner_sites(&self, owner_id: &str) -> Result<Vec<Site>> {
        self.query_sites("WHERE owner_id = ?1 ORDER BY id", &[&owner_id])
    }

    fn list_database_instances(&self) -> Result<Vec<Site>> {
        self.query_sites("WHERE type = 'database' ORDER BY id", &[])
    }

    fn update_site(&self, site: &Site) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE sites SET name = ?1, domain = ?2, include_www = ?3, ssl_enabled = ?4,
                     ssl_config = ?5, db_type = ?6, db_host = ?7, db_port = ?8, db_name = ?9,
                     db_user = ?10, db_password = ?11, php_version = ?12, deploy_options = ?13,
                     github_repo = ?14, github_branch = ?15, github_token = ?16,
                     sftp_enabled = ?17, sftp_username = ?18, sftp_password = ?19,
                     sftp_port = ?20, updated_at = ?21
                 WHERE id = ?22",
                params![
                    site.name,
                    site.domain,
                    site.include_www,
                    site.ssl_enabled,
                    serde_json::to_string(&site.ssl_config)?,
                    site.db_type.as_str(),
                    site.db_host,
                    site.db_port,
                    site.db_name,
                    site.db_user,
                    site.db_password,
                    site.php_version,
                    serde_json::to_string(&site.deploy_options)?,
                    site.github_repo,
                    site.github_branch,
                    site.github_token,
                    site.sftp_enabled,
                    site.sftp_username,
                    site.sftp_password,
                    site.sftp_port,
                    format_datetime(&Utc::now()),
                    site.id,
                ],
            )
            .map_err(site_conflict)?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn update_site_status(
        &self,
        id: i64,
        status: SiteStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE sites SET status = ?1, status_message = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), message, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn update_site_credentials(
        &self,
        id: i64,
        db_user: Option<&str>,
        db_password: Option<&str>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE sites SET db_user = ?1, db_password = ?2, updated_at = ?3 WHERE id = ?4",
            params![db_user, db_password, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn update_site_commit(&self, id: i64, commit: &str) -> Result<()> {
        let now = format_datetime(&Utc::now());
        let rows = self.conn().execute(
            "UPDATE sites SET github_last_commit = ?1, github_last_pull = ?2, updated_at = ?2
             WHERE id = ?3",
            params![commit, now, id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_site(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM sites WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Site grant operations

    fn upsert_site_grant(&self, grant: &SiteGrant) -> Result<()> {
        self.conn().execute(
            "INSERT INTO site_grants (user_id, site_id, allow_bits, deny_bits, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (user_id, site_id) DO UPDATE SET
                allow_bits = excluded.allow_bits,
                deny_bits = excluded.deny_bits,
                updated_at = excluded.updated_at",
            params![
                grant.user_id,
                grant.site_id,
                i64::from(grant.allow_bits),
                i64::from(grant.deny_bits),
                format_datetime(&grant.created_at),
                format_datetime(&grant.updated_at),
            ],
        )?;
        Ok(())
    }

    fn delete_site_grant(&self, user_id: &str, site_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM site_grants WHERE user_id = ?1 AND site_id = ?2",
            params![user_id, site_id],
        )?;
        Ok(rows > 0)
    }

    fn get_site_grant(&self, user_id: &str, site_id: i64) -> Result<Option<SiteGrant>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GRANT_COLUMNS} FROM site_grants WHERE user_id = ?1 AND site_id = ?2"),
            params![user_id, site_id],
            grant_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_site_grants(&self, user_id: &str) -> Result<Vec<SiteGrant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GRANT_COLUMNS} FROM site_grants WHERE user_id = ?1 ORDER BY site_id"
        ))?;

        let rows = stmt.query_map(params![user_id], grant_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Compose config operations

    fn upsert_compose_config(&self, site_id: i64, content: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO compose_configs (site_id, content, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (site_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at",
            params![site_id, content, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn get_compose_config(&self, site_id: i64) -> Result<Option<ComposeConfig>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT site_id, content, updated_at FROM compose_configs WHERE site_id = ?1",
            params![site_id],
            |row| {
                Ok(ComposeConfig {
                    site_id: row.get(0)?,
                    content: row.get(1)?,
                    updated_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_compose_config(&self, site_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM compose_configs WHERE site_id = ?1",
            params![site_id],
        )?;
        Ok(rows > 0)
    }

    // Setting operations

    fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT key, value, updated_at FROM settings WHERE key = ?1",
            params![key],
            |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    fn list_settings(&self) -> Result<Vec<Setting>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value, updated_at FROM settings ORDER BY key")?;

        let rows = stmt.query_map([], |row| {
            Ok(Setting {
                key: row.get(0)?,
                value: row.get(1)?,
                updated_at: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    fn has_admin_token(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
