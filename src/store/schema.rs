pub const SCHEMA: &str = r#"
-- Users own sites; tokens are just auth credentials for users
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    can_create_sites INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Tokens are auth credentials; non-admin tokens must belong to a user
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- first 8 chars of ID for fast lookup
    is_admin INTEGER NOT NULL DEFAULT 0,
    user_id TEXT REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,            -- NULL = never
    last_used_at TEXT
);

-- Deployed sites and standalone database instances
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    container_name TEXT NOT NULL UNIQUE CHECK (container_name <> ''),
    domain TEXT NOT NULL DEFAULT '',
    include_www INTEGER NOT NULL DEFAULT 0,
    ssl_enabled INTEGER NOT NULL DEFAULT 0,
    ssl_config TEXT NOT NULL DEFAULT '{}',   -- JSON: challenge, dns_provider, credentials

    -- Runtime state, only written by deploy/lifecycle operations
    status TEXT NOT NULL DEFAULT 'stopped',
    status_message TEXT,

    -- Database linkage
    db_type TEXT NOT NULL DEFAULT 'none',
    db_host TEXT,
    db_port INTEGER,
    db_name TEXT,
    db_user TEXT,
    db_password TEXT,           -- JSON {root, user} for database instances

    php_version TEXT,
    deploy_options TEXT NOT NULL DEFAULT '{}',

    -- Source deploy linkage
    github_repo TEXT,
    github_branch TEXT,
    github_token TEXT,
    github_last_commit TEXT,
    github_last_pull TEXT,

    -- SFTP linkage
    sftp_enabled INTEGER NOT NULL DEFAULT 0,
    sftp_username TEXT,
    sftp_password TEXT,
    sftp_port INTEGER,

    owner_id TEXT NOT NULL REFERENCES users(id),
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Site grants: access a non-owner user has for a site
CREATE TABLE IF NOT EXISTS site_grants (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    site_id INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    allow_bits INTEGER NOT NULL DEFAULT 0,
    deny_bits INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, site_id)
);

-- Last written topology per site (site_id 0 = global proxy topology)
CREATE TABLE IF NOT EXISTS compose_configs (
    site_id INTEGER PRIMARY KEY,
    content TEXT NOT NULL,
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Create indexes
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);
CREATE INDEX IF NOT EXISTS idx_sites_owner ON sites(owner_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sites_domain ON sites(domain) WHERE type <> 'database';
CREATE UNIQUE INDEX IF NOT EXISTS idx_sites_instance_port ON sites(db_port)
    WHERE type = 'database' AND db_port IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_site_grants_user ON site_grants(user_id);
"#;
