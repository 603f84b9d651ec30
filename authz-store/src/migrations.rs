//! Idempotent DDL for the PostgreSQL store.
//!
//! Two logical tables carry the whole system: `relationship_tuples` and
//! `authorization_models`, plus a single-row counter that mints consistency
//! tokens inside write transactions.
//!
//! `user_relation` uses the empty string, not NULL, for concrete subjects so
//! the full tuple key can be the primary key (NULLs never compare equal in a
//! unique index).

pub const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS relationship_tuples (
        user_type     TEXT NOT NULL,
        user_id       TEXT NOT NULL,
        user_relation TEXT NOT NULL DEFAULT '',
        relation      TEXT NOT NULL,
        object_type   TEXT NOT NULL,
        object_id     TEXT NOT NULL,
        inserted_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        txid          BIGINT NOT NULL,
        PRIMARY KEY (object_type, object_id, relation, user_type, user_id, user_relation)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS relationship_tuples_by_user
        ON relationship_tuples (user_type, user_id, relation, object_type)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS authorization_models (
        id            UUID PRIMARY KEY,
        version_id    TEXT NOT NULL UNIQUE,
        dsl_source    TEXT NOT NULL,
        compiled_blob TEXT NOT NULL,
        is_active     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS authorization_models_single_active
        ON authorization_models (is_active) WHERE is_active
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consistency_tokens (
        singleton BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
        token     BIGINT NOT NULL
    )
    "#,
    r#"
    INSERT INTO consistency_tokens (singleton, token)
        VALUES (TRUE, 0)
        ON CONFLICT (singleton) DO NOTHING
    "#,
];
