use anyhow::Result;
use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::SqliteConnection;
use diesel_derive_newtype::DieselNewType;
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

use crate::models::{User, UserRole};
use crate::utils::Sqlizer;

/// A newtype wrapper for a Telegram user id to be stored in the database.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    DieselNewType,
)]
pub struct DbUserId(i64);

impl From<UserId> for DbUserId {
    fn from(id: UserId) -> Self {
        Self(id.0.try_into().expect("UserId is too big"))
    }
}

impl From<DbUserId> for UserId {
    fn from(id: DbUserId) -> Self {
        Self(id.0.try_into().expect("DbUserId is too big"))
    }
}

/// Create missing tables. The original backing store was schemaless, so a
/// fresh database file (or `:memory:` in tests) must be usable as-is.
pub fn init_schema(conn: &mut SqliteConnection) -> Result<()> {
    conn.batch_execute(
        "CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            area TEXT NOT NULL,
            price_day_inr BIGINT NOT NULL,
            bedrooms INTEGER,
            bathrooms INTEGER,
            sqft INTEGER,
            guests INTEGER,
            has_pool BOOLEAN,
            photos TEXT NOT NULL,
            owner_type TEXT NOT NULL,
            status TEXT NOT NULL,
            source TEXT NOT NULL,
            source_id TEXT,
            source_url TEXT,
            owner_name TEXT,
            owner_contact TEXT,
            description TEXT,
            created_at TIMESTAMP NOT NULL
        );
        CREATE INDEX IF NOT EXISTS listings_status_price
            ON listings (status, price_day_inr);
        CREATE INDEX IF NOT EXISTS listings_source_id
            ON listings (source_id);

        CREATE TABLE IF NOT EXISTS users (
            id BIGINT PRIMARY KEY NOT NULL,
            role TEXT NOT NULL,
            is_premium BOOLEAN NOT NULL DEFAULT 0,
            premium_until TIMESTAMP,
            premium_source TEXT,
            favorites TEXT NOT NULL DEFAULT '[]',
            viewed_count INTEGER NOT NULL DEFAULT 0,
            added_this_week INTEGER NOT NULL DEFAULT 0,
            week_start TEXT,
            bonus_week TEXT,
            last_seen TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY NOT NULL,
            user_id BIGINT NOT NULL,
            query TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS proposals (
            rowid INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            agent_id BIGINT NOT NULL,
            body TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        );",
    )?;
    Ok(())
}

/// Load a user row, creating a default client row on first contact.
pub fn ensure_user(conn: &mut SqliteConnection, id: DbUserId) -> Result<User> {
    use crate::schema::users::dsl as u;
    if let Some(user) =
        u::users.find(id).first::<User>(conn).optional()?
    {
        return Ok(user);
    }
    let user = User {
        id,
        role: UserRole::Client,
        is_premium: false,
        premium_until: None,
        premium_source: None,
        favorites: Sqlizer::new(vec![])?,
        viewed_count: 0,
        added_this_week: 0,
        week_start: None,
        bonus_week: None,
        last_seen: Utc::now().naive_utc(),
    };
    diesel::insert_into(u::users).values(&user).execute(conn)?;
    Ok(user)
}

pub fn touch_last_seen(conn: &mut SqliteConnection, id: DbUserId) -> Result<()> {
    use crate::schema::users::dsl as u;
    ensure_user(conn, id)?;
    diesel::update(u::users.find(id))
        .set(u::last_seen.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}
