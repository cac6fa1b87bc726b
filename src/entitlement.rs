//! Premium gate: decides whether a viewer may see contact details.
//!
//! Expiry is corrected lazily: a read that finds a past `premium_until`
//! flips the flag and persists the correction. Any failure to determine
//! premium state means "not entitled"; gating errs on the side of the
//! business, never open.

use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::db::DbUserId;
use crate::utils::ResultExt;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PremiumInfo {
    pub active: bool,
    pub days_left: i64,
}

/// Remaining whole days, rounded **up**. Five hours left reads as
/// "1 day left", never "0 days left".
pub fn days_left_at(until: NaiveDateTime, now: NaiveDateTime) -> i64 {
    let secs = (until - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 86_399) / 86_400
    }
}

pub fn premium_info(
    conn: &mut SqliteConnection,
    user_id: DbUserId,
) -> PremiumInfo {
    use crate::schema::users::dsl as u;

    let row: Option<(bool, Option<NaiveDateTime>)> = match u::users
        .find(user_id)
        .select((u::is_premium, u::premium_until))
        .first(conn)
        .optional()
    {
        Ok(row) => row,
        Err(e) => {
            // fail closed
            log::error!("premium lookup failed for {user_id:?}: {e}");
            return PremiumInfo::default();
        }
    };

    let now = Utc::now().naive_utc();
    match row {
        None | Some((false, _)) => PremiumInfo::default(),
        Some((true, Some(until))) if until > now => {
            PremiumInfo { active: true, days_left: days_left_at(until, now) }
        }
        // expired, or flag set with no expiry at all: correct the row
        Some((true, _)) => {
            diesel::update(u::users.find(user_id))
                .set(u::is_premium.eq(false))
                .execute(conn)
                .log_error("premium expiry correction");
            PremiumInfo::default()
        }
    }
}

pub fn is_entitled(conn: &mut SqliteConnection, user_id: DbUserId) -> bool {
    premium_info(conn, user_id).active
}

/// Extend premium by `days`, counting from the current expiry when it is
/// still in the future, otherwise from now. Returns the new expiry.
pub fn grant_days(
    conn: &mut SqliteConnection,
    user_id: DbUserId,
    days: i64,
    source: &str,
) -> Result<NaiveDateTime> {
    use crate::schema::users::dsl as u;

    let user = crate::db::ensure_user(conn, user_id)?;
    let now = Utc::now().naive_utc();
    let base = match user.premium_until {
        Some(until) if until > now => until,
        _ => now,
    };
    let until = base + Duration::days(days);
    diesel::update(u::users.find(user_id))
        .set((
            u::is_premium.eq(true),
            u::premium_until.eq(Some(until)),
            u::premium_source.eq(Some(source)),
        ))
        .execute(conn)?;
    Ok(until)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        crate::db::init_schema(&mut conn).unwrap();
        conn
    }

    fn uid(n: u64) -> DbUserId {
        teloxide::types::UserId(n).into()
    }

    #[test]
    fn days_left_rounds_up() {
        let now = Utc::now().naive_utc();
        assert_eq!(days_left_at(now + Duration::hours(5), now), 1);
        assert_eq!(days_left_at(now + Duration::hours(36), now), 2);
        assert_eq!(days_left_at(now + Duration::days(7), now), 7);
        assert_eq!(days_left_at(now - Duration::hours(1), now), 0);
    }

    #[test]
    fn unknown_user_is_not_entitled() {
        let mut conn = conn();
        assert!(!is_entitled(&mut conn, uid(1)));
    }

    #[test]
    fn grant_then_check() {
        let mut conn = conn();
        grant_days(&mut conn, uid(1), 7, "test").unwrap();
        let info = premium_info(&mut conn, uid(1));
        assert!(info.active);
        assert_eq!(info.days_left, 7);
    }

    #[test]
    fn grant_extends_future_expiry() {
        let mut conn = conn();
        grant_days(&mut conn, uid(1), 7, "test").unwrap();
        grant_days(&mut conn, uid(1), 30, "test").unwrap();
        assert_eq!(premium_info(&mut conn, uid(1)).days_left, 37);
    }

    #[test]
    fn expired_premium_is_corrected_on_read() {
        use crate::schema::users::dsl as u;
        let mut conn = conn();
        crate::db::ensure_user(&mut conn, uid(2)).unwrap();
        diesel::update(u::users.find(uid(2)))
            .set((
                u::is_premium.eq(true),
                u::premium_until
                    .eq(Some(Utc::now().naive_utc() - Duration::days(1))),
            ))
            .execute(&mut conn)
            .unwrap();

        assert!(!is_entitled(&mut conn, uid(2)));
        // the flag itself was flipped and persisted
        let flag: bool = u::users
            .find(uid(2))
            .select(u::is_premium)
            .first(&mut conn)
            .unwrap();
        assert!(!flag);
    }

    #[test]
    fn premium_flag_without_expiry_fails_closed() {
        use crate::schema::users::dsl as u;
        let mut conn = conn();
        crate::db::ensure_user(&mut conn, uid(3)).unwrap();
        diesel::update(u::users.find(uid(3)))
            .set(u::is_premium.eq(true))
            .execute(&mut conn)
            .unwrap();
        assert!(!is_entitled(&mut conn, uid(3)));
    }
}
