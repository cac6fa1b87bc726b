//! Daily nudges for clients who browsed listings but went quiet
//! without going premium.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tokio_util::sync::CancellationToken;

use crate::common::BotEnv;
use crate::db::DbUserId;
use crate::utils::{private_chat, ResultExt};

const INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Rotated by the user's viewed-listings count, so repeat reminders
/// read differently.
const REMINDERS: &[&str] = &[
    "Still looking? New places appear in the base every day. Send me \
     what you need and I will check again.",
    "The good listings in North Goa go fast. Premium members reach \
     owners directly, before the agents call.",
    "A quick reminder: your search is saved. One tap on Broadcast and \
     local agents start working on it for you.",
    "Owners answer faster than listings update. Premium opens their \
     contacts so you can settle the price today.",
];

pub async fn task(bot: Bot, env: Arc<BotEnv>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(INTERVAL) => {}
            () = cancel.cancelled() => return,
        }
        send_reminders(&bot, &env).await;
    }
}

async fn send_reminders(bot: &Bot, env: &BotEnv) {
    use crate::schema::users::dsl as u;

    let cutoff = Utc::now().naive_utc() - chrono::Duration::days(1);
    let targets: Vec<(DbUserId, i32)> = {
        let mut conn = env.conn();
        u::users
            .filter(u::is_premium.eq(false))
            .filter(u::viewed_count.gt(0))
            .filter(u::last_seen.lt(cutoff))
            .select((u::id, u::viewed_count))
            .load(&mut *conn)
            .log_ok("reminder query")
            .unwrap_or_default()
    };

    for (user, viewed) in targets {
        let text = REMINDERS
            [usize::try_from(viewed).unwrap_or(0) % REMINDERS.len()];
        bot.send_message(private_chat(user.into()), text)
            .reply_markup(InlineKeyboardMarkup::new([[
                InlineKeyboardButton::callback("Get premium", "pay:menu"),
            ]]))
            .await
            .log_error("reminder send");
        // Telegram rate limits broadcast-style sends.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
