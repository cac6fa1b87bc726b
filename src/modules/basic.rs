//! Basic commands: /start, /help, /profile, /version, plus last-seen
//! tracking for every incoming update.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use macro_rules_attribute::derive;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

use crate::common::{filter_command, BotCommandsExt, BotEnv, UpdateHandler};
use crate::db::DbUserId;
use crate::entitlement;
use crate::models::User;
use crate::store::ListingStore;
use crate::utils::{BotExt, ResultExt};

const WELCOME_TEXT: &str = "\
<b>Honest, smart housing search in North Goa</b>\n\n\
Why this bot:\n\n\
1. You see everything on the market: one full base, no hidden \
listings.\n\
2. You save up to 50%: thousands of places direct from owners, no \
agent markup.\n\
3. Premium unlocks the owner's contact so you can message them \
directly and haggle.\n\n\
Just tell me what you are looking for, by text or voice, and I will \
do the rest.";

#[derive(Debug, BotCommands, Clone, BotCommandsExt!)]
#[command(
    rename_rule = "snake_case",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "what this bot does.")]
    Start,

    #[command(description = "display this text.")]
    Help,

    #[command(description = "premium status and favorites.")]
    Profile,

    #[command(description = "show bot version.")]
    Version,
}

pub fn command_handler() -> UpdateHandler {
    filter_command::<Command>().endpoint(handle_command)
}

/// Keeps `last_seen` current for everyone the bot hears from. Attached
/// as a dispatcher inspect, before any handler.
pub fn inspect_update(update: Update, env: Arc<BotEnv>) {
    if let Some(user) = update.user() {
        crate::db::touch_last_seen(&mut env.conn(), user.id.into())
            .log_error("last_seen update");
    }
}

async fn handle_command(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    command: Command,
) -> Result<()> {
    match command {
        Command::Start => {
            if let Some(user) = msg.from() {
                crate::db::ensure_user(&mut env.conn(), user.id.into())?;
            }
            bot.reply_message(&msg, WELCOME_TEXT)
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
                .await?;
        }
        Command::Help => {
            bot.reply_message(&msg, Command::descriptions().to_string())
                .await?;
        }
        Command::Profile => cmd_profile(bot, env, msg).await?,
        Command::Version => {
            bot.reply_message(&msg, crate::version()).await?;
        }
    }
    Ok(())
}

async fn cmd_profile(bot: Bot, env: Arc<BotEnv>, msg: Message) -> Result<()> {
    let Some(from) = msg.from() else { return Ok(()) };
    let user_id = DbUserId::from(from.id);

    let (info, user, favorites) = {
        let mut conn = env.conn();
        let info = entitlement::premium_info(&mut conn, user_id);
        let user: User = crate::db::ensure_user(&mut conn, user_id)?;
        let favorites = user
            .favorites
            .iter()
            .filter_map(|id| ListingStore::get(&mut *conn, id).ok().flatten())
            .collect::<Vec<_>>();
        (info, user, favorites)
    };

    let mut text = format!("Hi, <b>{}</b>!\n\n", html::escape(&from.first_name));
    if info.active {
        write!(
            text,
            "Status: <b>premium active</b>, {} day(s) left.",
            info.days_left
        )?;
    } else {
        text.push_str(
            "Status: standard. Premium unlocks owner contacts and \
             priority search.",
        );
    }
    if user.role == crate::models::UserRole::Agent {
        write!(
            text,
            "\nAgent: {} listing(s) added this week.",
            user.added_this_week
        )?;
    }

    text.push_str("\n\n<b>Favorites:</b>\n");
    if favorites.is_empty() {
        text.push_str("(empty — tap Save on any listing)");
    }
    let mut buttons: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for l in &favorites {
        writeln!(
            text,
            "• <b>{}</b> — {}, ₹{}/day",
            html::escape(&l.title),
            html::escape(&l.area),
            l.price_day_inr
        )?;
        buttons.push(vec![InlineKeyboardButton::callback(
            format!("Open: {}", l.title),
            format!("p:view:{}", l.id),
        )]);
    }
    if !info.active {
        buttons.push(vec![InlineKeyboardButton::callback(
            "Get premium",
            "pay:menu",
        )]);
    }

    bot.reply_message(&msg, text)
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .reply_markup(InlineKeyboardMarkup::new(buttons))
        .await?;
    Ok(())
}
