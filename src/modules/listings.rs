//! Listing cards and the `p:` callback namespace: details, owner
//! contact reveal, favorite toggle.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup,
    InputFile, ParseMode,
};
use teloxide::utils::html;

use crate::common::{BotEnv, UpdateHandler};
use crate::db::DbUserId;
use crate::entitlement;
use crate::models::Listing;
use crate::store::ListingStore;
use crate::utils::{cached_photo, callback_chat, MediaOutcome, ResultExt};

/// What happened to a card we tried to send.
pub enum CardOutcome {
    Sent,
    /// The only photo is gone from its host. The listing is stale and
    /// should be dropped from the base.
    Dead,
}

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

#[derive(Clone)]
enum CallbackData {
    View(String),
    Contact(String),
    Favorite(String),
}

fn filter_callbacks(q: CallbackQuery) -> Option<CallbackData> {
    let data = q.data.as_ref()?.strip_prefix("p:")?;
    let (action, id) = data.split_once(':')?;
    match action {
        "view" => Some(CallbackData::View(id.to_owned())),
        "contact" => Some(CallbackData::Contact(id.to_owned())),
        "fav" => Some(CallbackData::Favorite(id.to_owned())),
        _ => None,
    }
}

/// Send one listing as a photo card with action buttons. Telegram file
/// ids are sent directly; external photos go through the disk cache.
pub async fn send_card(
    bot: &Bot,
    env: &BotEnv,
    chat: ChatId,
    listing: &Listing,
) -> Result<CardOutcome> {
    let caption = card_caption(listing);
    let markup = card_markup(listing);

    let Some(photo) = listing.cover_photo() else {
        bot.send_message(chat, caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(markup)
            .await?;
        return Ok(CardOutcome::Sent);
    };

    // Photos added through the bot are stored as Telegram file ids.
    if photo.starts_with("AgAC") || photo.starts_with("BAAC") {
        bot.send_photo(chat, InputFile::file_id(photo))
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(markup)
            .await?;
        return Ok(CardOutcome::Sent);
    }

    let cache_dir = Path::new(&env.config.cache_dir);
    match cached_photo(&env.reqwest_client, cache_dir, photo).await {
        MediaOutcome::Cached(path) => {
            bot.send_photo(chat, InputFile::file(path))
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .reply_markup(markup)
                .await?;
            Ok(CardOutcome::Sent)
        }
        MediaOutcome::Dead => Ok(CardOutcome::Dead),
        MediaOutcome::Unavailable => {
            // Temporary fetch trouble. Degrade to a text card with a
            // link instead of dropping the result.
            bot.send_message(chat, format!("{caption}\n\n<a href=\"{photo}\">Photo</a>"))
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
                .reply_markup(markup)
                .await?;
            Ok(CardOutcome::Sent)
        }
    }
}

/// Delete a listing whose photo host says it is gone.
pub fn prune_dead(env: &BotEnv, listing: &Listing) {
    log::info!("pruning listing {} with a dead photo", listing.id);
    ListingStore::delete(&mut *env.conn(), &listing.id)
        .log_error("dead listing prune");
}

fn card_caption(l: &Listing) -> String {
    let mut caption = format!(
        "<b>{}</b>\n{} • ₹{}/day",
        html::escape(&l.title),
        html::escape(&l.area),
        l.price_day_inr,
    );
    let mut extras = Vec::new();
    if let Some(b) = l.bedrooms {
        extras.push(format!("{b} BHK"));
    }
    if let Some(g) = l.guests {
        extras.push(format!("up to {g} guests"));
    }
    if l.has_pool == Some(true) {
        extras.push("pool".to_owned());
    }
    if !extras.is_empty() {
        caption.push('\n');
        caption.push_str(&extras.join(" • "));
    }
    caption
}

fn card_markup(l: &Listing) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("Details", format!("p:view:{}", l.id)),
        InlineKeyboardButton::callback("Contact", format!("p:contact:{}", l.id)),
        InlineKeyboardButton::callback("Save", format!("p:fav:{}", l.id)),
    ]])
}

async fn handle_callback(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
    data: CallbackData,
) -> Result<()> {
    match data {
        CallbackData::View(id) => view(bot, env, q, &id).await,
        CallbackData::Contact(id) => contact(bot, env, q, &id).await,
        CallbackData::Favorite(id) => favorite(bot, env, q, &id).await,
    }
}

async fn view(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
    id: &str,
) -> Result<()> {
    let user_id = DbUserId::from(q.from.id);
    let (listing, entitled) = {
        let mut conn = env.conn();
        let listing = ListingStore::get(&mut *conn, id)?;
        if listing.is_some() {
            bump_viewed_count(&mut conn, user_id);
        }
        let entitled = entitlement::is_entitled(&mut conn, user_id);
        (listing, entitled)
    };

    let Some(listing) = listing else {
        bot.answer_callback_query(q.id.clone())
            .text("This listing is no longer available.")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    let mut text = card_caption(&listing);
    if let Some(baths) = listing.bathrooms {
        text.push_str(&format!("\n{baths} bathroom(s)"));
    }
    if let Some(sqft) = listing.sqft {
        text.push_str(&format!("\n{sqft} sqft"));
    }
    if let Some(descr) = &listing.description {
        text.push_str("\n\n");
        text.push_str(&html::escape(descr));
    }

    let mut markup = card_markup(&listing);
    if entitled {
        if let Some(url) = &listing.source_url {
            text.push_str(&format!("\n\n<a href=\"{url}\">Original ad</a>"));
        }
    } else {
        text.push_str(
            "\n\n<i>Premium members see the original ad and the owner's \
             contact.</i>",
        );
        markup.inline_keyboard.push(vec![InlineKeyboardButton::callback(
            "Get premium",
            "pay:menu",
        )]);
    }

    bot.send_message(callback_chat(&q), text)
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .reply_markup(markup)
        .await?;
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

async fn contact(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
    id: &str,
) -> Result<()> {
    let user_id = DbUserId::from(q.from.id);
    let (listing, entitled) = {
        let mut conn = env.conn();
        (
            ListingStore::get(&mut *conn, id)?,
            entitlement::is_entitled(&mut conn, user_id),
        )
    };

    let Some(listing) = listing else {
        bot.answer_callback_query(q.id.clone())
            .text("This listing is no longer available.")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    if !entitled {
        bot.send_message(
            callback_chat(&q),
            "Owner contacts are a premium feature. Premium pays for \
             itself with the first direct deal.",
        )
        .reply_markup(InlineKeyboardMarkup::new([[
            InlineKeyboardButton::callback("Get premium", "pay:menu"),
        ]]))
        .await?;
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    }

    let mut text = format!("<b>{}</b>\n", html::escape(&listing.title));
    match (&listing.owner_name, &listing.owner_contact) {
        (Some(name), Some(contact)) => {
            text.push_str(&format!(
                "Owner: {}\nContact: {}",
                html::escape(name),
                html::escape(contact),
            ));
        }
        (None, Some(contact)) => {
            text.push_str(&format!("Contact: {}", html::escape(contact)));
        }
        _ => match &listing.source_url {
            Some(url) => text.push_str(&format!(
                "No direct contact on file. Reach the owner through the \
                 <a href=\"{url}\">original ad</a>.",
            )),
            None => text.push_str("No contact on file for this listing."),
        },
    }

    bot.send_message(callback_chat(&q), text)
        .parse_mode(ParseMode::Html)
        .disable_web_page_preview(true)
        .await?;
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

async fn favorite(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
    id: &str,
) -> Result<()> {
    use crate::schema::users::dsl as u;
    use diesel::prelude::*;

    let user_id = DbUserId::from(q.from.id);
    let added = {
        let mut conn = env.conn();
        let user = crate::db::ensure_user(&mut conn, user_id)?;
        let mut added = false;
        let favorites = user.favorites.map(|favs| {
            let mut favs = favs.clone();
            if let Some(pos) = favs.iter().position(|f| f == id) {
                favs.remove(pos);
            } else {
                favs.push(id.to_owned());
                added = true;
            }
            favs
        })?;
        diesel::update(u::users.find(user_id))
            .set(u::favorites.eq(favorites))
            .execute(&mut *conn)?;
        added
    };

    bot.answer_callback_query(q.id.clone())
        .text(if added { "Saved to favorites." } else { "Removed from favorites." })
        .await?;
    Ok(())
}

fn bump_viewed_count(conn: &mut diesel::SqliteConnection, user_id: DbUserId) {
    use crate::schema::users::dsl as u;
    use diesel::prelude::*;

    let _ = crate::db::ensure_user(conn, user_id).log_error("ensure user");
    diesel::update(u::users.find(user_id))
        .set(u::viewed_count.eq(u::viewed_count + 1))
        .execute(conn)
        .log_error("viewed_count bump");
}
