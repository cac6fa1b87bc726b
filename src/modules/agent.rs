//! Agent-side features: registration, the add-listing dialogue, and the
//! weekly contribution bonus.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use macro_rules_attribute::derive;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode,
};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

use crate::common::{
    filter_command, BotCommandsExt, BotEnv, ListingDraft, MyDialogue, State,
    UpdateHandler,
};
use crate::db::DbUserId;
use crate::models::{ListingSource, NewListing, OwnerType, UserRole};
use crate::search::filters::normalize_area;
use crate::store::ListingStore;
use crate::utils::{callback_chat, BotExt};

/// Listings one agent may add in a week before the bonus fires.
const BONUS_THRESHOLD: i32 = 5;
const BONUS_DAYS: i64 = 7;
const MAX_PHOTOS: usize = 4;

#[derive(Debug, BotCommands, Clone, BotCommandsExt!)]
#[command(
    rename_rule = "snake_case",
    description = "Agent commands:"
)]
enum Command {
    #[command(description = "start working with the bot as an agent.")]
    #[custom(in_group = false)]
    RegisterAgent,

    #[command(description = "add a listing to the base.")]
    #[custom(agent = true, in_group = false)]
    AddListing,

    #[command(description = "run a scraper pass now.")]
    #[custom(admin = true)]
    Ingest,
}

pub fn command_handler() -> UpdateHandler {
    filter_command::<Command>().endpoint(handle_command)
}

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

async fn handle_command(
    bot: Bot,
    env: Arc<BotEnv>,
    dialogue: MyDialogue,
    msg: Message,
    command: Command,
) -> Result<()> {
    match command {
        Command::RegisterAgent => register_agent(bot, env, msg).await,
        Command::AddListing => {
            dialogue.update(State::AddListingTitle).await?;
            bot.reply_message(&msg, "What is the listing called? One line.")
                .await?;
            Ok(())
        }
        Command::Ingest => {
            bot.reply_message(&msg, "Scraping now, this takes a while.")
                .await?;
            let added = crate::modules::ingest::run_once(&env).await?;
            bot.reply_message(&msg, format!("Done, {added} new listings."))
                .await?;
            Ok(())
        }
    }
}

async fn register_agent(bot: Bot, env: Arc<BotEnv>, msg: Message) -> Result<()> {
    use crate::schema::users::dsl as u;

    let Some(from) = msg.from() else { return Ok(()) };
    let user_id = DbUserId::from(from.id);
    {
        let mut conn = env.conn();
        crate::db::ensure_user(&mut conn, user_id)?;
        diesel::update(u::users.find(user_id))
            .set(u::role.eq(UserRole::Agent))
            .execute(&mut *conn)?;
    }
    bot.reply_message(
        &msg,
        format!(
            "You are registered as an agent. Add listings with \
             /add_listing; {BONUS_THRESHOLD} in one week earn you \
             {BONUS_DAYS} days of premium.",
        ),
    )
    .await?;
    Ok(())
}

// Add-listing dialogue, one endpoint per step.

pub async fn add_listing_title(
    bot: Bot,
    dialogue: MyDialogue,
    msg: Message,
) -> Result<()> {
    let Some(title) = msg.text() else {
        bot.reply_message(&msg, "A text title, please.").await?;
        return Ok(());
    };
    let draft = ListingDraft { title: title.to_owned(), ..Default::default() };
    dialogue.update(State::AddListingParams { draft }).await?;
    bot.reply_message(
        &msg,
        "Now the numbers: price per day in INR, area, and optionally \
         bedrooms and guests, comma separated.\n\
         Example: 3500, Anjuna, 2, 4",
    )
    .await?;
    Ok(())
}

pub async fn add_listing_params(
    bot: Bot,
    dialogue: MyDialogue,
    mut draft: ListingDraft,
    msg: Message,
) -> Result<()> {
    let parsed = msg.text().and_then(parse_params);
    let Some((price, area, bedrooms, guests)) = parsed else {
        bot.reply_message(
            &msg,
            "Could not read that. Price first, then a North Goa area I \
             know, e.g.: 3500, Anjuna, 2, 4",
        )
        .await?;
        return Ok(());
    };
    draft.price_day_inr = price;
    draft.area = area.to_owned();
    draft.bedrooms = bedrooms;
    draft.guests = guests;
    dialogue.update(State::AddListingPhotos { draft }).await?;
    bot.reply_message(
        &msg,
        format!(
            "Send up to {MAX_PHOTOS} photos, one message each. Say \
             \"done\" when finished, or \"skip\" for no photos.",
        ),
    )
    .await?;
    Ok(())
}

pub async fn add_listing_photos(
    bot: Bot,
    dialogue: MyDialogue,
    mut draft: ListingDraft,
    msg: Message,
) -> Result<()> {
    if let Some(sizes) = msg.photo() {
        // The last size is the largest rendition.
        if let Some(best) = sizes.last() {
            draft.photos.push(best.file.id.clone());
        }
        let have = draft.photos.len();
        if have < MAX_PHOTOS {
            dialogue.update(State::AddListingPhotos { draft }).await?;
            bot.reply_message(
                &msg,
                format!("Got it, {have} so far. More, or \"done\"?"),
            )
            .await?;
            return Ok(());
        }
    } else {
        match msg.text().map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case("done")
                || t.eq_ignore_ascii_case("skip") => {}
            _ => {
                bot.reply_message(&msg, "A photo, \"done\", or \"skip\".")
                    .await?;
                return Ok(());
            }
        }
    }
    dialogue.update(State::AddListingDescription { draft }).await?;
    bot.reply_message(
        &msg,
        "A short description for clients, or \"skip\".",
    )
    .await?;
    Ok(())
}

pub async fn add_listing_description(
    bot: Bot,
    dialogue: MyDialogue,
    mut draft: ListingDraft,
    msg: Message,
) -> Result<()> {
    let Some(text) = msg.text().map(str::trim) else {
        bot.reply_message(&msg, "Text, please, or \"skip\".").await?;
        return Ok(());
    };
    if !text.eq_ignore_ascii_case("skip") {
        draft.description = Some(text.to_owned());
    }
    let preview = draft_preview(&draft);
    dialogue.update(State::AddListingConfirm { draft }).await?;
    bot.reply_message(&msg, preview)
        .parse_mode(ParseMode::Html)
        .reply_markup(InlineKeyboardMarkup::new([[
            InlineKeyboardButton::callback("Publish", "a:ok"),
            InlineKeyboardButton::callback("Cancel", "a:cancel"),
        ]]))
        .await?;
    Ok(())
}

#[derive(Clone, Copy)]
enum CallbackData {
    Publish,
    Cancel,
}

fn filter_callbacks(q: CallbackQuery) -> Option<CallbackData> {
    match q.data.as_deref()? {
        "a:ok" => Some(CallbackData::Publish),
        "a:cancel" => Some(CallbackData::Cancel),
        _ => None,
    }
}

async fn handle_callback(
    bot: Bot,
    env: Arc<BotEnv>,
    storage: Arc<InMemStorage<State>>,
    q: CallbackQuery,
    data: CallbackData,
) -> Result<()> {
    let chat = callback_chat(&q);
    let dialogue = MyDialogue::new(storage, chat);
    let Some(State::AddListingConfirm { draft }) = dialogue.get().await? else {
        bot.answer_callback_query(q.id.clone())
            .text("This draft has expired. Start over with /add_listing.")
            .await?;
        return Ok(());
    };
    dialogue.exit().await?;

    if matches!(data, CallbackData::Cancel) {
        bot.answer_callback_query(q.id.clone()).await?;
        bot.send_message(chat, "Cancelled, nothing was published.").await?;
        return Ok(());
    }

    let contact = q
        .from
        .username
        .as_ref()
        .map_or_else(|| q.from.first_name.clone(), |u| format!("@{u}"));
    let new = NewListing {
        title: draft.title,
        area: draft.area,
        price_day_inr: draft.price_day_inr,
        bedrooms: draft.bedrooms,
        guests: draft.guests,
        photos: draft.photos,
        owner_type: Some(OwnerType::Agent),
        source: Some(ListingSource::Manual),
        owner_name: Some(q.from.first_name.clone()),
        owner_contact: Some(contact),
        description: draft.description,
        ..Default::default()
    };

    let (listing, bonus) = {
        let mut conn = env.conn();
        let listing = ListingStore::insert(&mut *conn, new)?;
        let bonus = record_contribution(&mut conn, q.from.id.into())?;
        (listing, bonus)
    };

    bot.answer_callback_query(q.id.clone()).await?;
    bot.send_message(
        chat,
        format!("Published. Clients searching {} will see it.", listing.area),
    )
    .await?;
    if bonus {
        bot.send_message(
            chat,
            format!(
                "{BONUS_THRESHOLD} listings this week: you earned \
                 {BONUS_DAYS} days of premium. Thank you!",
            ),
        )
        .await?;
    }
    Ok(())
}

/// "price, area[, bedrooms[, guests]]", comma separated.
fn parse_params(text: &str) -> Option<(i64, &'static str, Option<i32>, Option<i32>)> {
    let mut parts = text.split(',').map(str::trim);
    let price: i64 = parts
        .next()?
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    let area = normalize_area(parts.next()?)?;
    let bedrooms = parts.next().and_then(|p| p.parse().ok());
    let guests = parts.next().and_then(|p| p.parse().ok());
    (price > 0).then_some((price, area, bedrooms, guests))
}

fn draft_preview(draft: &ListingDraft) -> String {
    let mut text = format!(
        "<b>{}</b>\n{} • ₹{}/day",
        html::escape(&draft.title),
        html::escape(&draft.area),
        draft.price_day_inr,
    );
    if let Some(b) = draft.bedrooms {
        text.push_str(&format!("\n{b} BHK"));
    }
    if let Some(g) = draft.guests {
        text.push_str(&format!("\nup to {g} guests"));
    }
    text.push_str(&format!("\n{} photo(s)", draft.photos.len()));
    if let Some(descr) = &draft.description {
        text.push_str("\n\n");
        text.push_str(&html::escape(descr));
    }
    text.push_str("\n\nPublish it?");
    text
}

/// Count one added listing towards the agent's week and grant the bonus
/// when the threshold is crossed. The week key rolls the counter over;
/// `bonus_week` makes sure the bonus fires at most once per week.
pub fn record_contribution(
    conn: &mut SqliteConnection,
    agent: DbUserId,
) -> Result<bool> {
    use crate::schema::users::dsl as u;

    let week = Utc::now().format("%Y-%W").to_string();
    let user = crate::db::ensure_user(conn, agent)?;

    let added = if user.week_start.as_deref() == Some(&week) {
        user.added_this_week + 1
    } else {
        1
    };
    diesel::update(u::users.find(agent))
        .set((
            u::added_this_week.eq(added),
            u::week_start.eq(Some(week.clone())),
        ))
        .execute(conn)?;

    if added >= BONUS_THRESHOLD && user.bonus_week.as_deref() != Some(&week) {
        crate::entitlement::grant_days(conn, agent, BONUS_DAYS, "agent_bonus")?;
        diesel::update(u::users.find(agent))
            .set(u::bonus_week.eq(Some(week)))
            .execute(conn)?;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use diesel::Connection;
    use teloxide::types::UserId;

    use super::*;

    fn test_conn() -> SqliteConnection {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        crate::db::init_schema(&mut conn).unwrap();
        conn
    }

    fn added_this_week(conn: &mut SqliteConnection, agent: DbUserId) -> i32 {
        use crate::schema::users::dsl as u;
        u::users
            .find(agent)
            .select(u::added_this_week)
            .first(conn)
            .unwrap()
    }

    #[test]
    fn bonus_fires_once_per_week() {
        let mut conn = test_conn();
        let agent = DbUserId::from(UserId(7));

        for i in 1..BONUS_THRESHOLD {
            assert!(!record_contribution(&mut conn, agent).unwrap());
            assert_eq!(added_this_week(&mut conn, agent), i);
        }
        // Fifth listing crosses the threshold.
        assert!(record_contribution(&mut conn, agent).unwrap());
        assert!(crate::entitlement::is_entitled(&mut conn, agent));
        // Further listings this week count but grant nothing.
        assert!(!record_contribution(&mut conn, agent).unwrap());
        assert_eq!(
            added_this_week(&mut conn, agent),
            BONUS_THRESHOLD + 1
        );
    }

    #[test]
    fn params_parsing() {
        let (price, area, bedrooms, guests) =
            parse_params("₹3500, anjuna beach, 2, 4").unwrap();
        assert_eq!(price, 3500);
        assert_eq!(area, "Anjuna");
        assert_eq!(bedrooms, Some(2));
        assert_eq!(guests, Some(4));

        let (price, area, bedrooms, guests) =
            parse_params("12000, Morjim").unwrap();
        assert_eq!((price, area), (12000, "Morjim"));
        assert_eq!((bedrooms, guests), (None, None));

        assert!(parse_params("cheap, Anjuna").is_none());
        assert!(parse_params("3500, Atlantis").is_none());
        assert!(parse_params("3500").is_none());
    }
}
