//! Conversational search entry point: free-form text and voice
//! messages become listing queries, results go out as card pages.

use std::sync::Arc;

use anyhow::Result;
use async_openai::types::CreateTranscriptionRequestArgs;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatAction, ChatId, InlineKeyboardButton,
    InlineKeyboardMarkup,
};

use crate::common::{BotEnv, UpdateHandler};
use crate::models::Listing;
use crate::modules::listings::{self, CardOutcome};
use crate::search::assembler;
use crate::search::intent::{self, SearchIntent};
use crate::search::pagination::PAGE_SIZE;
use crate::utils::{callback_chat, BotExt};

pub fn message_handler() -> UpdateHandler {
    dptree::entry()
        .branch(
            dptree::filter(|msg: Message| {
                msg.chat.is_private() && msg.voice().is_some()
            })
            .endpoint(handle_voice),
        )
        .branch(dptree::filter_map(plain_query).endpoint(handle_text))
}

pub fn callback_handler() -> UpdateHandler {
    dptree::filter(|q: CallbackQuery| q.data.as_deref() == Some("s:more"))
        .endpoint(handle_more)
}

/// Non-command text in a private chat is treated as a search query.
fn plain_query(msg: Message) -> Option<String> {
    if !msg.chat.is_private() {
        return None;
    }
    let text = msg.text()?.trim();
    if text.is_empty() || text.starts_with('/') {
        return None;
    }
    Some(text.to_owned())
}

async fn handle_text(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    query: String,
) -> Result<()> {
    run_search(&bot, &env, &msg, &query).await
}

async fn handle_voice(bot: Bot, env: Arc<BotEnv>, msg: Message) -> Result<()> {
    let Some(voice) = msg.voice() else { return Ok(()) };
    if env.config.services.openai.disable {
        bot.reply_message(
            &msg,
            "Voice recognition is switched off. Please type your query.",
        )
        .await?;
        return Ok(());
    }

    let file = bot.get_file(voice.file.id.clone()).await?;
    let path = std::env::temp_dir()
        .join(format!("nestbot-{}.ogg", file.meta.unique_id));
    {
        let mut dst = tokio::fs::File::create(&path).await?;
        bot.download_file(&file.path, &mut dst).await?;
    }

    let request = CreateTranscriptionRequestArgs::default()
        .file(path.display().to_string())
        .model("whisper-1")
        .build()?;
    let transcribed = env.openai_client.audio().transcribe(request).await;
    tokio::fs::remove_file(&path).await.ok();
    crate::metrics::update_service("openai", transcribed.is_ok());

    let text = match transcribed {
        Ok(response) => response.text,
        Err(e) => {
            log::warn!("transcription failed: {e}");
            bot.reply_message(
                &msg,
                "I could not make out the audio. Please type your query.",
            )
            .await?;
            return Ok(());
        }
    };
    let text = text.trim();
    if text.is_empty() {
        bot.reply_message(
            &msg,
            "I could not hear anything there. Please type your query.",
        )
        .await?;
        return Ok(());
    }

    bot.reply_message(&msg, format!("Heard: \"{text}\"")).await?;
    run_search(&bot, &env, &msg, text).await
}

async fn run_search(
    bot: &Bot,
    env: &BotEnv,
    msg: &Message,
    query: &str,
) -> Result<()> {
    let Some(from) = msg.from() else { return Ok(()) };
    let requester = from.id;
    env.remember_query(requester, query);

    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;

    let intent = if env.config.services.oracle.disable {
        SearchIntent::default()
    } else {
        intent::extract(&env.oracle, query).await
    };

    let outcome = {
        let mut conn = env.conn();
        assembler::run(&mut *conn, &intent)
    };
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("search for {requester} failed: {e}");
            bot.reply_message(msg, "Something went wrong. Try again later.")
                .await?;
            return Ok(());
        }
    };

    if outcome.listings.is_empty() {
        env.sessions.clear(requester);
        bot.reply_message(
            msg,
            "Nothing in the base matches that yet. Broadcast your ask to \
             local agents and they will send options directly.",
        )
        .reply_markup(broadcast_markup())
        .await?;
        return Ok(());
    }

    if outcome.relaxed {
        bot.reply_message(
            msg,
            "No exact matches, so here is the closest I have:",
        )
        .await?;
    }

    let mut page = outcome.listings;
    let tail = page.split_off(page.len().min(PAGE_SIZE));
    let sent = send_page(bot, env, msg.chat.id, &page).await;
    let remaining = tail.len();
    env.sessions.stash(requester, tail);

    send_footer(bot, msg.chat.id, sent, remaining).await
}

async fn handle_more(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
) -> Result<()> {
    let chat = callback_chat(&q);
    let Some((page, remaining)) = env.sessions.take_next(q.from.id, PAGE_SIZE)
    else {
        bot.answer_callback_query(q.id.clone())
            .text("No more results. Send a new query any time.")
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id.clone()).await?;
    let sent = send_page(&bot, &env, chat, &page).await;
    send_footer(&bot, chat, sent, remaining).await
}

/// Send a page of cards, dropping listings whose photo host reports
/// them gone. Returns how many cards went out.
async fn send_page(
    bot: &Bot,
    env: &BotEnv,
    chat: ChatId,
    page: &[Listing],
) -> usize {
    let mut sent = 0;
    for listing in page {
        match listings::send_card(bot, env, chat, listing).await {
            Ok(CardOutcome::Sent) => sent += 1,
            Ok(CardOutcome::Dead) => listings::prune_dead(env, listing),
            Err(e) => log::warn!("card for {} failed: {e}", listing.id),
        }
    }
    sent
}

async fn send_footer(
    bot: &Bot,
    chat: ChatId,
    sent: usize,
    remaining: usize,
) -> Result<()> {
    let mut buttons = Vec::new();
    if remaining > 0 {
        buttons.push(vec![InlineKeyboardButton::callback(
            format!("Show more ({remaining})"),
            "s:more",
        )]);
    }
    buttons.push(broadcast_row());

    let text = if remaining > 0 {
        format!("Showing {sent} of {}.", sent + remaining)
    } else {
        format!("That is all {sent} for this query.")
    };
    bot.send_message(chat, text)
        .reply_markup(InlineKeyboardMarkup::new(buttons))
        .await?;
    Ok(())
}

fn broadcast_row() -> Vec<InlineKeyboardButton> {
    vec![InlineKeyboardButton::callback(
        "Broadcast my ask to agents",
        "r:new",
    )]
}

fn broadcast_markup() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([broadcast_row()])
}