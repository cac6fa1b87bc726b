//! Broadcast asks: a client's query goes to the agents' channel, and
//! agent proposals come back to the client anonymously.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Me, ParseMode,
};
use teloxide::utils::html;
use uuid::Uuid;

use crate::common::{is_agent, BotEnv, MyDialogue, State, UpdateHandler};
use crate::db::DbUserId;
use crate::models::{NewProposal, Proposal, Request, RequestStatus};
use crate::utils::{callback_chat, private_chat, BotExt, ResultExt};

const PROPOSAL_PAGE: i64 = 10;

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

#[derive(Clone)]
enum CallbackData {
    /// Broadcast the requester's last query.
    New,
    /// An agent wants to reply to a request.
    Propose(String),
    /// A client pages through proposals for their request.
    Page { request_id: String, offset: i64 },
}

fn filter_callbacks(q: CallbackQuery) -> Option<CallbackData> {
    let data = q.data.as_ref()?.strip_prefix("r:")?;
    if data == "new" {
        return Some(CallbackData::New);
    }
    if let Some(id) = data.strip_prefix("prop:") {
        return Some(CallbackData::Propose(id.to_owned()));
    }
    if let Some(rest) = data.strip_prefix("page:") {
        let (id, offset) = rest.rsplit_once(':')?;
        return Some(CallbackData::Page {
            request_id: id.to_owned(),
            offset: offset.parse().ok()?,
        });
    }
    None
}

async fn handle_callback(
    bot: Bot,
    env: Arc<BotEnv>,
    me: Me,
    storage: Arc<InMemStorage<State>>,
    q: CallbackQuery,
    data: CallbackData,
) -> Result<()> {
    match data {
        CallbackData::New => broadcast(bot, env, q).await,
        CallbackData::Propose(id) => propose(bot, env, me, storage, q, id).await,
        CallbackData::Page { request_id, offset } => {
            proposal_page(bot, env, q, &request_id, offset).await
        }
    }
}

async fn broadcast(bot: Bot, env: Arc<BotEnv>, q: CallbackQuery) -> Result<()> {
    use crate::schema::requests::dsl as r;

    let Some(query) = env.recall_query(q.from.id) else {
        bot.answer_callback_query(q.id.clone())
            .text("Tell me what you are looking for first, then broadcast.")
            .await?;
        return Ok(());
    };

    let user_id = DbUserId::from(q.from.id);
    let request = Request {
        id: Uuid::new_v4().to_string(),
        user_id,
        query: query.clone(),
        status: RequestStatus::Active,
        created_at: Utc::now().naive_utc(),
    };
    {
        let mut conn = env.conn();
        // One live ask per client. A new broadcast supersedes the old one.
        diesel::update(
            r::requests
                .filter(r::user_id.eq(user_id))
                .filter(r::status.eq(RequestStatus::Active)),
        )
        .set(r::status.eq(RequestStatus::Inactive))
        .execute(&mut *conn)?;
        diesel::insert_into(r::requests)
            .values(&request)
            .execute(&mut *conn)?;
    }

    bot.send_message(
        env.config.telegram.proposal_channel,
        format!("<b>New ask from a client</b>\n\n{}", html::escape(&query)),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("Propose", format!("r:prop:{}", request.id)),
    ]]))
    .await?;

    bot.send_message(
        callback_chat(&q),
        "Your ask went out to local agents. Their proposals will \
         arrive right here.",
    )
    .reply_markup(InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback(
            "Proposals so far",
            format!("r:page:{}:0", request.id),
        ),
    ]]))
    .await?;
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

async fn propose(
    bot: Bot,
    env: Arc<BotEnv>,
    me: Me,
    storage: Arc<InMemStorage<State>>,
    q: CallbackQuery,
    request_id: String,
) -> Result<()> {
    use crate::schema::requests::dsl as r;

    if !is_agent(&mut env.conn(), q.from.id) {
        bot.answer_callback_query(q.id.clone())
            .text(format!(
                "Register as an agent first: open @{} and send \
                 /register_agent.",
                me.username(),
            ))
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let request: Option<Request> = r::requests
        .find(&request_id)
        .first(&mut *env.conn())
        .optional()?;
    let active =
        request.is_some_and(|req| req.status == RequestStatus::Active);
    if !active {
        bot.answer_callback_query(q.id.clone())
            .text("This ask is already closed.")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    // The button lives in the channel, so the dialogue has to be keyed
    // to the agent's private chat by hand.
    let private = private_chat(q.from.id);
    MyDialogue::new(storage, private)
        .update(State::AwaitingProposal { request_id })
        .await?;

    match bot
        .send_message(
            private,
            "Describe your proposal in one message: the place, the \
             price, and how to reach you. It goes to the client as is.",
        )
        .await
    {
        Ok(_) => {
            bot.answer_callback_query(q.id.clone())
                .text("Check your private chat with the bot.")
                .await?;
        }
        Err(_) => {
            bot.answer_callback_query(q.id.clone())
                .text(format!(
                    "Open @{} and press Start, then tap Propose again.",
                    me.username(),
                ))
                .show_alert(true)
                .await?;
        }
    }
    Ok(())
}

/// Message endpoint for [`State::AwaitingProposal`].
pub async fn receive_proposal(
    bot: Bot,
    env: Arc<BotEnv>,
    dialogue: MyDialogue,
    request_id: String,
    msg: Message,
) -> Result<()> {
    use crate::schema::{proposals::dsl as p, requests::dsl as r};

    let Some(from) = msg.from() else { return Ok(()) };
    let Some(body) = msg.text() else {
        bot.reply_message(&msg, "Text proposals only, please.").await?;
        return Ok(());
    };

    let owner: Option<DbUserId> = {
        let mut conn = env.conn();
        let request: Option<Request> =
            r::requests.find(&request_id).first(&mut *conn).optional()?;
        match request {
            Some(req) if req.status == RequestStatus::Active => {
                diesel::insert_into(p::proposals)
                    .values(NewProposal {
                        request_id: &request_id,
                        agent_id: from.id.into(),
                        body,
                        created_at: Utc::now().naive_utc(),
                    })
                    .execute(&mut *conn)?;
                Some(req.user_id)
            }
            _ => None,
        }
    };
    dialogue.exit().await?;

    let Some(owner) = owner else {
        bot.reply_message(&msg, "This ask was closed in the meantime.")
            .await?;
        return Ok(());
    };

    bot.reply_message(&msg, "Sent. The client sees it without your name.")
        .await?;
    bot.send_message(
        private_chat(owner.into()),
        format!(
            "An agent replied to your ask:\n\n{}",
            html::escape(body),
        ),
    )
    .parse_mode(ParseMode::Html)
    .await
    .log_error("proposal relay");
    Ok(())
}

async fn proposal_page(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
    request_id: &str,
    offset: i64,
) -> Result<()> {
    use crate::schema::{proposals::dsl as p, requests::dsl as r};

    let (owned, proposals, total) = {
        let mut conn = env.conn();
        let request: Option<Request> =
            r::requests.find(request_id).first(&mut *conn).optional()?;
        let owned = request
            .is_some_and(|req| req.user_id == DbUserId::from(q.from.id));
        let proposals: Vec<Proposal> = p::proposals
            .filter(p::request_id.eq(request_id))
            .order(p::created_at.asc())
            .offset(offset)
            .limit(PROPOSAL_PAGE)
            .load(&mut *conn)?;
        let total: i64 = p::proposals
            .filter(p::request_id.eq(request_id))
            .count()
            .get_result(&mut *conn)?;
        (owned, proposals, total)
    };

    if !owned {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    }
    if proposals.is_empty() {
        bot.answer_callback_query(q.id.clone())
            .text("No proposals yet. Agents usually reply within a day.")
            .await?;
        return Ok(());
    }

    let mut text = String::new();
    for (i, proposal) in proposals.iter().enumerate() {
        writeln!(
            text,
            "<b>{}.</b> {}\n",
            offset + i as i64 + 1,
            html::escape(&proposal.body),
        )?;
    }
    let shown = offset + proposals.len() as i64;
    let mut markup = InlineKeyboardMarkup::default();
    if shown < total {
        markup = markup.append_row([InlineKeyboardButton::callback(
            format!("More ({})", total - shown),
            format!("r:page:{request_id}:{shown}"),
        )]);
    }

    bot.send_message(callback_chat(&q), text)
        .parse_mode(ParseMode::Html)
        .reply_markup(markup)
        .await?;
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}
