//! Premium purchase flow: plan menu, card and Telegram Stars invoices,
//! and crediting paid days on successful payment.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, LabeledPrice,
    PreCheckoutQuery, SuccessfulPayment,
};

use crate::common::{BotEnv, UpdateHandler};
use crate::db::DbUserId;
use crate::entitlement;
use crate::utils::{callback_chat, BotExt};

const WEEK_DAYS: i64 = 7;
const MONTH_DAYS: i64 = 30;

pub fn callback_handler() -> UpdateHandler {
    dptree::filter_map(filter_callbacks).endpoint(handle_callback)
}

#[derive(Clone, Copy)]
enum CallbackData {
    Menu,
    Card(i64),
    Stars(i64),
}

fn filter_callbacks(q: CallbackQuery) -> Option<CallbackData> {
    let data = q.data.as_ref()?.strip_prefix("pay:")?;
    match data {
        "menu" => Some(CallbackData::Menu),
        "card:7" => Some(CallbackData::Card(WEEK_DAYS)),
        "card:30" => Some(CallbackData::Card(MONTH_DAYS)),
        "stars:7" => Some(CallbackData::Stars(WEEK_DAYS)),
        "stars:30" => Some(CallbackData::Stars(MONTH_DAYS)),
        _ => None,
    }
}

async fn handle_callback(
    bot: Bot,
    env: Arc<BotEnv>,
    q: CallbackQuery,
    data: CallbackData,
) -> Result<()> {
    let chat = callback_chat(&q);
    match data {
        CallbackData::Menu => {
            let pay = &env.config.payment;
            let menu = InlineKeyboardMarkup::new([
                vec![InlineKeyboardButton::callback(
                    format!("Week by card (${:.2})",
                        cents_to_dollars(pay.card_week_cents)),
                    "pay:card:7",
                )],
                vec![InlineKeyboardButton::callback(
                    format!("Month by card (${:.2})",
                        cents_to_dollars(pay.card_month_cents)),
                    "pay:card:30",
                )],
                vec![InlineKeyboardButton::callback(
                    format!("Week in Stars ({}⭐)", pay.stars_week),
                    "pay:stars:7",
                )],
                vec![InlineKeyboardButton::callback(
                    format!("Month in Stars ({}⭐)", pay.stars_month),
                    "pay:stars:30",
                )],
            ]);
            bot.send_message(
                chat,
                "Premium unlocks owner contacts and original ads. Pick a \
                 plan:",
            )
            .reply_markup(menu)
            .await?;
        }
        CallbackData::Card(days) => {
            let pay = &env.config.payment;
            let amount = if days == WEEK_DAYS {
                pay.card_week_cents
            } else {
                pay.card_month_cents
            };
            bot.send_invoice(
                chat,
                format!("Premium, {days} days"),
                "Direct owner contacts and full ad details.",
                payload(q.from.id, days, "card"),
                pay.provider_token.clone(),
                "USD",
                [LabeledPrice::new(format!("{days} days"), amount)],
            )
            .await?;
        }
        CallbackData::Stars(days) => {
            let pay = &env.config.payment;
            let amount =
                if days == WEEK_DAYS { pay.stars_week } else { pay.stars_month };
            // Stars invoices carry no provider token.
            bot.send_invoice(
                chat,
                format!("Premium, {days} days"),
                "Direct owner contacts and full ad details.",
                payload(q.from.id, days, "stars"),
                String::new(),
                "XTR",
                [LabeledPrice::new(format!("{days} days"), amount)],
            )
            .await?;
        }
    }
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

pub async fn pre_checkout(bot: Bot, q: PreCheckoutQuery) -> Result<()> {
    bot.answer_pre_checkout_query(q.id, true).await?;
    Ok(())
}

pub async fn handle_successful_payment(
    bot: Bot,
    env: Arc<BotEnv>,
    msg: Message,
    payment: SuccessfulPayment,
) -> Result<()> {
    let (user_id, days, method) = parse_payload(&payment.invoice_payload)?;
    let until = entitlement::grant_days(
        &mut env.conn(),
        user_id,
        days,
        method.as_str(),
    )?;
    log::info!(
        "payment: {days} days via {method} for {user_id:?}, until {until}"
    );
    bot.reply_message(
        &msg,
        format!(
            "Payment received. Premium is active until {}.",
            until.format("%Y-%m-%d")
        ),
    )
    .await?;
    Ok(())
}

fn payload(user: UserId, days: i64, method: &str) -> String {
    format!("{}_{days}_{method}", user.0)
}

fn parse_payload(payload: &str) -> Result<(DbUserId, i64, String)> {
    let mut parts = payload.split('_');
    let (Some(user), Some(days), Some(method), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("malformed invoice payload: {payload:?}");
    };
    let user: u64 = user.parse().context("payload user id")?;
    let days: i64 = days.parse().context("payload days")?;
    Ok((UserId(user).into(), days, method.to_owned()))
}

fn cents_to_dollars(cents: i32) -> f64 {
    f64::from(cents) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let s = payload(UserId(12345), 30, "stars");
        assert_eq!(s, "12345_30_stars");
        let (user, days, method) = parse_payload(&s).unwrap();
        assert_eq!(user, UserId(12345).into());
        assert_eq!(days, 30);
        assert_eq!(method, "stars");
    }

    #[test]
    fn payload_rejects_garbage() {
        assert!(parse_payload("only_two").is_err());
        assert!(parse_payload("1_2_3_4").is_err());
        assert!(parse_payload("abc_7_card").is_err());
    }
}
