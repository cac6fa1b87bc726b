use teloxide::payloads;
use teloxide::prelude::*;
use teloxide::requests::JsonRequest;
use teloxide::types::CallbackQuery;

/// Chat to answer a callback in: the message the button was attached
/// to, or the presser's private chat for detached queries.
pub fn callback_chat(q: &CallbackQuery) -> ChatId {
    q.message.as_ref().map_or(private_chat(q.from.id), |m| m.chat.id)
}

/// A user's private chat has the chat id equal to the user id.
#[allow(clippy::cast_possible_wrap)]
pub fn private_chat(user: UserId) -> ChatId {
    ChatId(user.0 as i64)
}

pub trait BotExt {
    fn reply_message<T: Into<String>>(
        &self,
        msg: &Message,
        text: T,
    ) -> JsonRequest<payloads::SendMessage>;
}

impl BotExt for Bot {
    fn reply_message<T: Into<String>>(
        &self,
        msg: &Message,
        text: T,
    ) -> JsonRequest<payloads::SendMessage> {
        let mut reply =
            self.send_message(msg.chat.id, text).reply_to_message_id(msg.id);
        reply.message_thread_id = msg.thread_id;
        reply
    }
}
