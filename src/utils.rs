mod diesel_json;
mod log_error;
mod media;
mod teloxide;

pub use diesel_json::Sqlizer;
pub use log_error::ResultExt;
pub use media::{cached_photo, MediaOutcome};

pub use self::teloxide::{callback_chat, private_chat, BotExt};
