//! Common helpers to be used by various bot modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, QueryResult, RunQueryDsl,
    SqliteConnection,
};
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::Dialogue;
use teloxide::types::{Me, Message, UserId};
use teloxide::utils::command::BotCommands;
use teloxide::Bot;

use crate::config::Config;
use crate::db::DbUserId;
use crate::models::UserRole;
use crate::search::pagination::SessionCache;
use crate::utils::BotExt;

/// Wrapper around [`teloxide::dispatching::UpdateHandler`] to be used in this
/// crate.
pub type UpdateHandler = teloxide::dispatching::UpdateHandler<anyhow::Error>;

pub type MyDialogue = Dialogue<State, InMemStorage<State>>;

/// Dialogue state for the multi-step flows. Any command resets it to
/// [`State::Start`].
#[derive(Clone, Default)]
pub enum State {
    #[default]
    Start,
    /// Agent is typing a proposal for a broadcast request.
    AwaitingProposal { request_id: String },
    /// Add-listing flow, in step order.
    AddListingTitle,
    AddListingParams { draft: ListingDraft },
    AddListingPhotos { draft: ListingDraft },
    AddListingDescription { draft: ListingDraft },
    AddListingConfirm { draft: ListingDraft },
}

/// A listing under construction in the add-listing dialogue.
#[derive(Clone, Debug, Default)]
pub struct ListingDraft {
    pub title: String,
    pub area: String,
    pub price_day_inr: i64,
    pub bedrooms: Option<i32>,
    pub guests: Option<i32>,
    /// Telegram photo file ids.
    pub photos: Vec<String>,
    pub description: Option<String>,
}

/// Access rules describing where and who can execute a command.
#[derive(Eq, PartialEq, Debug)]
pub struct CommandAccessRules {
    /// Require the user to be a bot admin to execute this command.
    pub admin: bool,
    /// Require the user to be a registered agent to execute this command.
    pub agent: bool,
    /// Allow users to execute this command in private chat with the bot.
    pub in_private: bool,
    /// Allow users to execute this command in group chats.
    pub in_group: bool,
}

impl CommandAccessRules {
    pub const fn new() -> Self {
        Self { admin: false, agent: false, in_private: true, in_group: true }
    }
}

impl Default for CommandAccessRules {
    fn default() -> Self {
        Self::new()
    }
}

/// An extension to [`BotCommands`] trait that allows to specify command rules
/// for each command.
///
/// [`BotCommands`]: teloxide::utils::command::BotCommands
pub trait BotCommandsExtTrait: BotCommands {
    const COMMAND_RULES: &'static [CommandAccessRules];
    fn command_rules(&self) -> CommandAccessRules;
}

/// Bot environment: global state shared between all handlers.
pub struct BotEnv {
    pub conn: Mutex<SqliteConnection>,
    pub config: Arc<Config>,
    pub reqwest_client: reqwest::Client,
    pub openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
    pub oracle: crate::oracle::Oracle,
    /// Pagination tails, keyed by requester.
    pub sessions: SessionCache,
    /// Last raw query per requester, for the "broadcast my ask" button.
    pub recent_queries: Mutex<HashMap<UserId, String>>,
}

impl BotEnv {
    pub fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        self.conn.lock().unwrap()
    }

    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut SqliteConnection) -> QueryResult<T>,
    ) -> QueryResult<T> {
        self.conn().exclusive_transaction(f)
    }

    pub fn remember_query(&self, user: UserId, query: &str) {
        self.recent_queries
            .lock()
            .unwrap()
            .insert(user, query.to_owned());
    }

    pub fn recall_query(&self, user: UserId) -> Option<String> {
        self.recent_queries.lock().unwrap().get(&user).cloned()
    }
}

/// Derive macro for [`BotCommandsExtTrait`] trait. Should be applied with
/// [`macro_rules_attribute::derive`].
macro_rules! BotCommandsExt {
    (
        $( #[ $_attr:meta ] )*
        $pub:vis
        enum $name:ident {
            $(
                $( #[ $($attr:tt)* ] )*
                $item:ident $( ( $($item_args:tt)* ) )?
            ),* $(,)?
        }
    ) => {
        impl $crate::common::BotCommandsExtTrait for $name {
            const COMMAND_RULES: &'static [$crate::common::CommandAccessRules] =
                &[$({
                    #[allow(unused_mut)]
                    let mut meta = $crate::common::CommandAccessRules::new();
                    BotCommandsExt!(
                        impl set_meta;
                        meta;
                        $( #[ $($attr)* ] )*
                    );
                    meta
                }),*]
            ;
            fn command_rules(&self) -> $crate::common::CommandAccessRules {
                match self {$(
                    BotCommandsExt!(
                        impl skip_item_args;
                        $item $( ( $($item_args)* ) )?
                    ) => {
                        #[allow(unused_mut)]
                        let mut meta =
                            $crate::common::CommandAccessRules::default();
                        BotCommandsExt!(
                            impl set_meta;
                            meta;
                            $( #[ $($attr)* ] )*
                        );
                        meta
                    }
                )*}
            }
        }
    };

    // Internal rules, using <https://stackoverflow.com/a/40484901> trick
    // set_meta
    (
        impl set_meta;
        $name:expr;
        #[custom( $( $meta_key:ident = $meta_value:expr ),* $(,)? )]
        $( #[ $( $rest:tt )* ] )*
    ) => {
        $( $name.$meta_key = $meta_value; )*
        BotCommandsExt!(impl set_meta; $name; $( #[ $( $rest )* ] )* );
    };
    (
        impl set_meta;
        $name:expr;
        #[ $attr:meta ]
        $( #[ $( $rest:tt )* ] )*
    ) => {
        BotCommandsExt!(impl set_meta; $name; $( #[ $( $rest )* ] )* );
    };
    (
        impl set_meta;
        $name:expr;
    ) => {};

    // skip_item_args
    (impl skip_item_args; $v:ident ) => { Self::$v };
    (impl skip_item_args; $v:ident($($t:ty),+) ) => { Self::$v(..) };
}

pub(crate) use BotCommandsExt;

/// Similar to [`teloxide::filter_command`], but for commands implementing
/// [`BotCommandsExtTrait`].
#[must_use]
pub fn filter_command<C>() -> UpdateHandler
where
    C: BotCommands + BotCommandsExtTrait + Send + Sync + 'static,
{
    dptree::filter_map_async(filter_command_impl::<C>)
}

async fn filter_command_impl<C>(
    bot: Bot,
    me: Me,
    msg: Message,
    env: Arc<BotEnv>,
) -> Option<C>
where
    C: BotCommands + BotCommandsExtTrait + Send + Sync + 'static,
{
    let cmd = C::parse(msg.text()?, &me.user.username.clone()?).ok()?;
    let rules = cmd.command_rules();

    let error_text = if !rules.in_group
        && (msg.chat.is_group() || msg.chat.is_supergroup())
    {
        Some("This command is not allowed in group chats.")
    } else if !rules.in_private && msg.chat.is_private() {
        Some("This command is not allowed in private chats.")
    } else if rules.admin
        && !env.config.telegram.admins.contains(&msg.from()?.id)
    {
        Some("You must be an admin to execute this command.")
    } else if rules.agent && !is_agent(&mut env.conn(), msg.from()?.id) {
        Some("You must register as an agent first: /register_agent")
    } else {
        None
    };

    if let Some(error_text) = error_text {
        let _ = bot.reply_message(&msg, error_text).await;
        return None;
    }

    Some(cmd)
}

pub fn is_agent(conn: &mut SqliteConnection, user: UserId) -> bool {
    use crate::schema::users::dsl as u;
    u::users
        .find(DbUserId::from(user))
        .select(u::role)
        .first::<UserRole>(conn)
        .optional()
        .ok()
        .flatten()
        == Some(UserRole::Agent)
}

pub fn is_admin(env: &BotEnv, user: UserId) -> bool {
    env.config.telegram.admins.contains(&user)
}

#[cfg(test)]
mod tests {
    use macro_rules_attribute::derive;

    use super::*;

    #[derive(Debug, BotCommands, BotCommandsExt!)]
    #[command(parse_with = "split")]
    enum MyCommand {
        Defaults,

        #[doc = "Variant 2"]
        WithDoc,

        #[custom(agent = true)]
        WithCustom,

        #[doc = "Variant 4"]
        #[custom(admin = true)]
        WithDocAndCustom,

        #[custom(in_private = true, in_group = false)]
        WithArgsAndCustom(i32, i32),
    }

    #[test]
    fn command_rules() {
        assert_eq!(
            MyCommand::Defaults.command_rules(),
            CommandAccessRules::default()
        );
        assert_eq!(
            MyCommand::WithDoc.command_rules(),
            CommandAccessRules::default()
        );
        assert_eq!(
            MyCommand::WithCustom.command_rules(),
            CommandAccessRules { agent: true, ..Default::default() }
        );
        assert_eq!(
            MyCommand::WithDocAndCustom.command_rules(),
            CommandAccessRules { admin: true, ..Default::default() }
        );
        assert_eq!(
            MyCommand::WithArgsAndCustom(1, 2).command_rules(),
            CommandAccessRules {
                in_private: true,
                in_group: false,
                ..Default::default()
            }
        );
    }
}
