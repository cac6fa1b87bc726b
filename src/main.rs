#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Restriction lints
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::deref_by_slicing,
    clippy::if_then_some_else_none,
    clippy::undocumented_unsafe_blocks,
    clippy::unnecessary_cast,
    clippy::unnecessary_safety_comment
)]
// False positives
#![allow(clippy::needless_pass_by_value)] // for dptree handlers
// Style
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::redundant_closure_for_method_calls)]

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, Result};
use argh::FromArgs;
use common::{MyDialogue, State};
use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use metrics_exporter_prometheus::PrometheusBuilder;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::{Dispatcher, HandlerExt, UpdateFilterExt};
use teloxide::payloads::AnswerCallbackQuerySetters;
use teloxide::requests::Requester;
use teloxide::types::{CallbackQuery, Message, Update};
use teloxide::Bot;
use tokio_util::sync::CancellationToken;

mod common;
mod config;
mod db;
mod entitlement;
mod metrics;
mod models;
mod modules;
mod oracle;
mod schema;
mod search;
mod store;
mod utils;

static VERSION: OnceLock<String> = OnceLock::new();

fn version() -> &'static str {
    VERSION.get().expect("VERSION is not set")
}

/// nestbot
#[derive(FromArgs, PartialEq, Debug)]
struct Args {
    #[argh(option, hidden_help = true, long = "-set-revision")]
    set_revision: Option<String>,

    #[argh(subcommand)]
    subcommand: SubCommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum SubCommand {
    Bot(SubCommandBot),
    Ingest(SubCommandIngest),
}

/// run the bot
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "bot")]
struct SubCommandBot {
    /// config file
    #[argh(positional)]
    config_file: OsString,
}

/// run one scraper pass and exit
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "ingest")]
struct SubCommandIngest {
    /// config file
    #[argh(positional)]
    config_file: OsString,
}

#[tokio::main]
async fn main() -> Result<()> {
    std::env::set_var("RUST_LOG", "info");
    pretty_env_logger::init();
    let args: Args = argh::from_env();
    VERSION
        .set(args.set_revision.unwrap_or_else(|| {
            git_version::git_version!(fallback = "unknown").to_string()
        }))
        .unwrap();
    log::info!("Version {}", version());
    match args.subcommand {
        SubCommand::Bot(c) => run_bot(&c.config_file).await?,
        SubCommand::Ingest(c) => run_ingest(&c.config_file).await?,
    }
    Ok(())
}

fn load_config(config_fpath: &OsStr) -> Result<config::Config> {
    serde_yaml::from_reader(File::open(config_fpath)?)
        .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
}

fn make_env(config: config::Config) -> Result<Arc<common::BotEnv>> {
    std::fs::create_dir_all(&config.cache_dir)
        .context("creating cache dir")?;
    let mut conn = SqliteConnection::establish(&config.db)?;
    db::init_schema(&mut conn)?;
    Ok(Arc::new(common::BotEnv {
        conn: Mutex::new(conn),
        reqwest_client: reqwest::ClientBuilder::new()
            .timeout(std::time::Duration::from_secs(30))
            .build()?,
        openai_client: async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(config.services.openai.api_key.clone()),
        ),
        oracle: oracle::Oracle::new(&config.services.oracle),
        sessions: search::pagination::SessionCache::default(),
        recent_queries: Mutex::new(HashMap::new()),
        config: Arc::new(config),
    }))
}

async fn run_bot(config_fpath: &OsStr) -> Result<()> {
    let config = load_config(config_fpath)?;
    PrometheusBuilder::new()
        .with_http_listener(config.server_addr)
        .install()?;
    metrics::register_metrics();

    let bot_env = make_env(config)?;
    let bot = Bot::new(&bot_env.config.telegram.token);

    let mut dispatcher = Dispatcher::builder(
        bot.clone(),
        dptree::entry()
            // should be the first handler
            .inspect(modules::basic::inspect_update)
            .branch(
                Update::filter_message()
                    .filter(|msg: Message| !msg.chat.is_channel())
                    .enter_dialogue::<Message, InMemStorage<State>, State>()
                    .inspect_async(reset_dialogue_on_command)
                    .branch(modules::basic::command_handler())
                    .branch(modules::agent::command_handler())
                    .branch(
                        dptree::filter_map(|msg: Message| {
                            msg.successful_payment().cloned()
                        })
                        .endpoint(modules::payment::handle_successful_payment),
                    )
                    .branch(
                        dptree::case![State::AwaitingProposal { request_id }]
                            .endpoint(modules::requests::receive_proposal),
                    )
                    .branch(
                        dptree::case![State::AddListingTitle]
                            .endpoint(modules::agent::add_listing_title),
                    )
                    .branch(
                        dptree::case![State::AddListingParams { draft }]
                            .endpoint(modules::agent::add_listing_params),
                    )
                    .branch(
                        dptree::case![State::AddListingPhotos { draft }]
                            .endpoint(modules::agent::add_listing_photos),
                    )
                    .branch(
                        dptree::case![State::AddListingDescription { draft }]
                            .endpoint(modules::agent::add_listing_description),
                    )
                    .branch(modules::search::message_handler())
                    .endpoint(drop_endpoint),
            )
            .branch(
                Update::filter_callback_query()
                    .branch(modules::search::callback_handler())
                    .branch(modules::listings::callback_handler())
                    .branch(modules::payment::callback_handler())
                    .branch(modules::requests::callback_handler())
                    .branch(modules::agent::callback_handler())
                    .endpoint(drop_callback_query),
            )
            .branch(
                Update::filter_pre_checkout_query()
                    .endpoint(modules::payment::pre_checkout),
            )
            .endpoint(drop_endpoint),
    )
    .dependencies(dptree::deps![
        InMemStorage::<State>::new(),
        Arc::clone(&bot_env)
    ])
    .build();
    let bot_shutdown_token = dispatcher.shutdown_token().clone();
    let mut join_handles = Vec::new();
    join_handles.push(tokio::spawn(async move { dispatcher.dispatch().await }));

    let cancel = CancellationToken::new();

    join_handles.push(tokio::spawn(modules::ingest::task(
        Arc::clone(&bot_env),
        cancel.clone(),
    )));
    join_handles.push(tokio::spawn(modules::reminders::task(
        bot.clone(),
        Arc::clone(&bot_env),
        cancel.clone(),
    )));
    join_handles
        .push(tokio::spawn(metrics_task(Arc::clone(&bot_env), cancel.clone())));

    run_signal_handler(bot_shutdown_token.clone(), cancel.clone());

    futures::future::join_all(join_handles).await;

    Ok(())
}

async fn run_ingest(config_fpath: &OsStr) -> Result<()> {
    let bot_env = make_env(load_config(config_fpath)?)?;
    let added = modules::ingest::run_once(&bot_env).await?;
    log::info!("ingest: {added} new listings");
    Ok(())
}

async fn metrics_task(env: Arc<common::BotEnv>, cancel: CancellationToken) {
    loop {
        {
            let mut conn = env.conn();
            metrics::refresh(&mut conn, &env.config.db);
        }
        tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
            () = cancel.cancelled() => return,
        }
    }
}

async fn reset_dialogue_on_command(msg: Message, dialogue: MyDialogue) {
    let message_is_command =
        msg.entities().and_then(|e| e.first()).is_some_and(|e| {
            e.kind == teloxide::types::MessageEntityKind::BotCommand
                && e.offset == 0
        });
    if message_is_command {
        dialogue.update(State::Start).await.ok();
    }
}

async fn drop_callback_query(
    bot: Bot,
    callback_query: CallbackQuery,
) -> Result<()> {
    log::warn!(
        "Unexpected callback query: {:?}",
        serde_json::to_string(&callback_query).unwrap_or_default()
    );
    bot.answer_callback_query(callback_query.id.clone())
        .text("Error: unexpected callback query")
        .await?;
    Ok(())
}

async fn drop_endpoint() -> Result<()> {
    Ok(())
}

fn run_signal_handler(
    bot_shutdown_token: teloxide::dispatching::ShutdownToken,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.expect("Failed to listen for SIGINT");
            cancel.cancel();
            match bot_shutdown_token.shutdown() {
                #[allow(
                    clippy::redundant_pub_crate,
                    // reason = "https://github.com/rust-lang/rust-clippy/issues/10636"
                )]
                Ok(f) => {
                    log::info!(
                        "^C received, trying to shutdown the dispatcher..."
                    );
                    tokio::select! {
                        () = f => {
                            log::info!("dispatcher is shutdown...");
                        }
                        _ = tokio::signal::ctrl_c() => {
                            log::info!("Got another ^C, exiting immediately");
                            std::process::exit(0);
                        }
                    }
                }
                Err(_) => {
                    log::info!("^C received, the dispatcher isn't running, ignoring the signal");
                }
            }
        }
    });
}
