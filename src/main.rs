mod config;
mod messages;
mod messenger;
mod spybot;
mod store;

use std::sync::Arc;

use config::Config;
use spybot::{is_forwardable, ChatInfo, Sender, SpyBot};
use store::{InMemoryStore, SqliteStore, Store};
use teloxide::dptree;
use teloxide::macros::BotCommands;
use teloxide::prelude::*;
use teloxide::types::User;

type HandlerResult = Result<(), spybot::Error>;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case", description = "These commands are supported:")]
enum Command {
    #[command(description = "become my master.")]
    Start,
    #[command(description = "show the help.")]
    Help,
    #[command(description = "start watching this chat.")]
    Spy,
    #[command(description = "stop watching this chat.")]
    Dismiss,
    #[command(description = "send reports to this chat.")]
    ReportHere,
}

fn chat_info(msg: &Message) -> ChatInfo {
    ChatInfo {
        id: msg.chat.id,
        title: msg.chat.title().map(str::to_owned),
        username: msg.chat.username().map(str::to_owned),
        message_id: Some(msg.id),
    }
}

fn sender(user: &User) -> Sender {
    Sender {
        id: user.id,
        name: user.full_name(),
    }
}

/// Log a failed update with enough context to find the message again. The
/// bot keeps running.
fn report(msg: &Message, result: HandlerResult) {
    if let Err(e) = result {
        let group = msg
            .chat
            .title()
            .or(msg.chat.username())
            .unwrap_or("Unknown");
        log::error!(
            "Handling update failed (chat {}, group '{}', text {:?}): {e}",
            msg.chat.id,
            group,
            msg.text().unwrap_or_default()
        );
    }
}

async fn answer(msg: Message, cmd: Command, spybot: Arc<SpyBot>) -> HandlerResult {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    log::debug!("{:?} from {} in {}", cmd, user.id, msg.chat.id);

    let chat = chat_info(&msg);
    let sender = sender(user);
    let result = match cmd {
        Command::Start => spybot.start(&sender, &chat).await,
        Command::Help => spybot.help(&chat).await,
        Command::Spy => spybot.spy(&sender, &chat).await,
        Command::Dismiss => spybot.dismiss(&sender, &chat).await,
        Command::ReportHere => spybot.report_here(&sender, &chat).await,
    };

    report(&msg, result);
    Ok(())
}

async fn membership_changed(msg: Message, spybot: Arc<SpyBot>) -> HandlerResult {
    let chat = chat_info(&msg);
    let actor = msg.from.as_ref().map(sender);
    let added: Vec<UserId> = msg
        .new_chat_members()
        .unwrap_or_default()
        .iter()
        .map(|member| member.id)
        .collect();
    let removed = msg.left_chat_member().map(|member| member.id);

    let result = spybot
        .membership_changed(&chat, actor.as_ref(), &added, removed)
        .await;

    report(&msg, result);
    Ok(())
}

async fn forward(msg: Message, text: String, spybot: Arc<SpyBot>) -> HandlerResult {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };

    let result = spybot.forward(&chat_info(&msg), &sender(user), &text).await;

    report(&msg, result);
    Ok(())
}

macro_rules! or_exit {
    ($e:expr, $what:expr) => {
        match $e {
            Ok(t) => t,
            Err(e) => {
                log::error!("{}: {e}", $what);
                std::process::exit(1);
            }
        }
    };
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting the SpyBot...");

    let config = or_exit!(Config::from_env(), "Invalid configuration");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(or_exit!(
            SqliteStore::connect(url).await,
            "Cannot open database"
        )),
        None => {
            log::warn!("DATABASE_URL is not set, masters will be forgotten on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    let bot = Bot::new(config.token.clone());
    let me = or_exit!(bot.get_me().await, "Cannot reach Telegram");
    log::info!("Logged in as @{}", me.username());

    let spybot = Arc::new(
        SpyBot::new(me.id, store, Arc::new(bot.clone()))
            .with_forward_delay(config.forward_delay),
    );

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(answer),
        )
        .branch(
            dptree::filter(|msg: Message| {
                msg.new_chat_members().is_some() || msg.left_chat_member().is_some()
            })
            .endpoint(membership_changed),
        )
        .branch(
            dptree::filter(|msg: Message| msg.chat.is_group() || msg.chat.is_supergroup())
                .filter_map(|msg: Message| msg.text().map(str::to_owned))
                .filter(|text: String| is_forwardable(&text))
                .endpoint(forward),
        );

    // one worker for all chats, updates are handled strictly in order
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![spybot])
        .distribution_function(|_| Some(()))
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}
