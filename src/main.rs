use ::serenity::all::ClientBuilder;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use songbird::SerenityInit;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use playfile::commands::playback::{
    playfile::*,
    stopplayfile::*,
    utils::{
        attachment::HttpAttachmentStore, playback_manager::PlaybackManager,
        playfile_error::PlayfileError, sinks::select_sink, voice_transport::SongbirdTransport,
    },
};
use playfile::utils::config::{ConfigError, PlayfileConfig};
use playfile::{CommandResult, Context, Data, Error, events};

#[poise::command(slash_command, prefix_command, category = "General")]
async fn help(
    ctx: Context<'_>,
    #[description = "Specific command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> CommandResult {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            show_context_menu_commands: true,
            ..Default::default()
        },
    )
    .await
    .map_err(|e| e.into())
}

#[poise::command(prefix_command, hide_in_help)]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx)
        .await
        .map_err(|e| e.into())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize logging with debug level for our crate
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("playfile=debug,warn")),
        )
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true)
        .with_ansi(true)
        .pretty()
        .init();

    dotenv().ok();

    let config = PlayfileConfig::from_env()?;
    info!(
        "Accepting {:?}, staging on {:?}, disconnect policy {:?}",
        config.allowed_extensions, config.staging, config.disconnect_policy
    );

    let token = env::var("DISCORD_TOKEN").map_err(|_| ConfigError::Missing("DISCORD_TOKEN"))?;

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let commands = vec![
        // Default commands
        register(),
        help(),
        // Playback commands
        playfile(),
        stopplayfile(),
    ];

    let prefix = config.prefix.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands,
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let voice = songbird::get(ctx)
                    .await
                    .ok_or("Songbird voice client was not registered")?;

                let sink = select_sink(&config, voice.clone()).await;
                if let Err(PlayfileError::DependencyMissing(what)) = &sink {
                    warn!("playfile will be unavailable: {} is missing", what);
                }

                let playback = PlaybackManager::new(
                    config,
                    Arc::new(HttpAttachmentStore::new(reqwest::Client::new())),
                    Arc::new(SongbirdTransport::new(voice)),
                    sink,
                );

                Ok(Data {
                    playback: Arc::new(playback),
                })
            })
        });

    let client_builder = ClientBuilder::new(token, intents).framework(framework.build());

    // Create and run client
    build_and_start_client(client_builder).await
}

async fn build_and_start_client(client_builder: ClientBuilder) -> Result<(), Error> {
    let mut client = client_builder.register_songbird().await?;
    client.start().await.map_err(Into::into)
}
