use std::sync::Arc;

use botdash_core::config::Config;
use botdash_discord::DiscordClient;
use botdash_server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    botdash_core::logging::init("botdash")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        config_dir = %cfg.guild_config_dir.display(),
        stats_file = %cfg.stats_file.display(),
        "starting dashboard"
    );

    let discord = Arc::new(DiscordClient::from_config(&cfg)?);
    let state = AppState::from_config(&cfg, discord.clone(), discord);

    botdash_server::serve(&cfg, state).await
}
