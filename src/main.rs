use clap::Parser;
use orl_bot::{
    api::OsuApi,
    args::Args,
    bancho,
    database::db::DbClient,
    error::Result,
    lobby::{manager::SessionManager, session::SessionConfig},
    model::engine::RatingEngine
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level))
        )
        .init();

    let db = DbClient::connect(&args.connection_string).await?;
    db.ensure_schema().await?;

    if args.offline_recalc {
        RatingEngine::new(db).offline_recalc().await?;
        return Ok(());
    }

    let api = OsuApi::new(args.osu_api_key.clone())?;
    let (writer, rx) =
        bancho::connection::connect(&args.irc_host, &args.irc_username, &args.irc_password).await?;

    let config = SessionConfig {
        website_base_url: args.website_base_url.clone(),
        discord_invite_url: args.discord_invite_url.clone(),
        bot_username: args.irc_username.replace(' ', "_")
    };

    let mut manager = SessionManager::new(db, api, Arc::new(writer), config);
    manager.rejoin_open_matches().await?;

    info!("connected, listening for lobby traffic");
    // The run loop only returns when the transport drops; exiting lets the
    // supervisor restart us with a clean connection.
    manager.run(rx).await
}
