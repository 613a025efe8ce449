use anyhow::Context;
use axum::Router;
use db::DBService;
use services::services::{
    chat::{ChatClient, ChatProvisioner},
    config::Config,
    media::MediaClient,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod error;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub chat: ChatClient,
    pub chat_provisioner: ChatProvisioner,
    pub media: MediaClient,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("loading configuration")?;

    utils::logging::init("server=info,db=info,services=info,tower_http=info");

    let db = DBService::new(&config.database.url)
        .await
        .context("connecting to database")?;

    let chat = ChatClient::new(config.chat).context("building chat client")?;
    let chat_provisioner = ChatProvisioner::new(chat.clone());
    let media = MediaClient::new(config.media).context("building media client")?;

    let state = AppState {
        db,
        chat,
        chat_provisioner,
        media,
    };

    let app = Router::new()
        .nest("/api", routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!("listening on {addr}");

    axum::serve(listener, app).await.context("serving")?;

    Ok(())
}
