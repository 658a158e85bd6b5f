use std::env;
use std::net::SocketAddr;

use auth_app::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("auth_app=debug,tower_http=debug,warn")),
        )
        .init();

    let addr: SocketAddr = env::var("AUTH_APP_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:6969".into())
        .parse()?;

    // The account the bundled suite logs in with.
    let state = AppState::new();
    state
        .seed_account("test@domain.com", "TestName", "TestFamilyName", "1234567")
        .await;

    println!("🚀 auth_app running at http://{addr}");
    auth_app::serve(addr, state).await?;

    Ok(())
}
