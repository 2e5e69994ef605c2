use coin_desk::config::DashboardArgs;
use coin_desk::error::AppError;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = DashboardArgs::from_env()?.normalize()?;
    coin_desk::run(config).await
}
