//! Server configuration

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "applyhub", about = "Delegated job application platform server")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:applyhub.db")]
    pub database_url: String,

    /// Secret used to sign session tokens
    #[arg(long, env = "JWT_SECRET", default_value = "change-me-in-production")]
    pub jwt_secret: String,

    /// Base URL of the recommendation service
    #[arg(long, env = "RECOMMENDER_URL", default_value = "http://localhost:8000")]
    pub recommender_url: String,

    /// Timeout for recommendation calls, in seconds
    #[arg(long, env = "RECOMMENDER_TIMEOUT_SECS", default_value_t = 10)]
    pub recommender_timeout_secs: u64,

    /// Email for the seeded administrator account
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    /// Password for the seeded administrator account
    #[arg(long, env = "ADMIN_PASSWORD")]
    pub admin_password: Option<String>,
}
