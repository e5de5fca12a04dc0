use std::env;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        Ok(Config {
            db_host: env::var("DB_HOST")?,
            db_port: env::var("DB_PORT")
                .unwrap_or_default()
                .parse()
                .unwrap_or(5432),
            db_user: env::var("DB_USER")?,
            db_pass: env::var("DB_PASS")?,
            db_name: env::var("DB_NAME")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "localhost".into()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_default()
                .parse()
                .unwrap_or(3000),
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, self.db_pass, self.db_host, self.db_port, self.db_name
        )
    }
}
