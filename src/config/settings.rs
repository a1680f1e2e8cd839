use dotenv::dotenv;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Simulation,
    Trading,
}

impl Mode {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_lowercase().as_str() {
            "simulation" => Ok(Mode::Simulation),
            "trading" => Ok(Mode::Trading),
            other => Err(format!("MODE must be 'simulation' or 'trading', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_port: u16,
    pub bybit_rest_base_url: String,
    pub bybit_ws_public_spot_url: String,
    pub bybit_ws_public_linear_url: String,
    pub cors_origins: Vec<String>,
    pub mode: Mode,
    pub trade_log_dir: String,
    pub trading_symbol: String,
    pub trading_interval: String,
    pub snapshot_limit: usize,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // loads `.env` file automatically

        let server_port = env::var("SERVER_PORT")
            .map_err(|_| "SERVER_PORT missing from env")?
            .parse::<u16>()
            .map_err(|_| "SERVER_PORT must be a valid u16")?;

        let bybit_rest_base_url = env::var("BYBIT_REST_BASE_URL")
            .unwrap_or_else(|_| "https://api.bybit.com".into());
        let bybit_ws_public_spot_url = env::var("BYBIT_WS_PUBLIC_SPOT_URL")
            .unwrap_or_else(|_| "wss://stream.bybit.com/v5/public/spot".into());
        let bybit_ws_public_linear_url = env::var("BYBIT_WS_PUBLIC_LINEAR_URL")
            .unwrap_or_else(|_| "wss://stream.bybit.com/v5/public/linear".into());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let mode = Mode::parse(&env::var("MODE").unwrap_or_else(|_| "simulation".into()))?;

        let trade_log_dir =
            env::var("TRADE_LOG_DIR").unwrap_or_else(|_| "logs/trades".into());
        let trading_symbol =
            env::var("TRADING_SYMBOL").unwrap_or_else(|_| "BTCUSDT".into());
        let trading_interval =
            env::var("TRADING_INTERVAL").unwrap_or_else(|_| "60".into());

        let snapshot_limit = env::var("SNAPSHOT_LIMIT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(1500);

        Ok(Self {
            server_port,
            bybit_rest_base_url,
            bybit_ws_public_spot_url,
            bybit_ws_public_linear_url,
            cors_origins,
            mode,
            trade_log_dir,
            trading_symbol,
            trading_interval,
            snapshot_limit,
        })
    }

    pub fn is_trading(&self) -> bool {
        self.mode == Mode::Trading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_known_values() {
        assert_eq!(Mode::parse("simulation").unwrap(), Mode::Simulation);
        assert_eq!(Mode::parse("TRADING").unwrap(), Mode::Trading);
    }

    #[test]
    fn mode_rejects_unknown_value() {
        assert!(Mode::parse("bogus").is_err());
    }
}
