const APIKEY: &str = "MONGOWATCH_APIKEY";

const APIHOST: &str = "MONGOWATCH_APIHOST";

const DEFAULT_API_HOST: &str = "https://api.copperegg.com";

const DEFAULT_MONGO_PORT: u16 = 27017;

pub fn get_default_port() -> u16 {
    DEFAULT_MONGO_PORT
}

pub fn get_default_api_host() -> String {
    DEFAULT_API_HOST.to_string()
}

pub fn get_api_key() -> Option<String> {
    non_empty_env(APIKEY)
}

pub fn get_api_host() -> Option<String> {
    non_empty_env(APIHOST)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Current wall-clock time in epoch seconds.
pub fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
