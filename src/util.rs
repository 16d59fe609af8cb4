const EXPO_ACCESS_TOKEN: &str = "EXPO_ACCESS_TOKEN";

pub fn get_access_token() -> Option<String> {
    let token_from_env = std::env::var(EXPO_ACCESS_TOKEN);
    token_from_env.ok().filter(|token| !token.is_empty())
}

const ENVIRO_CONFIG: &str = "ENVIRO_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./enviro.json";

pub fn get_default_config_path() -> String {
    std::env::var(ENVIRO_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}
