use super::Config;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port_str) = std::env::var("PROXYPAL_PORT")
            && let Ok(port) = port_str.parse::<u16>()
            && port != 0
        {
            self.proxy.port = port;
        }

        if let Ok(binary) = std::env::var("PROXYPAL_ENGINE_BIN")
            && !binary.is_empty()
        {
            self.proxy.engine_binary = binary;
        }

        if let Ok(key) = std::env::var("PROXYPAL_MANAGEMENT_KEY")
            && !key.is_empty()
        {
            self.proxy.management_key = key;
        }
    }
}
