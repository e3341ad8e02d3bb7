use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 5001;

/// Server configuration. Supplied at construction and never mutated after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Username checked by the two-argument AUTH form.
    pub username: Option<String>,
    /// Password checked by AUTH. Auth is disabled only when neither this
    /// nor `username` is set.
    pub requirepass: Option<String>,
    /// Capacity of the session -> dispatcher queue.
    pub command_queue: usize,
    /// How long the dispatcher waits on one reply write before dropping
    /// the client.
    pub write_timeout_ms: u64,
    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            username: None,
            requirepass: None,
            command_queue: 1,
            write_timeout_ms: 5000,
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults overlaid with `BLINKDB_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(bind) = env_var("BLINKDB_BIND") {
            config.bind = bind;
        }
        if let Some(port) = env_var("BLINKDB_PORT").and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        config.username = env_var("BLINKDB_USERNAME");
        config.requirepass = env_var("BLINKDB_PASSWORD");
        config
    }

    pub fn from_args(args: &[String]) -> Self {
        Config::default().with_args(args)
    }

    /// Apply command line flags on top of this config.
    pub fn with_args(mut self, args: &[String]) -> Self {
        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--bind", Some(v)) => self.bind = v.clone(),
                ("--port", Some(v)) => {
                    if let Ok(p) = v.parse() {
                        self.port = p;
                    }
                }
                ("--username", Some(v)) => self.username = non_empty(v),
                ("--requirepass", Some(v)) => self.requirepass = non_empty(v),
                ("--command-queue", Some(v)) => {
                    if let Ok(n) = v.parse::<usize>() {
                        self.command_queue = n.max(1);
                    }
                }
                ("--write-timeout-ms", Some(v)) => {
                    if let Ok(ms) = v.parse::<u64>() {
                        self.write_timeout_ms = ms.max(1);
                    }
                }
                ("--loglevel", Some(v)) => self.loglevel = v.clone(),
                _ => {
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn auth_required(&self) -> bool {
        self.username.is_some() || self.requirepass.is_some()
    }

    /// With a username, both fields must match; without one, only the password.
    pub fn check_credentials(&self, username: Option<&str>, password: &str) -> bool {
        let expected = self.requirepass.as_deref().unwrap_or("");
        match username.filter(|u| !u.is_empty()) {
            Some(user) => self.username.as_deref() == Some(user) && password == expected,
            None => password == expected,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| non_empty(&v))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub type SharedConfig = Arc<Config>;
