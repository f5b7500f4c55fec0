use super::consts;
use secrecy::SecretString;

#[derive(Clone)]
pub struct Config {
    url: String,
    token: SecretString,
    room: String,
    identity: String,
    capacity: usize,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            config: Config::new(url),
        }
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.config.token = token;
        self
    }

    pub fn with_room(mut self, room: &str) -> Self {
        self.config.room = room.to_string();
        self
    }

    pub fn with_identity(mut self, identity: &str) -> Self {
        self.config.identity = identity.to_string();
        self
    }

    /// Channel capacity for commands and events.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Config {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            token: SecretString::from(String::new()),
            room: String::new(),
            identity: consts::DEFAULT_IDENTITY.to_string(),
            capacity: consts::DEFAULT_CAPACITY,
        }
    }

    pub fn builder(url: &str) -> ConfigBuilder {
        ConfigBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
