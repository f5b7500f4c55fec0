use super::consts;
use secrecy::SecretString;

/// Connection settings for a live transcription stream.
#[derive(Clone)]
pub struct Config {
    base_url: String,
    api_key: SecretString,
    model: String,
    sample_rate: u32,
    channels: u16,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.config.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.config.channels = channels;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: consts::BASE_URL.to_string(),
            api_key: SecretString::from(String::new()),
            model: consts::DEFAULT_MODEL.to_string(),
            sample_rate: consts::DEFAULT_SAMPLE_RATE,
            channels: consts::DEFAULT_CHANNELS,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Full `listen` endpoint for raw little-endian 16-bit PCM input, with interim results.
    pub fn listen_url(&self) -> String {
        format!(
            "{}/listen?model={}&encoding=linear16&sample_rate={}&channels={}&interim_results=true",
            self.base_url, self.model, self.sample_rate, self.channels
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
