pub const BASE_URL: &str = "wss://api.deepgram.com/v1";
pub const DEFAULT_MODEL: &str = "nova-2";
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNELS: u16 = 1;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
