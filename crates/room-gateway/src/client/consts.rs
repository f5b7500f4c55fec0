pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const ROOM_HEADER: &str = "X-Room-Name";
pub const IDENTITY_HEADER: &str = "X-Participant-Identity";

pub const DEFAULT_IDENTITY: &str = "avatar-agent";
pub const DEFAULT_CAPACITY: usize = 1024;
