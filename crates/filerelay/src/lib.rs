pub mod client;
pub mod protocol;

/// Default trigger keyword that introduces a target filename.
pub const DEFAULT_TRIGGER: &str = "tg";

/// Default message that cancels a pending upload.
pub const DEFAULT_CANCEL_TOKEN: &str = "q";
