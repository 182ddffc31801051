pub const BERKELEY_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_NAME: &str = "berkeley-ndjson/1";

pub fn git_commit_hash() -> &'static str {
    option_env!("GIT_COMMIT_HASH").unwrap_or("unknown")
}
