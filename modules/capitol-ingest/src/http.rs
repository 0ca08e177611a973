use capitol_common::Config;

use crate::error::Result;

/// One client per pipeline: connection pooling is shared across stages.
/// The read timeout bounds a stalled socket, not a whole transfer.
pub(crate) fn build_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .build()?;
    Ok(client)
}
