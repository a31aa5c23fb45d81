//! C5 ambient detail: dispatching a TAN code to the external delivery script (spec
//! §4.5, out of scope as a collaborator per §1 — the engine only shells out and
//! records the outcome). One script per channel, chosen from `TanConfig`.

use tokio::process::Command;

use crate::error::BankError;
use crate::models::TanChannel;

/// Invokes the script configured for `channel` with the code and destination passed
/// as environment variables, mirroring the sibling e2e tooling's `Command::new(...)
/// .output()` shape. A missing script for the channel is `TanChannelNotSupported`; a
/// non-zero exit is `TanChannelScriptFailed` and must not advance `sent_at`.
pub async fn dispatch(
    channel: TanChannel,
    script: Option<&str>,
    destination: &str,
    code: &str,
) -> Result<(), BankError> {
    let script = script.ok_or(BankError::TanChannelNotSupported)?;

    let output = Command::new(script)
        .env("TAN_CHANNEL", channel.as_str())
        .env("TAN_DESTINATION", destination)
        .env("TAN_CODE", code)
        .output()
        .await
        .map_err(|e| BankError::Internal(eyre::eyre!(e).wrap_err("failed to spawn TAN script")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::warn!(channel = channel.as_str(), %stderr, "TAN delivery script exited non-zero");
        return Err(BankError::TanChannelScriptFailed);
    }
    Ok(())
}
