//! Quoting and encoding of values embedded in shell commands

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Quote a value for a POSIX shell
///
/// Values made only of characters the shell never interprets are returned as is.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}

/// Base64 encode arbitrary content for transport through a shell
pub fn encode_base64(content: &str) -> String {
    STANDARD.encode(content.as_bytes())
}

/// Shell fragment printing `content` byte for byte
///
/// The content travels base64 encoded and is decoded by the target shell, so
/// quotes, newlines or `$` in it can never break the surrounding command.
pub fn decoded(content: &str) -> String {
    format!("echo {} | base64 -d", shell_quote(&encode_base64(content)))
}
