//! WebSocket address normalization

/// Host used when no address is configured
pub const DEFAULT_URL: &str = "ws://localhost";
/// Port appended when the address carries none
pub const DEFAULT_PORT: &str = "8080";

/// Normalize a user-supplied address and port into a `ws://` URL.
///
/// The scheme defaults to `ws://`, trailing slashes are dropped, and `port`
/// is only appended when the address does not already end in `:<digits>`.
pub fn build_ws_url(url: &str, port: &str) -> String {
    let url = match url.trim() {
        "" => DEFAULT_URL,
        trimmed => trimmed,
    };
    let port = match port.trim() {
        "" => DEFAULT_PORT,
        trimmed => trimmed,
    };

    let lower = url.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("ws://") || lower.starts_with("wss://") {
        url.to_string()
    } else {
        format!("ws://{}", url)
    };
    let address = with_scheme.trim_end_matches('/');

    if has_explicit_port(address) {
        address.to_string()
    } else {
        format!("{}:{}", address, port)
    }
}

fn has_explicit_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((_, tail)) => !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
