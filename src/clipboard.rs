//! Clipboard fan-out.
//!
//! OSC 52 through the outer terminal is always attempted (it works over
//! SSH and nested muxes). Native paths are best-effort extras: arboard
//! first, then a display-server helper picked by environment. Helper
//! failures are ignored and never block the event loop.

use std::io::Write;
use std::process::{Command, Stdio};

use base64::Engine;

/// OSC 52 payloads beyond this are truncated by terminals anyway.
pub const OSC52_MAX: usize = 128 * 1024;

/// Build the OSC 52 clipboard-set sequence for `text`.
pub fn osc52(text: &str) -> Vec<u8> {
    let capped = &text.as_bytes()[..text.len().min(OSC52_MAX)];
    let encoded = base64::engine::general_purpose::STANDARD.encode(capped);
    let mut out = Vec::with_capacity(encoded.len() + 16);
    out.extend_from_slice(b"\x1b]52;c;");
    out.extend_from_slice(encoded.as_bytes());
    out.push(0x07);
    out
}

/// Copy to every clipboard we can reach. Returns the OSC 52 bytes for
/// the caller to write to the terminal.
pub fn copy(text: &str) -> Vec<u8> {
    native_copy(text);
    spawn_helper(text);
    osc52(text)
}

fn native_copy(text: &str) {
    if let Ok(mut clipboard) = arboard::Clipboard::new() {
        let _ = clipboard.set_text(text.to_string());
    }
}

/// Fire-and-forget helper process: wl-copy under Wayland, xclip or xsel
/// under X11. Absence of both env vars means no display server; skip.
fn spawn_helper(text: &str) {
    let helper: &[&str] = if std::env::var_os("WAYLAND_DISPLAY").is_some() {
        &["wl-copy"]
    } else if std::env::var_os("DISPLAY").is_some() {
        &["xclip", "-selection", "clipboard"]
    } else {
        return;
    };
    let fallback: Option<&[&str]> = if helper[0] == "xclip" {
        Some(&["xsel", "--clipboard", "--input"])
    } else {
        None
    };
    if !pipe_to(helper, text) {
        if let Some(fallback) = fallback {
            pipe_to(fallback, text);
        }
    }
}

fn pipe_to(argv: &[&str], text: &str) -> bool {
    let Ok(mut child) = Command::new(argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    else {
        return false;
    };
    if let Some(stdin) = child.stdin.take() {
        let mut stdin = stdin;
        let _ = stdin.write_all(text.as_bytes());
    }
    // Do not wait: the helper owns the data now; reaping is the OS's
    // problem, blocking the loop is ours.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osc52_shape() {
        let bytes = osc52("hello");
        assert!(bytes.starts_with(b"\x1b]52;c;"));
        assert_eq!(*bytes.last().unwrap(), 0x07);
        let b64 = &bytes[7..bytes.len() - 1];
        assert_eq!(b64, b"aGVsbG8=");
    }

    #[test]
    fn osc52_empty() {
        assert_eq!(osc52(""), b"\x1b]52;c;\x07");
    }

    #[test]
    fn osc52_payload_capped() {
        let big = "x".repeat(OSC52_MAX + 4096);
        let bytes = osc52(&big);
        // base64 of the cap, plus prefix and terminator.
        let expected_b64 = OSC52_MAX.div_ceil(3) * 4;
        assert_eq!(bytes.len(), 7 + expected_b64 + 1);
    }
}
