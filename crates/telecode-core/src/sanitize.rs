//! Terminal control sequence stripping
//!
//! Assistant CLIs colour their output and set terminal titles even when they are
//! not attached to a TTY. Chat clients render those bytes literally, so every
//! reply goes through [`strip_terminal_sequences`] first.

use regex::Regex;
use std::sync::LazyLock;

/// OSC: ESC ] ... terminated by BEL or ST (ESC \)
static OSC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").expect("valid OSC regex"));

/// CSI: ESC [ params intermediates final, covers SGR colours, cursor moves and `?25l`
static CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("valid CSI regex"));

/// Charset designation (ESC ( B) and other two-byte Fe/Fp escapes (ESC 7, ESC =)
static SHORT_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:[()*+][0-9A-Za-z]|[0-9=>@-Z\\^_])").expect("valid escape regex")
});

/// Remove ANSI/VT escape sequences, leaving every printable character in place.
pub fn strip_terminal_sequences(text: &str) -> String {
    if !text.contains('\x1b') {
        return text.to_string();
    }
    let text = OSC.replace_all(text, "");
    let text = CSI.replace_all(&text, "");
    let text = SHORT_ESCAPE.replace_all(&text, "");
    // Unterminated sequences leave a bare ESC behind
    text.replace('\x1b', "")
}
