//! Decoding of window-resize directives from the control channel.
//!
//! Directives are line oriented: `<rows>x<columns>`, decimal, one per line.
//! Anything that does not parse is dropped without a sound - a stray byte on
//! the control channel must never disturb the shell session.

use anyhow::Result;
use tracing::{trace, warn};

/// One parsed geometry update. Applied immediately, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

/// Anything whose terminal geometry can be changed mid-session.
pub trait WindowResize {
    fn set_window_size(&self, size: WindowSize) -> Result<()>;
}

/// Decode one batch of control-channel bytes and apply every well-formed
/// directive in order. Malformed lines are discarded individually; a bad
/// line never stops the lines after it from being applied.
pub fn apply_directives(data: &[u8], pty: &dyn WindowResize) {
    for line in String::from_utf8_lossy(data).lines() {
        let Some(size) = parse_directive(line) else {
            if !line.trim().is_empty() {
                trace!("discarding malformed resize directive {:?}", line);
            }
            continue;
        };
        trace!("applying window size {}x{}", size.rows, size.cols);
        if let Err(e) = pty.set_window_size(size) {
            warn!("failed to apply window size {}x{}: {}", size.rows, size.cols, e);
        }
    }
}

/// Parse a single `<rows>x<columns>` line, tolerating surrounding
/// whitespace. Returns `None` for anything else: wrong field count,
/// non-numeric or non-positive values.
fn parse_directive(line: &str) -> Option<WindowSize> {
    let mut fields = line.split('x');
    let rows = fields.next()?.trim().parse::<u16>().ok()?;
    let cols = fields.next()?.trim().parse::<u16>().ok()?;
    if fields.next().is_some() || rows == 0 || cols == 0 {
        return None;
    }
    Some(WindowSize { rows, cols })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<WindowSize>>);

    impl WindowResize for Recorder {
        fn set_window_size(&self, size: WindowSize) -> Result<()> {
            self.0.borrow_mut().push(size);
            Ok(())
        }
    }

    fn applied(data: &[u8]) -> Vec<WindowSize> {
        let recorder = Recorder::default();
        apply_directives(data, &recorder);
        recorder.0.into_inner()
    }

    #[test]
    fn applies_a_plain_directive() {
        assert_eq!(applied(b"24x80"), vec![WindowSize { rows: 24, cols: 80 }]);
    }

    #[test]
    fn applies_directives_in_order() {
        assert_eq!(
            applied(b"24x80\n7x9"),
            vec![
                WindowSize { rows: 24, cols: 80 },
                WindowSize { rows: 7, cols: 9 },
            ]
        );
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(
            applied(b"  24 x 80 \r\n"),
            vec![WindowSize { rows: 24, cols: 80 }]
        );
    }

    #[test]
    fn discards_malformed_lines_and_keeps_going() {
        assert_eq!(
            applied(b"bad\n24x\nx80\n-1x80\n0x80\n12x34x56\n3x4\n"),
            vec![WindowSize { rows: 3, cols: 4 }]
        );
    }

    #[test]
    fn undecodable_bytes_only_poison_their_own_line() {
        assert_eq!(
            applied(b"\xff\xfe\n24x80\n"),
            vec![WindowSize { rows: 24, cols: 80 }]
        );
    }

    #[test]
    fn empty_batch_applies_nothing() {
        assert!(applied(b"\n\n").is_empty());
    }
}
