//! Command input for the interactive client.

use std::io::{self, BufRead};

/// Next command from `input`: the line without its `\n` or `\r\n`, otherwise
/// byte for byte. Empty lines are skipped. `None` at end of input.
pub fn next_command<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        if !line.is_empty() {
            return Ok(Some(line));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn whitespace_is_sent_as_typed() {
        let mut input = Cursor::new("  ls -l \t\nquit \n");
        assert_eq!(next_command(&mut input).unwrap().as_deref(), Some("  ls -l \t"));
        assert_eq!(next_command(&mut input).unwrap().as_deref(), Some("quit "));
        assert_eq!(next_command(&mut input).unwrap(), None);
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut input = Cursor::new("\n\r\nstatus\r\n");
        assert_eq!(next_command(&mut input).unwrap().as_deref(), Some("status"));
        assert_eq!(next_command(&mut input).unwrap(), None);
    }

    #[test]
    fn last_line_without_newline_is_kept() {
        let mut input = Cursor::new("quit");
        assert_eq!(next_command(&mut input).unwrap().as_deref(), Some("quit"));
    }

    #[test]
    fn whitespace_only_line_is_a_command() {
        let mut input = Cursor::new(" \n");
        assert_eq!(next_command(&mut input).unwrap().as_deref(), Some(" "));
    }
}
