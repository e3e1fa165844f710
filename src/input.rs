//! Secret key input
//!
//! Keys are read one per line until EOF or the first blank line. Lines are
//! only trimmed here; format validation happens per account so that one bad
//! entry cannot abort the batch.

use crate::account::scrub;
use crate::error::DeployResult;

use std::io::BufRead;

/// Read key lines from `reader`
pub fn read_keys<R: BufRead>(reader: R) -> DeployResult<Vec<String>> {
    let mut keys = Vec::new();

    for line in reader.lines() {
        let mut line = line?;
        let key = line.trim().to_string();
        scrub(&mut line);

        if key.is_empty() {
            break;
        }
        if key.starts_with('#') {
            continue;
        }
        keys.push(key);
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stops_at_blank_line() {
        let input = "0xaa\n  0xbb  \n\n0xcc\n";
        let keys = read_keys(Cursor::new(input)).unwrap();
        assert_eq!(keys, vec!["0xaa", "0xbb"]);
    }

    #[test]
    fn test_keeps_malformed_entries_for_per_account_rejection() {
        let input = "# funded\nnot-a-key\n0x01";
        let keys = read_keys(Cursor::new(input)).unwrap();
        assert_eq!(keys, vec!["not-a-key", "0x01"]);
    }
}
