//! Track number guessing for files without a track tag.
//!
//! Only unambiguous shapes are accepted: a short leading number
//! (`05 Title`, `14. Title`) or a single number enclosed in `()`, `[]`
//! or dashes (`Artist - 7 - Title`, `[14]`, `-07-`). Anything else is 0.

use std::path::Path;

/// Longest digit run taken as a track number; four digits are usually a year.
const MAX_DIGITS: usize = 3;

/// Guess a track number from a file name, 0 when there is no clear answer.
pub fn guess_track_number(path: &Path) -> u32 {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return 0;
    };
    let stem = stem.trim();

    leading_number(stem)
        .or_else(|| enclosed_number(stem))
        .unwrap_or(0)
}

fn leading_number(stem: &str) -> Option<u32> {
    let digits = stem.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > MAX_DIGITS {
        return None;
    }

    let rest = &stem[digits..];
    let mut chars = rest.chars();
    if let Some(separator) = chars.next() {
        if !matches!(separator, ' ' | '.' | '-' | '_' | ')') {
            return None;
        }
        // "1-05 Title" is disc-track; not worth guessing
        if chars.next().is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    stem[..digits].parse().ok().filter(|n| *n > 0)
}

fn enclosed_number(stem: &str) -> Option<u32> {
    let chars: Vec<char> = stem.chars().collect();
    let mut found = None;

    for (i, open) in chars.iter().enumerate() {
        let close = match open {
            '(' => ')',
            '[' => ']',
            '-' => '-',
            _ => continue,
        };

        let mut j = i + 1;
        while chars.get(j) == Some(&' ') {
            j += 1;
        }
        let start = j;
        while chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
            j += 1;
        }
        let end = j;
        while chars.get(j) == Some(&' ') {
            j += 1;
        }

        if end == start || end - start > MAX_DIGITS || chars.get(j) != Some(&close) {
            continue;
        }

        let Ok(number) = chars[start..end].iter().collect::<String>().parse::<u32>() else {
            continue;
        };
        if number == 0 {
            continue;
        }

        match found {
            None => found = Some(number),
            Some(previous) if previous == number => {}
            Some(_) => return None,
        }
    }

    found
}
