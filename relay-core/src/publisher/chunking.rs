//! Fitting text into the transport's message size limit.
//!
//! All lengths are counted in characters, not bytes.

/// Shorten in-progress text to `max` characters, ending with `marker`.
pub fn truncate_for_display(text: &str, max: usize, marker: &str) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(marker.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(marker);
    out
}

/// Header placed in front of every part of a split message.
pub fn part_header(label: &str, index: usize, total: usize) -> String {
    format!("{label} {index}/{total}:\n\n")
}

/// Split final text into ordered messages of at most `max` characters.
///
/// With a `label`, every part starts with a `label i/n:` header that counts
/// against the limit. Text that already fits is returned unchanged as one
/// part.
pub fn split_final(text: &str, max: usize, label: Option<&str>) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return vec![text.to_string()];
    }

    let room = match label {
        Some(label) => body_room(chars.len(), max, label),
        None => max,
    };

    let bodies: Vec<String> = chars
        .chunks(room.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect();
    let total = bodies.len();
    match label {
        Some(label) => bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| format!("{}{}", part_header(label, i + 1, total), body))
            .collect(),
        None => bodies,
    }
}

/// Body characters per part once the widest header is accounted for.
fn body_room(len: usize, max: usize, label: &str) -> usize {
    let mut parts = len.div_ceil(max);
    loop {
        let header = part_header(label, parts, parts).chars().count();
        let room = max.saturating_sub(header).max(1);
        let needed = len.div_ceil(room);
        if needed <= parts {
            return room;
        }
        parts = needed;
    }
}
