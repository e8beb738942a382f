use base64::Engine;
use tracing::warn;

/// Normalize an image payload into plain padded base64.
///
/// Accepts data URLs (`data:image/jpeg;base64,...`), embedded whitespace and
/// missing padding. Undecodable input is passed through after a warning; the
/// provider gets the final say.
pub fn normalize_base64(input: &str) -> String {
    let mut data = input.trim();
    if data.starts_with("data:") {
        if let Some((_, rest)) = data.split_once(',') {
            data = rest;
        }
    }

    let mut normalized: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    let missing = (4 - normalized.len() % 4) % 4;
    normalized.extend(std::iter::repeat('=').take(missing));

    if let Err(e) = base64::engine::general_purpose::STANDARD.decode(&normalized) {
        warn!("Image payload is not valid base64, sending as-is: {}", e);
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_data_url_prefix() {
        assert_eq!(normalize_base64("data:image/png;base64,aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn test_restores_padding_and_strips_whitespace() {
        assert_eq!(normalize_base64(" aGVs\nbG8 "), "aGVsbG8=");
        assert_eq!(normalize_base64("aGk"), "aGk=");
    }

    #[test]
    fn test_already_normal() {
        assert_eq!(normalize_base64("aGVsbG8h"), "aGVsbG8h");
    }
}
