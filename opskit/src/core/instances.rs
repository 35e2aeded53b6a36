//! Instance list decoding and exclusion filtering.

const DEFAULT_MARKER: &str = "(Default)";

/// Decode the virtualization CLI's instance listing into instance names.
///
/// `wsl.exe --list` writes UTF-16LE to a pipe; other tools write UTF-8. Output
/// with a UTF-16 BOM or embedded NUL bytes is decoded as UTF-16LE.
pub fn parse_instance_list(raw: &[u8]) -> Vec<String> {
    let text = if looks_utf16le(raw) {
        decode_utf16le(raw)
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };

    text.lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}'))
        .map(|line| line.strip_suffix(DEFAULT_MARKER).unwrap_or(line).trim_end())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop excluded instances, preserving order. Names compare case-insensitively.
pub fn filter_excluded(instances: Vec<String>, excluded: &[String]) -> Vec<String> {
    instances
        .into_iter()
        .filter(|name| !excluded.iter().any(|ex| ex.eq_ignore_ascii_case(name)))
        .collect()
}

fn looks_utf16le(raw: &[u8]) -> bool {
    raw.starts_with(&[0xFF, 0xFE]) || raw.contains(&0)
}

fn decode_utf16le(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if bom {
            out.extend_from_slice(&[0xFF, 0xFE]);
        }
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn decodes_utf16_listing_with_crlf() {
        let raw = utf16le("Ubuntu-22.04\r\ndocker-desktop\r\n\r\n", false);
        assert_eq!(
            parse_instance_list(&raw),
            vec!["Ubuntu-22.04", "docker-desktop"]
        );
    }

    #[test]
    fn decodes_utf16_with_bom() {
        let raw = utf16le("Debian\r\n", true);
        assert_eq!(parse_instance_list(&raw), vec!["Debian"]);
    }

    #[test]
    fn decodes_utf8_and_strips_default_marker() {
        let raw = b"Ubuntu (Default)\nalpine\n  \n";
        assert_eq!(parse_instance_list(raw), vec!["Ubuntu", "alpine"]);
    }

    #[test]
    fn exclusion_is_case_insensitive_and_keeps_order() {
        let instances = vec![
            "Ubuntu".to_string(),
            "docker-desktop".to_string(),
            "Alpine".to_string(),
        ];
        let excluded = vec!["Docker-Desktop".to_string()];
        assert_eq!(
            filter_excluded(instances, &excluded),
            vec!["Ubuntu", "Alpine"]
        );
    }
}
