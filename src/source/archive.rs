//! # Archive Extraction
//!
//! Turns a repository ZIP archive into the normalized configuration object:
//! root prefix stripped, entries filtered to the configured path, basenames
//! percent-decoded and `.json`-stripped, bodies kept as parsed JSON.

use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::io::{Cursor, Read};
use zip::ZipArchive;

use super::inline::canonical_key;
use super::SourceError;

/// Extract the configuration entries from an archive body.
///
/// `path` restricts extraction to entries under that prefix (relative to the
/// archive root); `None` or an empty string takes every file.
pub fn extract_entries(
    bytes: &[u8],
    path: Option<&str>,
) -> Result<serde_json::Map<String, Value>, SourceError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| SourceError::Unavailable(format!("unreadable archive: {e}")))?;

    // GitHub archives wrap everything in a single `<repo>-<revision>/` root;
    // the first top-level directory entry names it.
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| SourceError::Unavailable(format!("unreadable archive entry: {e}")))?;
        names.push((entry.name().to_string(), entry.is_dir()));
    }

    let root = names
        .iter()
        .find(|(name, is_dir)| *is_dir && name.matches('/').count() == 1)
        .map(|(name, _)| name.clone())
        .unwrap_or_default();

    let prefix = path.unwrap_or_default().trim_matches('/').to_string();

    let mut document = serde_json::Map::new();
    for index in 0..archive.len() {
        let (name, is_dir) = &names[index];
        if *is_dir {
            continue;
        }

        let relative = name.strip_prefix(root.as_str()).unwrap_or(name.as_str());
        if !within_prefix(relative, &prefix) {
            continue;
        }

        let basename = relative.rsplit('/').next().unwrap_or(relative);
        let decoded = percent_decode_str(basename).decode_utf8_lossy();
        let key = canonical_key(&decoded);

        let mut entry = archive
            .by_index(index)
            .map_err(|e| SourceError::Unavailable(format!("unreadable archive entry: {e}")))?;
        let mut body = Vec::new();
        entry
            .read_to_end(&mut body)
            .map_err(|e| SourceError::Unavailable(format!("failed to read '{name}': {e}")))?;

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| SourceError::Parse(format!("entry '{name}' is not valid JSON: {e}")))?;
        document.insert(key, value);
    }

    Ok(document)
}

fn within_prefix(relative: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    relative
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive_with(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in entries {
            match body {
                Some(body) => {
                    writer.start_file(*name, options).expect("start file");
                    writer.write_all(body.as_bytes()).expect("write body");
                }
                None => {
                    writer.add_directory(*name, options).expect("add dir");
                }
            }
        }
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn strips_archive_root_and_filters_by_path() {
        let bytes = archive_with(&[
            ("site-abc123/", None),
            ("site-abc123/.deco/blocks/", None),
            ("site-abc123/.deco/blocks/a.json", Some(r#"{"x":1}"#)),
            ("site-abc123/.deco/blocks/b.json", Some("[1,2]")),
            ("site-abc123/README.json", Some(r#""skipped""#)),
        ]);

        let document = extract_entries(&bytes, Some(".deco/blocks")).expect("extract");
        assert_eq!(
            Value::Object(document),
            json!({ "a": { "x": 1 }, "b": [1, 2] })
        );
    }

    #[test]
    fn no_path_prefix_takes_every_file() {
        let bytes = archive_with(&[
            ("repo-rev/", None),
            ("repo-rev/a.json", Some("1")),
            ("repo-rev/nested/b.json", Some("2")),
        ]);

        let document = extract_entries(&bytes, None).expect("extract");
        assert_eq!(Value::Object(document), json!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn percent_escapes_in_basenames_become_literal_bytes() {
        let bytes = archive_with(&[
            ("repo-rev/", None),
            (
                "repo-rev/Campaign%20Timer%20-%2001.json",
                Some(r#"{"enabled":true}"#),
            ),
        ]);

        let document = extract_entries(&bytes, None).expect("extract");
        assert!(document.contains_key("Campaign Timer - 01"));
    }

    #[test]
    fn directory_entries_are_skipped() {
        let bytes = archive_with(&[
            ("repo-rev/", None),
            ("repo-rev/blocks/", None),
            ("repo-rev/blocks/a.json", Some("true")),
        ]);

        let document = extract_entries(&bytes, None).expect("extract");
        assert_eq!(document.len(), 1);
        assert_eq!(document["a"], json!(true));
    }

    #[test]
    fn sibling_prefix_does_not_leak_in() {
        let bytes = archive_with(&[
            ("repo-rev/", None),
            ("repo-rev/blocks/a.json", Some("1")),
            ("repo-rev/blocks-extra/b.json", Some("2")),
        ]);

        let document = extract_entries(&bytes, Some("blocks")).expect("extract");
        assert_eq!(document.len(), 1);
        assert!(document.contains_key("a"));
    }

    #[test]
    fn invalid_json_entry_is_a_parse_error() {
        let bytes = archive_with(&[("repo-rev/", None), ("repo-rev/a.json", Some("{oops"))]);
        assert!(matches!(
            extract_entries(&bytes, None),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_unavailable() {
        assert!(matches!(
            extract_entries(b"not a zip", None),
            Err(SourceError::Unavailable(_))
        ));
    }
}
