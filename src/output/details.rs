//! Parser for the `Key: Value` manifest view printed by `show`.

use crate::models::listing::Details;
use crate::output::sanitizer::sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Description,
    Tags,
}

/// Parses `show` output for package `id`. Unknown keys are ignored; a
/// description may continue over several unkeyed lines and tags are listed
/// one per indented line under `Tags:`.
pub fn parse_details(output: &str, id: &str) -> Details {
    let text = sanitize(output);
    let mut details = Details {
        id: id.to_string(),
        ..Details::default()
    };
    let mut section = Section::None;
    let mut description: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(found) = line.strip_prefix("Found ") {
            if let Some(name) = found_name(found) {
                details.name = name.to_string();
            }
            continue;
        }

        let Some((key, value)) = key_value(line) else {
            let trimmed = line.trim();
            match section {
                Section::Tags if line.starts_with("  ") && !trimmed.is_empty() => {
                    if !trimmed.contains(':') {
                        details.tags.push(trimmed.to_string());
                    }
                }
                Section::Description if !trimmed.is_empty() => description.push(trimmed),
                _ => {}
            }
            continue;
        };

        section = Section::None;
        let field = match key.as_str() {
            "version" => &mut details.version,
            "publisher" => &mut details.publisher,
            "author" => &mut details.author,
            "moniker" => &mut details.moniker,
            "license" => &mut details.license,
            "copyright" => &mut details.copyright,
            "homepage" => &mut details.homepage,
            "release notes url" => &mut details.release_notes_url,
            "installer type" => &mut details.installer_type,
            "installer url" => &mut details.installer_url,
            "installer sha256" => &mut details.installer_sha256,
            "description" => {
                section = Section::Description;
                if !value.is_empty() {
                    description.push(value);
                }
                continue;
            }
            "tags" => {
                section = Section::Tags;
                continue;
            }
            _ => continue,
        };
        *field = value.to_string();
    }

    details.description = description.join(" ");
    details
}

// `Found 7-Zip [7zip.7zip]` -> `7-Zip`
fn found_name(found: &str) -> Option<&str> {
    let open = found.find(" [")?;
    found[open..].contains(']').then(|| &found[..open])
}

// A key starts with a letter and holds only letters, digits and spaces, so
// `Homepage: https://...` splits at the first colon and prose with
// punctuation before a colon is not taken for a key.
fn key_value(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let starts_with_letter = key.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return None;
    }
    Some((key.to_lowercase(), value.trim()))
}
