//! Column-aligned listing parser.
//!
//! The package manager prints listings as a header row followed by rows padded
//! to fixed column widths:
//!
//! ```text
//! Name                 Id                  Version    Available  Source
//! -----------------------------------------------------------------------
//! 7-Zip 21.07 (x64)    7zip.7zip           21.07      23.01      winget
//! ```
//!
//! Column offsets are measured once from the header (relative to `Name`) and
//! applied to every following row, because names may contain runs of spaces.
//! Rows that do not line up with the header are split on wide gaps instead.

use crate::models::listing::{App, Update};
use crate::output::sanitizer::sanitize;

const NAME: &str = "Name";
const ID: &str = "Id";
const VERSION: &str = "Version";
const AVAILABLE: &str = "Available";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// `Name`, `Id`, `Version` (search and installed listings).
    Apps,
    /// `Name`, `Id`, `Version`, `Available` (upgrade listing).
    Updates,
}

/// Character offsets of the columns, relative to the start of `Name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub id: usize,
    pub version: Option<usize>,
    pub available: Option<usize>,
}

impl ColumnLayout {
    /// Measures a header line. Returns `None` if the line is not a header.
    pub fn detect(line: &str, kind: TableKind) -> Option<Self> {
        let name_at = line.find(NAME)?;
        let id_at = find_after(line, ID, name_at + NAME.len())?;
        let version_at = find_after(line, VERSION, id_at + ID.len());
        let available_at = match (kind, version_at) {
            (TableKind::Updates, Some(version_at)) => {
                find_after(line, AVAILABLE, version_at + VERSION.len())
            }
            _ => None,
        };

        let origin = char_offset(line, name_at);
        let relative = |at: usize| char_offset(line, at) - origin;
        Some(Self {
            id: relative(id_at),
            version: version_at.map(relative),
            available: available_at.map(relative),
        })
    }

    fn boundaries(&self) -> impl Iterator<Item = usize> {
        [Some(self.id), self.version, self.available]
            .into_iter()
            .flatten()
    }

    fn column_count(&self) -> usize {
        self.boundaries().count() + 1
    }

    fn lines_up_with(&self, row: &[char]) -> bool {
        self.boundaries()
            .filter(|&at| at > 0 && at < row.len())
            .all(|at| row[at - 1].is_whitespace())
    }
}

/// One data row before it is shaped into an [`App`] or [`Update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub name: String,
    pub id: String,
    pub version: String,
    pub available: String,
}

impl Row {
    fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.id.is_empty() && !self.id.contains(char::is_whitespace)
    }
}

/// Parses sanitized lines. Returns `None` when no header row was found.
pub fn parse_table<'a, I>(lines: I, kind: TableKind) -> Option<Vec<Row>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut layout: Option<ColumnLayout> = None;
    let mut rows = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(columns) = layout else {
            layout = ColumnLayout::detect(line, kind);
            continue;
        };
        if is_separator(line) || is_restated_header(line, kind, columns) || is_footer(line) {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        if chars.len() < columns.id {
            continue;
        }
        let row = if columns.lines_up_with(&chars) {
            slice_row(&chars, &columns)
        } else {
            match split_row(line, &columns) {
                Some(row) => row,
                None => continue,
            }
        };
        if row.is_valid() {
            rows.push(row);
        }
    }

    layout.map(|_| rows)
}

/// Parses `search` / `list` output.
pub fn parse_apps(output: &str) -> Vec<App> {
    let text = sanitize(output);
    parse_table(text.lines(), TableKind::Apps)
        .unwrap_or_default()
        .into_iter()
        .map(|row| App {
            name: row.name,
            id: row.id,
            version: row.version,
        })
        .collect()
}

/// Parses `upgrade` output.
pub fn parse_updates(output: &str) -> Vec<Update> {
    let text = sanitize(output);
    parse_table(text.lines(), TableKind::Updates)
        .unwrap_or_default()
        .into_iter()
        .map(|row| Update {
            name: row.name,
            id: row.id,
            current: row.version,
            version: row.available,
        })
        .collect()
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| c == '-')
}

fn is_restated_header(line: &str, kind: TableKind, columns: ColumnLayout) -> bool {
    let mut words = line.split_whitespace();
    words.next() == Some(NAME)
        && words.any(|word| word == ID)
        && ColumnLayout::detect(line, kind) == Some(columns)
}

/// Word sequences that mark a summary sentence rather than a row.
const FOOTER_PHRASES: [&[&str]; 5] = [
    &["upgrade", "available"],
    &["upgrades", "available"],
    &["no", "applicable"],
    &["no", "package"],
    &["no", "installed", "package"],
];

// Summaries are sentences: they end in `.` or `:`, which a version or
// source column never does.
fn is_footer(line: &str) -> bool {
    if !line.ends_with(['.', ':']) {
        return false;
    }
    let words: Vec<String> = line
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .collect();
    FOOTER_PHRASES.iter().any(|phrase| {
        words
            .windows(phrase.len())
            .any(|window| window.iter().zip(phrase.iter()).all(|(word, want)| word == want))
    })
}

fn slice_row(chars: &[char], columns: &ColumnLayout) -> Row {
    let mut row = Row {
        name: slice(chars, 0, Some(columns.id)),
        ..Row::default()
    };

    match columns.version {
        Some(version_at) if chars.len() > version_at => {
            row.id = slice(chars, columns.id, Some(version_at));
            match columns.available {
                Some(available_at) if chars.len() > available_at => {
                    row.version = slice(chars, version_at, Some(available_at));
                    row.available = first_token(&slice(chars, available_at, None));
                }
                Some(_) => row.version = slice(chars, version_at, None),
                None => row.version = first_token(&slice(chars, version_at, None)),
            }
        }
        _ => row.id = slice(chars, columns.id, None),
    }
    row
}

fn split_row(line: &str, columns: &ColumnLayout) -> Option<Row> {
    let fields = split_on_gaps(line);
    if fields.len() < 2 {
        return None;
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or_default().to_string();
    let last = columns.column_count() - 1;
    let mut row = Row {
        name: field(0),
        id: field(1),
        ..Row::default()
    };
    if columns.version.is_some() {
        row.version = if last == 2 {
            first_token(&field(2))
        } else {
            field(2)
        };
    }
    if columns.available.is_some() {
        row.available = first_token(&field(3));
    }
    Some(row)
}

/// Splits on runs of two or more whitespace characters.
fn split_on_gaps(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        if !c.is_whitespace() {
            continue;
        }
        let mut end = at + c.len_utf8();
        let mut run = 1;
        while let Some(&(next_at, next)) = chars.peek() {
            if !next.is_whitespace() {
                break;
            }
            end = next_at + next.len_utf8();
            run += 1;
            chars.next();
        }
        if run >= 2 {
            fields.push(&line[start..at]);
            start = end;
        }
    }
    fields.push(&line[start..]);
    fields.retain(|field| !field.is_empty());
    fields
}

fn slice(chars: &[char], start: usize, end: Option<usize>) -> String {
    let end = end.unwrap_or(chars.len()).min(chars.len());
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect::<String>().trim().to_string()
}

fn first_token(text: &str) -> String {
    text.split_whitespace().next().unwrap_or_default().to_string()
}

fn find_after(line: &str, needle: &str, from: usize) -> Option<usize> {
    line.get(from..)?.find(needle).map(|at| at + from)
}

fn char_offset(line: &str, byte_at: usize) -> usize {
    line[..byte_at].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn app(name: &str, id: &str, version: &str) -> App {
        App {
            name: name.to_string(),
            id: id.to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn double_space_separated_listing() {
        let output = "Name  Id  Version\nGoogle Chrome  Google.Chrome  120.0.1\n";
        assert_eq!(
            parse_apps(output),
            vec![app("Google Chrome", "Google.Chrome", "120.0.1")]
        );
    }

    #[test]
    fn upgrade_footer_is_excluded() {
        let output = "Name  Id  Version  Available\n\
                      7-Zip  7zip.7zip  21.07  23.01\n\
                      1 upgrades available.\n";
        assert_eq!(
            parse_updates(output),
            vec![Update {
                name: "7-Zip".to_string(),
                id: "7zip.7zip".to_string(),
                current: "21.07".to_string(),
                version: "23.01".to_string(),
            }]
        );
    }

    #[test]
    fn aligned_search_listing_with_extra_columns() {
        let output = concat!(
            "   - \r   \\ \r",
            "Name                          Id                           Version      Match         Source\r\n",
            "-----------------------------------------------------------------------------------------------\r\n",
            "Visual Studio Code            Microsoft.VisualStudioCode   1.85.1                     winget\r\n",
            "Visual  Studio  Code Insiders Microsoft.VisualStudioCode.\u{2026} 1.86.0-insider Tag: vscode winget\r\n",
            "VSCodium                      VSCodium.VSCodium            1.85.1.23348 Tag: vscode   winget\r\n",
        );
        assert_eq!(
            parse_apps(output),
            vec![
                app(
                    "Visual Studio Code",
                    "Microsoft.VisualStudioCode",
                    "1.85.1"
                ),
                app(
                    "Visual  Studio  Code Insiders",
                    "Microsoft.VisualStudioCode.\u{2026}",
                    "1.86.0-insider"
                ),
                app("VSCodium", "VSCodium.VSCodium", "1.85.1.23348"),
            ]
        );
    }

    #[test]
    fn rows_keep_input_order_and_exact_slices() {
        let names = ["Zulu JDK", "Arc", "Mozilla  Firefox (x64 en-US)", "7-Zip"];
        let mut output = format!("{:<30}{:<24}{}\n", "Name", "Id", "Version");
        output.push_str(&"-".repeat(64));
        output.push('\n');
        for (i, name) in names.iter().enumerate() {
            output.push_str(&format!("{:<30}{:<24}{}\n", name, format!("Vendor.App{i}"), format!("{i}.0.{i}")));
        }

        let apps = parse_apps(&output);
        assert_eq!(apps.len(), names.len());
        for (i, (parsed, name)) in apps.iter().zip(names).enumerate() {
            assert_eq!(parsed, &app(name, &format!("Vendor.App{i}"), &format!("{i}.0.{i}")));
        }
    }

    #[test]
    fn short_rows_are_skipped_without_ending_the_scan() {
        let output = "Name         Id           Version\n\
                      ---------------------------------\n\
                      Alpha        Alpha.App    1.0\n\
                      warning\n\
                      Beta         Beta.App     2.0\n";
        let apps = parse_apps(output);
        assert_eq!(
            apps,
            vec![app("Alpha", "Alpha.App", "1.0"), app("Beta", "Beta.App", "2.0")]
        );
    }

    #[test]
    fn missing_header_yields_nothing() {
        assert_eq!(parse_table(["No installed package found."], TableKind::Apps), None);
        assert!(parse_apps("No package found matching input criteria.\n").is_empty());
        assert!(parse_updates("").is_empty());
    }

    #[test]
    fn header_without_rows_is_an_empty_table() {
        assert_eq!(
            parse_table(["Name   Id   Version", "-----------------"], TableKind::Apps),
            Some(Vec::new())
        );
    }

    #[test]
    fn ids_never_contain_whitespace() {
        let output = "Name            Id              Version    Available\n\
                      --------------------------------------------------\n\
                      Git             Git.Git         2.43.0     2.44.0\n\
                      The following packages have an upgrade available, but require explicit targeting\n\
                      2 package(s) have version numbers that cannot be determined. Use --include-unknown\n\
                      Node.js         OpenJS.NodeJS   < 20.0.0   20.11.0\n\
                      No applicable upgrade found.\n";
        let updates = parse_updates(output);
        assert_eq!(updates.len(), 2);
        for update in &updates {
            assert!(!update.id.is_empty());
            assert!(!update.id.contains(char::is_whitespace), "{update:?}");
        }
        assert_eq!(updates[1].current, "< 20.0.0");
        assert_eq!(updates[1].version, "20.11.0");
    }

    #[test]
    fn indentation_does_not_shift_columns() {
        let output = "    Name     Id        Version\n    Curl     cURL.cURL 8.5.0\n";
        assert_eq!(parse_apps(output), vec![app("Curl", "cURL.cURL", "8.5.0")]);
    }

    #[test]
    fn layout_is_measured_in_characters() {
        let layout = ColumnLayout::detect("\u{2026}Name  Id  Version", TableKind::Apps).unwrap();
        assert_eq!(
            layout,
            ColumnLayout {
                id: 6,
                version: Some(10),
                available: None,
            }
        );
    }

    #[test]
    fn names_containing_footer_words_are_kept() {
        let output = "Name                    Id                       Version\n\
                      ----------------------------------------------------------\n\
                      Arduino Package Helper  Vendor.ArduinoPkg        1.2.0\n\
                      Upgrade Available Tool  Vendor.UpgradeNotifier   2.0.0\n\
                      No Package Manager      Vendor.NoPkg             3.1\n\
                      2 upgrades available.\n";
        assert_eq!(
            parse_apps(output),
            vec![
                app("Arduino Package Helper", "Vendor.ArduinoPkg", "1.2.0"),
                app("Upgrade Available Tool", "Vendor.UpgradeNotifier", "2.0.0"),
                app("No Package Manager", "Vendor.NoPkg", "3.1"),
            ]
        );
    }

    #[test]
    fn misaligned_rows_with_footer_words_are_kept() {
        let output = "Name  Id  Version\n\
                      Arduino Package Helper  Vendor.ArduinoPkg  1.2.0\n\
                      Upgrade Available Tool  Vendor.UpgradeNotifier  2.0.0\n\
                      No package found matching input criteria.\n";
        assert_eq!(
            parse_apps(output),
            vec![
                app("Arduino Package Helper", "Vendor.ArduinoPkg", "1.2.0"),
                app("Upgrade Available Tool", "Vendor.UpgradeNotifier", "2.0.0"),
            ]
        );
    }

    #[test]
    fn footer_sentences_are_recognised_by_whole_words() {
        assert!(is_footer("1 upgrades available."));
        assert!(is_footer("No applicable upgrade found."));
        assert!(is_footer("No installed package found matching input criteria."));
        assert!(is_footer(
            "The following packages have an upgrade available, but require explicit targeting for upgrade:"
        ));
        assert!(!is_footer("Arduino Package Helper  Vendor.ArduinoPkg  1.2.0"));
        assert!(!is_footer("Unavailable Upgrader  Vendor.Up  1.0."));
    }

    #[test]
    fn only_a_matching_header_counts_as_restated() {
        let header = "Name      Id        Version";
        let columns = ColumnLayout::detect(header, TableKind::Apps).unwrap();
        assert!(is_restated_header(header, TableKind::Apps, columns));
        assert!(!is_restated_header(
            "NameTag Identity  Vendor.NameTag  1.0",
            TableKind::Apps,
            columns
        ));

        let output = "Name              Id                Version\n\
                      NameTag Identity  Vendor.NameTag    1.0\n";
        assert_eq!(
            parse_apps(output),
            vec![app("NameTag Identity", "Vendor.NameTag", "1.0")]
        );
    }

    #[test]
    fn gap_splitting_ignores_single_spaces() {
        assert_eq!(
            split_on_gaps("Google Chrome  Google.Chrome   120.0.1"),
            vec!["Google Chrome", "Google.Chrome", "120.0.1"]
        );
    }
}
