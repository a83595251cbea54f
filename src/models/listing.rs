use serde::{Deserialize, Serialize};

/// A row of a search or installed-apps listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub id: String,
    pub version: String,
}

/// A row of the pending-upgrades listing. `version` is the available version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub name: String,
    pub id: String,
    pub current: String,
    pub version: String,
}

/// Manifest fields printed by `show`. Fields the tool omits stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    pub id: String,
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub author: String,
    pub moniker: String,
    pub description: String,
    pub license: String,
    pub copyright: String,
    pub homepage: String,
    pub release_notes_url: String,
    pub tags: Vec<String>,
    pub installer_type: String,
    pub installer_url: String,
    pub installer_sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn update_serializes_with_current_and_version() {
        let update = Update {
            name: "7-Zip".to_string(),
            id: "7zip.7zip".to_string(),
            current: "21.07".to_string(),
            version: "23.01".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&update).unwrap(),
            r#"{"name":"7-Zip","id":"7zip.7zip","current":"21.07","version":"23.01"}"#
        );
    }

    #[test]
    fn details_use_camel_case_keys() {
        let details = Details {
            id: "7zip.7zip".to_string(),
            release_notes_url: "https://7-zip.org/history.txt".to_string(),
            ..Details::default()
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["releaseNotesUrl"], "https://7-zip.org/history.txt");
        assert_eq!(json["installerSha256"], "");
        assert_eq!(json["tags"], serde_json::json!([]));
    }
}
