use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ADD_FROM_TRACKER_PATH: &str = "/api/torrents/add-torrent-from-tracker";

/// Status endpoint for a set of tracker ids within one realm.
pub fn statuses_path(realm_name: &str, tracker_ids: &[String]) -> String {
    let ids = tracker_ids
        .iter()
        .map(|id| urlencoding::encode(id).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "/api/torrents/realms/{}/torrents-by-tracker-ids?tracker_ids={}",
        urlencoding::encode(realm_name),
        ids
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddTorrentFromTracker<'a> {
    pub tracker_name: &'a str,
    pub tracker_id: &'a str,
    pub download_path: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatuses {
    #[serde(default)]
    pub results: Vec<TorrentStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatus {
    pub torrent_info: TorrentInfo,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    #[serde(deserialize_with = "deserialize_id")]
    pub tracker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Tracker ids arrive as numbers or strings depending on the realm.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "tracker_id must be a string or number, got {}",
            other
        ))),
    }
}

/// Group name of a freshly added torrent, when Harvest reports one.
pub fn added_torrent_name(response: &Value) -> Option<String> {
    response
        .pointer("/torrent_info/metadata/group/name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_path_joins_encoded_ids() {
        let ids = vec!["1".to_string(), "22".to_string()];
        assert_eq!(
            statuses_path("redacted", &ids),
            "/api/torrents/realms/redacted/torrents-by-tracker-ids?tracker_ids=1,22"
        );
    }

    #[test]
    fn numeric_and_string_tracker_ids_parse() {
        let statuses: TorrentStatuses = serde_json::from_str(
            r#"{"results": [
                {"torrent_info": {"tracker_id": 1}, "progress": 0.4},
                {"torrent_info": {"tracker_id": "2"}, "progress": 1, "error": "stalled"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(statuses.results[0].torrent_info.tracker_id, "1");
        assert_eq!(statuses.results[1].torrent_info.tracker_id, "2");
        assert_eq!(statuses.results[1].progress, 1.0);
        assert_eq!(statuses.results[1].error.as_deref(), Some("stalled"));
    }

    #[test]
    fn added_name_is_dug_out_of_metadata() {
        let response = serde_json::json!({
            "torrent_info": {"metadata": {"group": {"name": "Some Album"}}}
        });
        assert_eq!(added_torrent_name(&response).as_deref(), Some("Some Album"));
        assert_eq!(added_torrent_name(&serde_json::json!({})), None);
    }
}
