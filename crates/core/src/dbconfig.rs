//! `_DBconfig.json` representation and the SSFF track-selection algorithm.
//!
//! The configuration file is only partially typed: the fields the server needs
//! (name, media extension, track definitions, web-app perspectives) are
//! declared, everything else is preserved in flattened maps so a parse →
//! mutate → rewrite cycle never drops unknown keys.

use crate::{paths, EmuError, EmuResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Pseudo tracks rendered client-side by the web-app (waveform and
/// spectrogram). They appear in signal-canvas orderings but are never backed
/// by a file on disk.
const PSEUDO_TRACKS: [&str; 2] = ["OSCI", "SPECTO"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SsffTrackDefinition {
    pub name: String,
    #[serde(default)]
    pub column_name: Option<String>,
    pub file_extension: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnagestConfig {
    #[serde(default)]
    pub vertical_pos_ssff_track_name: Option<String>,
    #[serde(default)]
    pub velocity_ssff_track_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDefinition {
    pub name: String,
    #[serde(default)]
    pub anagest_config: Option<AnagestConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasAssignment {
    #[serde(default)]
    pub signal_canvas_name: Option<String>,
    pub ssff_track_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalCanvases {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub assign: Vec<CanvasAssignment>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoDimDot {
    #[serde(default)]
    pub x_ssff_track: Option<String>,
    #[serde(default)]
    pub y_ssff_track: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoDimDrawingDefinition {
    #[serde(default)]
    pub dots: Vec<TwoDimDot>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoDimCanvases {
    #[serde(default)]
    pub two_dim_drawing_definitions: Vec<TwoDimDrawingDefinition>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perspective {
    #[serde(default)]
    pub signal_canvases: SignalCanvases,
    #[serde(default)]
    pub two_dim_canvases: TwoDimCanvases,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebAppConfig {
    #[serde(default)]
    pub perspectives: Vec<Perspective>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub name: String,
    #[serde(default, rename = "mediafileExtension")]
    pub mediafile_extension: String,
    #[serde(default, rename = "ssffTrackDefinitions")]
    pub ssff_track_definitions: Vec<SsffTrackDefinition>,
    #[serde(default, rename = "levelDefinitions")]
    pub level_definitions: Vec<LevelDefinition>,
    #[serde(default, rename = "EMUwebAppConfig")]
    pub web_app_config: WebAppConfig,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DbConfig {
    /// Read and parse the `_DBconfig.json` of `database` inside `db_dir`.
    ///
    /// A missing or unparsable file maps to [`EmuError::InvalidDbConfig`];
    /// both mean the database directory is not a usable emuDB.
    pub async fn read(db_dir: &Path, project: &str, database: &str) -> EmuResult<Self> {
        let path = db_dir.join(paths::database_config_file_relative(database));
        let invalid = || EmuError::InvalidDbConfig {
            project: project.to_string(),
            database: database.to_string(),
        };

        let raw = tokio::fs::read(&path).await.map_err(|_| invalid())?;
        serde_json::from_slice(&raw).map_err(|_| invalid())
    }

    /// The subset of declared SSFF tracks the web-app can actually render.
    ///
    /// Collects every track name referenced by the perspectives (signal-canvas
    /// ordering, signal-canvas assignment, 2-D canvas dot definitions) and by
    /// level gesture configurations, drops the client-side pseudo tracks, and
    /// intersects with `ssffTrackDefinitions`. Only this subset is read from
    /// disk per bundle, bounding I/O to tracks the client can display.
    pub fn tracks_needed_by_web_app(&self) -> Vec<&SsffTrackDefinition> {
        let mut referenced: HashSet<&str> = HashSet::new();

        for perspective in &self.web_app_config.perspectives {
            for name in &perspective.signal_canvases.order {
                referenced.insert(name.as_str());
            }
            for assignment in &perspective.signal_canvases.assign {
                referenced.insert(assignment.ssff_track_name.as_str());
            }
            for drawing in &perspective.two_dim_canvases.two_dim_drawing_definitions {
                for dot in &drawing.dots {
                    if let Some(x) = &dot.x_ssff_track {
                        referenced.insert(x.as_str());
                    }
                    if let Some(y) = &dot.y_ssff_track {
                        referenced.insert(y.as_str());
                    }
                }
            }
        }

        for level in &self.level_definitions {
            if let Some(anagest) = &level.anagest_config {
                if let Some(track) = &anagest.vertical_pos_ssff_track_name {
                    referenced.insert(track.as_str());
                }
                if let Some(track) = &anagest.velocity_ssff_track_name {
                    referenced.insert(track.as_str());
                }
            }
        }

        for pseudo in PSEUDO_TRACKS {
            referenced.remove(pseudo);
        }

        self.ssff_track_definitions
            .iter()
            .filter(|def| referenced.contains(def.name.as_str()))
            .collect()
    }

    /// Whether a track of the given name is declared for this database.
    pub fn has_track(&self, name: &str) -> bool {
        self.ssff_track_definitions.iter().any(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: serde_json::Value) -> DbConfig {
        serde_json::from_value(json).unwrap()
    }

    fn track_names(cfg: &DbConfig) -> Vec<&str> {
        let mut names: Vec<&str> = cfg
            .tracks_needed_by_web_app()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    #[test]
    fn collects_tracks_from_all_perspective_sources() {
        let cfg = config(serde_json::json!({
            "name": "ae",
            "mediafileExtension": "wav",
            "ssffTrackDefinitions": [
                {"name": "FORMANTS", "columnName": "fm", "fileExtension": "fms"},
                {"name": "dft", "fileExtension": "dft"},
                {"name": "F0", "fileExtension": "f0"},
                {"name": "unreferenced", "fileExtension": "xyz"}
            ],
            "levelDefinitions": [],
            "EMUwebAppConfig": {
                "perspectives": [{
                    "signalCanvases": {
                        "order": ["OSCI", "SPECTO", "F0"],
                        "assign": [{"signalCanvasName": "SPECTO", "ssffTrackName": "FORMANTS"}]
                    },
                    "twoDimCanvases": {
                        "twoDimDrawingDefinitions": [{
                            "dots": [{"xSsffTrack": "dft", "ySsffTrack": "F0"}]
                        }]
                    }
                }]
            }
        }));

        assert_eq!(track_names(&cfg), ["F0", "FORMANTS", "dft"]);
    }

    #[test]
    fn pseudo_tracks_are_never_file_backed() {
        let cfg = config(serde_json::json!({
            "name": "ae",
            "ssffTrackDefinitions": [
                {"name": "OSCI", "fileExtension": "osc"}
            ],
            "EMUwebAppConfig": {
                "perspectives": [{
                    "signalCanvases": {"order": ["OSCI", "SPECTO"], "assign": []},
                    "twoDimCanvases": {"twoDimDrawingDefinitions": []}
                }]
            }
        }));

        // Even a (misguided) OSCI track definition is not selected.
        assert!(cfg.tracks_needed_by_web_app().is_empty());
    }

    #[test]
    fn gesture_config_tracks_are_included() {
        let cfg = config(serde_json::json!({
            "name": "ae",
            "ssffTrackDefinitions": [
                {"name": "tongueTip", "fileExtension": "tt"},
                {"name": "tongueVel", "fileExtension": "tv"}
            ],
            "levelDefinitions": [{
                "name": "Gestures",
                "type": "EVENT",
                "anagestConfig": {
                    "verticalPosSsffTrackName": "tongueTip",
                    "velocitySsffTrackName": "tongueVel"
                }
            }],
            "EMUwebAppConfig": {"perspectives": []}
        }));

        assert_eq!(track_names(&cfg), ["tongueTip", "tongueVel"]);
    }

    #[test]
    fn referenced_but_undeclared_tracks_are_dropped() {
        let cfg = config(serde_json::json!({
            "name": "ae",
            "ssffTrackDefinitions": [],
            "EMUwebAppConfig": {
                "perspectives": [{
                    "signalCanvases": {"order": ["FORMANTS"], "assign": []},
                    "twoDimCanvases": {"twoDimDrawingDefinitions": []}
                }]
            }
        }));

        assert!(cfg.tracks_needed_by_web_app().is_empty());
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let original = serde_json::json!({
            "name": "ae",
            "UUID": "0fc618dc-8980-414d-8c7a-144a649ce199",
            "mediafileExtension": "wav",
            "ssffTrackDefinitions": [],
            "linkDefinitions": [{"type": "ONE_TO_MANY", "superlevelName": "Word"}],
            "EMUwebAppConfig": {
                "perspectives": [],
                "restrictions": {"showPerspectivesSidebar": true}
            }
        });

        let cfg: DbConfig = serde_json::from_value(original.clone()).unwrap();
        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["UUID"], original["UUID"]);
        assert_eq!(back["linkDefinitions"], original["linkDefinitions"]);
        assert_eq!(
            back["EMUwebAppConfig"]["restrictions"],
            original["EMUwebAppConfig"]["restrictions"]
        );
    }
}
