//! profiles.json: learned profiles keyed by profile id.

use crate::state_file::{load_json, save_json};
use anyhow::Result;
use hyprtune_common::Profile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ProfileDocument {
    version: u32,
    profiles: BTreeMap<String, Profile>,
}

pub struct ProfileFile {
    path: PathBuf,
}

impl ProfileFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load profiles. A missing or unreadable file yields an empty set.
    pub fn load(&self) -> BTreeMap<String, Profile> {
        match load_json::<ProfileDocument>(&self.path) {
            Ok(Some(doc)) => {
                if doc.version != FORMAT_VERSION {
                    warn!(
                        "profiles.json has version {}, expected {}; loading anyway",
                        doc.version, FORMAT_VERSION
                    );
                }
                doc.profiles
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("{:#}. Starting with no profiles.", e);
                BTreeMap::new()
            }
        }
    }

    pub fn save(&self, profiles: &BTreeMap<String, Profile>) -> Result<()> {
        let doc = ProfileDocument {
            version: FORMAT_VERSION,
            profiles: profiles.clone(),
        };
        save_json(&self.path, &doc)
    }
}
