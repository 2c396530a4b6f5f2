#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use metadata_tables::Config;
use tempfile::TempDir;

pub const PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Profile xmlns="http://soap.sforce.com/2006/04/metadata">
    <categoryGroupVisibilities>
        <dataCategories>Europe</dataCategories>
        <dataCategories>Asia</dataCategories>
        <dataCategoryGroup>Geo</dataCategoryGroup>
        <visibility>CUSTOM</visibility>
    </categoryGroupVisibilities>
    <custom>false</custom>
    <fieldPermissions>
        <editable>true</editable>
        <field>Account.Name</field>
        <readable>true</readable>
    </fieldPermissions>
    <fieldPermissions>
        <editable>false</editable>
        <field>Account.Phone</field>
        <readable>true</readable>
    </fieldPermissions>
    <flowAccesses>
        <enabled>true</enabled>
        <flow>Onboard</flow>
        <steps>
            <label>Start</label>
        </steps>
        <steps>
            <label>Finish</label>
        </steps>
    </flowAccesses>
    <userLicense>Salesforce</userLicense>
</Profile>
"#;

const CONFIG: &str = r#"
[paths]
source = "profiles"
tables = "tables"

[schema]
root_tag = "Profile"
suffix = ".profile-meta.xml"

[[schema.sections]]
key = "categoryGroupVisibilities"
key_fields = ["dataCategoryGroup"]
columns = ["dataCategories", "dataCategoryGroup", "visibility"]

[[schema.sections]]
key = "fieldPermissions"
key_fields = ["field"]
columns = ["editable", "field", "readable"]

[[schema.sections]]
key = "flowAccesses"
key_fields = ["flow", "steps_label"]
columns = ["enabled", "flow", "steps_label"]
"#;

/// A workspace with a configuration whose paths point inside a temporary
/// directory and one source document, `Admin`.
pub struct Workspace {
    pub dir: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_profile(PROFILE)
    }

    pub fn with_profile(profile: &str) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        let config_path = dir.path().join("metadata-tables.toml");
        fs::write(&config_path, CONFIG).expect("config written");

        let mut config = Config::load(&config_path).expect("config loaded");
        config.paths.source = dir.path().join("profiles");
        config.paths.tables = dir.path().join("tables");

        let workspace = Self { dir, config };
        workspace.write_source("Admin", profile);
        workspace
    }

    pub fn write_source(&self, name: &str, body: &str) {
        fs::create_dir_all(&self.config.paths.source).expect("source directory");
        fs::write(self.source_file(name), body).expect("source written");
    }

    pub fn source_file(&self, name: &str) -> PathBuf {
        self.config
            .source_file(&self.config.paths.source, name)
    }

    pub fn document_dir(&self, name: &str) -> PathBuf {
        self.config.document_dir(&self.config.paths.tables, name)
    }

    pub fn table(&self, name: &str, section: &str) -> PathBuf {
        self.document_dir(name).join(format!("{section}.csv"))
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|error| panic!("{}: {error}", path.display()))
}

/// Every file below `dir` with its contents, sorted by path.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).expect("directory listed") {
            let path = entry.expect("directory entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let contents = fs::read(&path).expect("file read");
                files.push((path, contents));
            }
        }
    }
    files.sort();
    files
}
