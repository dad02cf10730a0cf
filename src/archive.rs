//! Image Archive Rewriting
//!
//! Rewrites the tarball produced by `docker save` so that loading it back
//! yields the same layers under a config carrying a new label set.
//! Both the classic layout (`<id>.json`) and the OCI layout
//! (`blobs/sha256/<id>`) written by newer engines are supported.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tar::{Archive, Builder, EntryType, Header};

use crate::error::{Error, Result};

const MANIFEST_PATH: &str = "manifest.json";
const OCI_BLOB_PREFIX: &str = "blobs/sha256/";

/// Entries regenerated or dropped when rebuilding the archive
const SKIPPED_ENTRIES: &[&str] = &[MANIFEST_PATH, "index.json", "oci-layout", "repositories"];

/// One image entry of `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    config: String,

    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,

    #[serde(flatten)]
    other: Map<String, Value>,
}

/// Rebuild a saved image archive with a new label set
///
/// # Arguments
/// - `input`: Archive produced by `docker save` for a single image
/// - `output`: Destination for the rebuilt archive
/// - `labels`: Complete label set for the new image config
/// - `repo_tag`: Tag the loaded image should receive, if any
///
/// # Returns
/// Content identifier of the rewritten image
///
/// # Errors
/// Returns `Archive` if the manifest or config is missing or malformed
pub fn rewrite_archive<R: Read + Seek, W: Write>(
    mut input: R,
    output: W,
    labels: &BTreeMap<String, String>,
    repo_tag: Option<&str>,
) -> Result<String> {
    let manifest = read_entry(&mut input, MANIFEST_PATH)?
        .ok_or_else(|| Error::archive("archive has no manifest.json"))?;
    let mut manifest: Vec<ManifestEntry> = serde_json::from_slice(&manifest)
        .map_err(|e| Error::archive(format!("malformed manifest.json: {}", e)))?;
    if manifest.len() != 1 {
        return Err(Error::archive(format!(
            "expected one image in manifest.json, found {}",
            manifest.len()
        )));
    }
    let mut entry = manifest.remove(0);
    let original_config_path = entry.config.clone();

    let config = read_entry(&mut input, &original_config_path)?
        .ok_or_else(|| Error::archive(format!("archive has no config {}", original_config_path)))?;
    let mut config: Value = serde_json::from_slice(&config)
        .map_err(|e| Error::archive(format!("malformed image config: {}", e)))?;
    replace_labels(&mut config, labels)?;

    let config = serde_json::to_vec(&config)?;
    let digest = hex::encode(Sha256::digest(&config));
    let config_path = if original_config_path.starts_with(OCI_BLOB_PREFIX) {
        format!("{}{}", OCI_BLOB_PREFIX, digest)
    } else {
        format!("{}.json", digest)
    };

    entry.config = config_path.clone();
    entry.repo_tags = repo_tag.map(|tag| vec![tag.to_string()]);
    let manifest = serde_json::to_vec(&[entry])?;

    let mut builder = Builder::new(output);
    copy_entries(
        &mut input,
        &mut builder,
        &[normalize_path(&original_config_path), config_path.as_str()],
    )?;
    append_file(&mut builder, &config_path, &config)?;
    append_file(&mut builder, MANIFEST_PATH, &manifest)?;
    builder.into_inner()?.flush()?;

    Ok(format!("sha256:{}", digest))
}

/// Tag to give an image loaded for `reference`
///
/// Image ids and digest references cannot carry a tag. A bare repository gets
/// `:latest` since the engine only loads fully tagged names.
pub fn tagged_reference(reference: &str) -> Option<String> {
    if reference.contains('@') || is_image_id(reference) {
        return None;
    }

    let name = reference.rsplit('/').next().unwrap_or(reference);
    if name.contains(':') {
        Some(reference.to_string())
    } else {
        Some(format!("{}:latest", reference))
    }
}

/// Whether `reference` names an image by content identifier
pub fn is_image_id(reference: &str) -> bool {
    let is_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());

    match reference.strip_prefix("sha256:") {
        Some(hex) => is_hex(hex),
        None => {
            (12..=64).contains(&reference.len())
                && is_hex(reference)
                && !reference.chars().any(|c| c.is_ascii_uppercase())
        }
    }
}

fn normalize_path(path: &str) -> &str {
    path.trim_start_matches("./")
}

/// Read a single entry from the archive, starting from the beginning
fn read_entry<R: Read + Seek>(input: &mut R, wanted: &str) -> Result<Option<Vec<u8>>> {
    input.seek(SeekFrom::Start(0))?;
    let mut archive = Archive::new(input);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if normalize_path(&path) == normalize_path(wanted) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(Some(data));
        }
    }

    Ok(None)
}

/// Copy every entry that is not regenerated into the new archive
///
/// `configs` lists the superseded and the rewritten config paths, both of
/// which are left out.
fn copy_entries<R: Read + Seek, W: Write>(
    input: &mut R,
    builder: &mut Builder<W>,
    configs: &[&str],
) -> Result<()> {
    input.seek(SeekFrom::Start(0))?;
    let mut archive = Archive::new(input);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let normalized = normalize_path(&path);
        if SKIPPED_ENTRIES.contains(&normalized) || configs.contains(&normalized) {
            continue;
        }

        let mut header = entry.header().clone();
        match header.entry_type() {
            EntryType::Symlink | EntryType::Link => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| Error::archive(format!("link {} has no target", path)))?
                    .into_owned();
                builder.append_link(&mut header, &path, target)?;
            }
            _ => builder.append_data(&mut header, &path, &mut entry)?,
        }
    }

    Ok(())
}

fn append_file<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Replace `config.Labels` in an image config
fn replace_labels(config: &mut Value, labels: &BTreeMap<String, String>) -> Result<()> {
    let root = config
        .as_object_mut()
        .ok_or_else(|| Error::archive("image config is not a JSON object"))?;

    let container = root
        .entry("config")
        .or_insert_with(|| Value::Object(Map::new()));
    if container.is_null() {
        *container = Value::Object(Map::new());
    }
    let container = container
        .as_object_mut()
        .ok_or_else(|| Error::archive("image config has a malformed config section"))?;

    let value = if labels.is_empty() {
        Value::Null
    } else {
        serde_json::to_value(labels)?
    };
    container.insert("Labels".to_string(), value);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const LAYER_PATH: &str = "0123abcd/layer.tar";

    fn build_archive(config_path: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
        let config = serde_json::json!({
            "architecture": "amd64",
            "config": { "Env": ["PATH=/bin"], "Labels": { "old": "1" } },
            "rootfs": { "type": "layers", "diff_ids": ["sha256:00"] }
        });
        let manifest = serde_json::json!([{
            "Config": config_path,
            "RepoTags": ["app:latest"],
            "Layers": [LAYER_PATH]
        }]);

        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, LAYER_PATH, b"layer-bytes").unwrap();
        append_file(&mut builder, config_path, &serde_json::to_vec(&config).unwrap()).unwrap();
        for (path, data) in extra {
            append_file(&mut builder, path, data).unwrap();
        }
        append_file(
            &mut builder,
            MANIFEST_PATH,
            &serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();
        builder.into_inner().unwrap()
    }

    fn entries(data: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut archive = Archive::new(data);
        let mut found = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            found.insert(path, content);
        }
        found
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rewrite_classic_archive() {
        let input = build_archive("aaaa.json", &[("repositories", b"{}")]);
        let mut output = Vec::new();
        let image_id = rewrite_archive(
            Cursor::new(input),
            &mut output,
            &labels(&[("tier", "web")]),
            Some("app:latest"),
        )
        .unwrap();

        let files = entries(&output);
        assert_eq!(files[LAYER_PATH], b"layer-bytes");
        assert!(!files.contains_key("repositories"));
        assert!(!files.contains_key("aaaa.json"));

        assert_eq!(files.len(), 3);
        let digest = image_id.strip_prefix("sha256:").unwrap();
        let config_path = format!("{}.json", digest);
        let config = &files[&config_path];
        assert_eq!(hex::encode(Sha256::digest(config)), digest);

        let config: Value = serde_json::from_slice(config).unwrap();
        assert_eq!(config["config"]["Labels"], serde_json::json!({ "tier": "web" }));
        assert_eq!(config["config"]["Env"], serde_json::json!(["PATH=/bin"]));
        assert_eq!(config["architecture"], "amd64");

        let manifest: Value = serde_json::from_slice(&files[MANIFEST_PATH]).unwrap();
        assert_eq!(manifest[0]["Config"], config_path.as_str());
        assert_eq!(manifest[0]["RepoTags"], serde_json::json!(["app:latest"]));
        assert_eq!(manifest[0]["Layers"], serde_json::json!([LAYER_PATH]));
    }

    #[test]
    fn test_rewrite_oci_layout_archive() {
        let input = build_archive(
            "blobs/sha256/aaaa",
            &[("index.json", b"{}"), ("oci-layout", b"{}")],
        );
        let mut output = Vec::new();
        let image_id =
            rewrite_archive(Cursor::new(input), &mut output, &BTreeMap::new(), None).unwrap();

        let files = entries(&output);
        assert!(!files.contains_key("index.json"));
        assert!(!files.contains_key("oci-layout"));
        assert!(!files.contains_key("blobs/sha256/aaaa"));

        let digest = image_id.strip_prefix("sha256:").unwrap();
        let config: Value =
            serde_json::from_slice(&files[&format!("blobs/sha256/{}", digest)]).unwrap();
        assert!(config["config"]["Labels"].is_null());

        let manifest: Value = serde_json::from_slice(&files[MANIFEST_PATH]).unwrap();
        assert!(manifest[0]["RepoTags"].is_null());
    }

    #[test]
    fn test_rewrite_drops_superseded_config_with_dot_prefix() {
        let input = build_archive("./aaaa.json", &[]);
        let mut output = Vec::new();
        let image_id = rewrite_archive(
            Cursor::new(input),
            &mut output,
            &labels(&[("tier", "web")]),
            Some("app:latest"),
        )
        .unwrap();

        let files = entries(&output);
        let digest = image_id.strip_prefix("sha256:").unwrap();
        let names: Vec<&str> = files.keys().map(String::as_str).collect();
        let config_path = format!("{}.json", digest);
        let mut expected = vec![LAYER_PATH, MANIFEST_PATH, config_path.as_str()];
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_rewrite_without_manifest_fails() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, LAYER_PATH, b"layer-bytes").unwrap();
        let input = builder.into_inner().unwrap();

        let result = rewrite_archive(Cursor::new(input), Vec::new(), &BTreeMap::new(), None);
        assert!(matches!(result, Err(Error::Archive(_))));
    }

    #[test]
    fn test_replace_labels_creates_config_section() {
        let mut config = serde_json::json!({ "config": null });
        replace_labels(&mut config, &labels(&[("a", "1")])).unwrap();
        assert_eq!(config["config"]["Labels"]["a"], "1");

        let mut config = serde_json::json!({ "config": "bogus" });
        assert!(replace_labels(&mut config, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_tagged_reference() {
        assert_eq!(tagged_reference("app:v1").as_deref(), Some("app:v1"));
        assert_eq!(tagged_reference("app").as_deref(), Some("app:latest"));
        assert_eq!(
            tagged_reference("localhost:5000/team/app").as_deref(),
            Some("localhost:5000/team/app:latest")
        );
        assert_eq!(tagged_reference("app@sha256:abcd"), None);
        assert_eq!(tagged_reference("sha256:0123456789ab"), None);
        assert_eq!(tagged_reference("0123456789ab"), None);
    }

    #[test]
    fn test_is_image_id() {
        assert!(is_image_id("sha256:0123456789abcdef"));
        assert!(is_image_id("0123456789ab"));
        assert!(!is_image_id("sha256:"));
        assert!(!is_image_id("app:latest"));
        assert!(!is_image_id("abc"));
    }
}
